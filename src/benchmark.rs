//! Benchmark Driver
//!
//! Times the serial baseline and the distributed engine over a grid of matrix sizes and process counts.
//!
//! Every process count runs on an in-process [`ParallelGroup`] of exactly that many ranks, created once and reused
//! for all matrix sizes. A process count larger than the matrix dimension cannot give every rank a row, so that
//! run is skipped and recorded as absent.
//!

use super::engine::*;
use super::error::{MatmulError, Result};
use super::matrix::Matrix;
use super::serial::serial_multiply;
use super::transport::*;
use super::transport_parallel::*;
use super::util::*;
use crate::pbr::ProgressBar;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BenchmarkConfig {
    /// dimensions of the square matrices to multiply
    #[serde(default = "benchmark_default_configs::matrix_sizes")]
    pub matrix_sizes: Vec<RowNum>,
    /// sizes of the process groups to run the distributed engine on
    #[serde(default = "benchmark_default_configs::process_counts")]
    pub process_counts: Vec<usize>,
    /// seed of the random operands; the i-th matrix size uses `seed + 2i` and `seed + 2i + 1`
    #[serde(default = "benchmark_default_configs::seed")]
    pub seed: u64,
    /// verify the distributed product against the serial one only up to this dimension
    #[serde(default = "benchmark_default_configs::verify_limit")]
    pub verify_limit: RowNum,
    /// maximum accepted deviation from the serial product
    #[serde(default = "benchmark_default_configs::tolerance")]
    pub tolerance: f64,
    /// where to write the text report; `None` to skip
    #[serde(default = "benchmark_default_configs::report_path")]
    pub report_path: Option<String>,
    /// where to write the chart series; `None` to skip
    #[serde(default = "benchmark_default_configs::chart_data_path")]
    pub chart_data_path: Option<String>,
    /// where to render the chart image; `None` to skip
    #[serde(default = "benchmark_default_configs::chart_image_path")]
    pub chart_image_path: Option<String>,
    /// JSON-lines file recording every run with its phase timings
    #[serde(default = "benchmark_default_configs::profile_output")]
    pub profile_output: Option<String>,
}

pub mod benchmark_default_configs {
    use super::*;
    pub fn matrix_sizes() -> Vec<RowNum> {
        vec![100, 500, 1000]
    }
    pub fn process_counts() -> Vec<usize> {
        vec![1, 2, 4]
    }
    pub fn seed() -> u64 {
        0
    }
    pub fn verify_limit() -> RowNum {
        1000
    }
    pub fn tolerance() -> f64 {
        1e-5
    }
    pub fn report_path() -> Option<String> {
        Some("performance_report.txt".to_string())
    }
    pub fn chart_data_path() -> Option<String> {
        Some("performance_plot.json".to_string())
    }
    pub fn chart_image_path() -> Option<String> {
        Some("performance_plot.png".to_string())
    }
    pub fn profile_output() -> Option<String> {
        None
    }
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            matrix_sizes: benchmark_default_configs::matrix_sizes(),
            process_counts: benchmark_default_configs::process_counts(),
            seed: benchmark_default_configs::seed(),
            verify_limit: benchmark_default_configs::verify_limit(),
            tolerance: benchmark_default_configs::tolerance(),
            report_path: benchmark_default_configs::report_path(),
            chart_data_path: benchmark_default_configs::chart_data_path(),
            chart_image_path: benchmark_default_configs::chart_image_path(),
            profile_output: benchmark_default_configs::profile_output(),
        }
    }
}

impl BenchmarkConfig {
    pub fn sanity_check(&self) -> Result<()> {
        if self.matrix_sizes.is_empty() || self.process_counts.is_empty() {
            return Err(MatmulError::Configuration(
                "at least one matrix size and one process count are needed".to_string(),
            ));
        }
        if let Some(n) = self.matrix_sizes.iter().find(|&&n| n == 0) {
            return Err(MatmulError::Configuration(format!("invalid matrix size {n}")));
        }
        if self.process_counts.iter().any(|&processes| processes == 0) {
            return Err(MatmulError::Configuration("a process group needs at least one rank".to_string()));
        }
        if self.tolerance.is_nan() || self.tolerance < 0. {
            return Err(MatmulError::Configuration(format!("invalid tolerance {}", self.tolerance)));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BenchmarkResults {
    pub matrix_sizes: Vec<RowNum>,
    pub process_counts: Vec<usize>,
    /// one per matrix size
    pub serial_times: Vec<f64>,
    /// size-major: the run of `process_counts[j]` on `matrix_sizes[i]` is at `i * process_counts.len() + j`;
    /// `None` if the run was skipped
    pub parallel_times: Vec<Option<f64>>,
}

impl BenchmarkResults {
    pub fn parallel_time(&self, size_index: usize, process_index: usize) -> Option<f64> {
        self.parallel_times[size_index * self.process_counts.len() + process_index]
    }

    /// `serial / parallel`, infinite when the parallel run took no measurable time
    pub fn speedup(&self, size_index: usize, process_index: usize) -> Option<f64> {
        self.parallel_time(size_index, process_index).map(|parallel_time| {
            if parallel_time > 0. {
                self.serial_times[size_index] / parallel_time
            } else {
                f64::INFINITY
            }
        })
    }

    /// the times of one process count over all matrix sizes
    pub fn parallel_series(&self, process_index: usize) -> Vec<Option<f64>> {
        (0..self.matrix_sizes.len())
            .map(|size_index| self.parallel_time(size_index, process_index))
            .collect()
    }

    pub fn sanity_check(&self) {
        assert_eq!(self.serial_times.len(), self.matrix_sizes.len());
        assert_eq!(
            self.parallel_times.len(),
            self.matrix_sizes.len() * self.process_counts.len()
        );
    }
}

/// run the distributed engine once on every rank of `group` and return the coordinator's output
pub fn multiply_on_group(group: &ParallelGroup, a: &Matrix, b: &Matrix) -> Result<MultiplyOutput> {
    let n = a.n;
    let mut outputs = group.run(|transport| {
        let operands = transport.group().is_coordinator().then_some((a, b));
        DistributedMultiplier::new(transport.clone()).multiply(operands.map(|(a, _)| a), operands.map(|(_, b)| b), n)
    });
    // every rank fails the same way, so the coordinator's result tells the whole story
    outputs.truncate(COORDINATOR + 1);
    match outputs.pop() {
        Some(output) => output,
        None => Err(MatmulError::Transport("the process group produced no output".to_string())),
    }
}

pub fn run_benchmarks(config: &BenchmarkConfig, show_progress: bool) -> Result<BenchmarkResults> {
    config.sanity_check()?;
    let mut profiler = BenchmarkProfiler::new(
        config
            .profile_output
            .as_ref()
            .map(|filename| Ok::<_, MatmulError>((filename.clone(), serde_json::to_value(config)?)))
            .transpose()?,
    )?;
    let groups = config
        .process_counts
        .iter()
        .map(|&processes| ParallelGroup::new(processes))
        .collect::<Result<Vec<_>>>()?;
    let total_runs = config.matrix_sizes.len() * (config.process_counts.len() + 1);
    let mut pb = show_progress.then(|| ProgressBar::on(std::io::stderr(), total_runs as u64));
    let mut results = BenchmarkResults {
        matrix_sizes: config.matrix_sizes.clone(),
        process_counts: config.process_counts.clone(),
        serial_times: Vec::with_capacity(config.matrix_sizes.len()),
        parallel_times: Vec::with_capacity(config.matrix_sizes.len() * config.process_counts.len()),
    };
    for (size_index, &n) in config.matrix_sizes.iter().enumerate() {
        if let Some(pb) = pb.as_mut() {
            pb.message(format!("{n}x{n} ").as_str());
        }
        let (a, b) = Matrix::random_pair(n, config.seed.wrapping_add(2 * size_index as u64));
        let (expected, serial_time) = serial_multiply(&a, &b)?;
        profiler.record(BenchmarkProfilerEntry::new(n, None, serial_time))?;
        results.serial_times.push(serial_time);
        println!("Matrix size: {n}x{n}");
        println!("Serial time: {serial_time:.4} seconds");
        if let Some(pb) = pb.as_mut() {
            pb.inc();
        }
        for group in groups.iter() {
            let processes = group.size();
            if processes > n {
                eprintln!("[warning] skip {processes} processes on {n}x{n}: some rank would get no row");
                results.parallel_times.push(None);
            } else {
                let output = multiply_on_group(group, &a, &b)?;
                println!("Parallel time ({processes} processes): {:.4} seconds", output.elapsed);
                if n <= config.verify_limit {
                    let product = output.result.as_matrix().ok_or_else(|| {
                        MatmulError::Transport("the coordinator returned no product".to_string())
                    })?;
                    let max_deviation = product.max_deviation(&expected);
                    if max_deviation > config.tolerance {
                        return Err(MatmulError::NumericMismatch {
                            max_deviation,
                            tolerance: config.tolerance,
                        });
                    }
                }
                profiler.record(BenchmarkProfilerEntry::new(n, Some(processes), output.elapsed).with_events(output.events))?;
                results.parallel_times.push(Some(output.elapsed));
            }
            if let Some(pb) = pb.as_mut() {
                pb.inc();
            }
        }
    }
    if let Some(pb) = pb.as_mut() {
        pb.finish();
    }
    eprintln!("{}", profiler.brief());
    results.sanity_check();
    Ok(results)
}
