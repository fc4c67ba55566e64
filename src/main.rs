extern crate clap;
extern crate distributed_matmul;
extern crate serde_json;

use clap::{Parser, Subcommand};
use distributed_matmul::benchmark::*;
use distributed_matmul::error::{MatmulError, Result};
use distributed_matmul::matrix::Matrix;
use distributed_matmul::partition::RowPartition;
use distributed_matmul::report::*;
use distributed_matmul::serial::serial_multiply;
use distributed_matmul::transport_parallel::ParallelGroup;
use distributed_matmul::util::*;

#[derive(Parser, Clone)]
#[clap(author = clap::crate_authors!(", "))]
#[clap(version = env!("CARGO_PKG_VERSION"))]
#[clap(about = "Row-block distributed dense matrix multiplication")]
#[clap(color = clap::ColorChoice::Auto)]
#[clap(propagate_version = true)]
#[clap(subcommand_required = true)]
#[clap(arg_required_else_help = true)]
pub struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Clone)]
enum Commands {
    /// time the serial baseline against the distributed engine and write the performance report
    Benchmark {
        /// benchmark configuration as a JSON object, e.g. '{"matrix_sizes":[100,200],"verify_limit":100}'
        #[clap(long, default_value = "{}")]
        benchmark_config: String,
        /// matrix sizes: [a,b,c,...], overriding the configuration
        #[clap(long)]
        matrix_sizes: Option<String>,
        /// process counts: [a,b,c,...], overriding the configuration
        #[clap(long)]
        process_counts: Option<String>,
        /// seed of the random operands, overriding the configuration
        #[clap(short = 's', long)]
        seed: Option<u64>,
        /// text report file, overriding the configuration
        #[clap(long)]
        report: Option<String>,
        /// chart data file, overriding the configuration
        #[clap(long)]
        chart_data: Option<String>,
        /// chart image file, overriding the configuration
        #[clap(long)]
        chart_image: Option<String>,
        /// JSON-lines profile of every run with its phase timings
        #[clap(long)]
        profile_output: Option<String>,
        /// disable the progress bar
        #[clap(long, action)]
        disable_progress_bar: bool,
    },
    /// run one distributed product on an in-process group
    Multiply {
        /// dimension of the square matrices
        #[clap(value_parser)]
        n: RowNum,
        /// number of ranks
        #[clap(short = 'p', long, default_value_t = 4)]
        processes: usize,
        /// seed of the random operands
        #[clap(short = 's', long, default_value_t = 0)]
        seed: u64,
        /// compare with the serial product and print the maximum deviation
        #[clap(long, action)]
        verify: bool,
    },
    /// print the row partition of an n x n matrix over a group as JSON
    Partition {
        /// dimension of the square matrices
        #[clap(value_parser)]
        n: RowNum,
        /// number of ranks
        #[clap(value_parser)]
        size: usize,
    },
    /// run one distributed product across the MPI world, e.g. `mpirun -n 4 distributed-matmul mpi 1000`;
    /// requires the `distributed` feature
    Mpi {
        /// dimension of the square matrices
        #[clap(value_parser)]
        n: RowNum,
        /// seed of the random operands
        #[clap(short = 's', long, default_value_t = 0)]
        seed: u64,
        /// compare with the serial product on the coordinator
        #[clap(long, action)]
        verify: bool,
    },
}

fn parse_list(value: &str, name: &str) -> Result<Vec<usize>> {
    serde_json::from_str(value)
        .map_err(|err| MatmulError::Configuration(format!("{name} should be [a,b,c,...]: {err}")))
}

impl Cli {
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Benchmark {
                benchmark_config,
                matrix_sizes,
                process_counts,
                seed,
                report,
                chart_data,
                chart_image,
                profile_output,
                disable_progress_bar,
            } => {
                let mut config: BenchmarkConfig = serde_json::from_str(&benchmark_config)?;
                if let Some(matrix_sizes) = matrix_sizes {
                    config.matrix_sizes = parse_list(&matrix_sizes, "matrix sizes")?;
                }
                if let Some(process_counts) = process_counts {
                    config.process_counts = parse_list(&process_counts, "process counts")?;
                }
                if let Some(seed) = seed {
                    config.seed = seed;
                }
                if report.is_some() {
                    config.report_path = report;
                }
                if chart_data.is_some() {
                    config.chart_data_path = chart_data;
                }
                if chart_image.is_some() {
                    config.chart_image_path = chart_image;
                }
                if profile_output.is_some() {
                    config.profile_output = profile_output;
                }
                let results = run_benchmarks(&config, !disable_progress_bar)?;
                let text = match config.report_path.as_ref() {
                    Some(filename) => write_report(&results, filename)?,
                    None => generate_report(&results),
                };
                let chart = ChartData::new(&results);
                if let Some(filename) = config.chart_data_path.as_ref() {
                    chart.save(filename)?;
                }
                if let Some(filename) = config.chart_image_path.as_ref() {
                    chart.render(filename)?;
                }
                println!("{text}");
            }
            Commands::Multiply {
                n,
                processes,
                seed,
                verify,
            } => {
                let (a, b) = Matrix::random_pair(n, seed);
                let group = ParallelGroup::new(processes)?;
                let output = multiply_on_group(&group, &a, &b)?;
                println!("Parallel time ({processes} processes): {:.4} seconds", output.elapsed);
                if verify {
                    let (expected, serial_time) = serial_multiply(&a, &b)?;
                    println!("Serial time: {serial_time:.4} seconds");
                    if let Some(product) = output.result.as_matrix() {
                        println!("max deviation: {:.3e}", product.max_deviation(&expected));
                    }
                }
            }
            Commands::Partition { n, size } => {
                let partition = RowPartition::new(n, size)?;
                println!("{}", serde_json::to_string(&partition)?);
            }
            Commands::Mpi { n, seed, verify } => run_mpi(n, seed, verify)?,
        }
        Ok(())
    }
}

cfg_if::cfg_if! {
    if #[cfg(feature = "distributed")] {
        use distributed_matmul::engine::DistributedMultiplier;
        use distributed_matmul::transport_distributed::DistributedTransport;
    } else {
        fn run_mpi(_n: RowNum, _seed: u64, _verify: bool) -> Result<()> {
            Err(MatmulError::Configuration(
                "built without MPI support, rebuild with `--features distributed`".to_string(),
            ))
        }
    }
}

#[cfg(feature = "distributed")]
fn run_mpi(n: RowNum, seed: u64, verify: bool) -> Result<()> {
    let universe =
        mpi::initialize().ok_or_else(|| MatmulError::Transport("MPI is already initialized".to_string()))?;
    let transport = DistributedTransport::new(universe.world())?;
    let multiplier = DistributedMultiplier::new(transport);
    let group = multiplier.group();
    // only the coordinator generates the operands
    let operands = group.is_coordinator().then(|| Matrix::random_pair(n, seed));
    let output = multiplier.multiply(
        operands.as_ref().map(|(a, _)| a),
        operands.as_ref().map(|(_, b)| b),
        n,
    )?;
    if let (Some(product), Some((a, b))) = (output.result.as_matrix(), operands.as_ref()) {
        println!("Parallel time ({} processes): {:.4} seconds", group.size, output.elapsed);
        if verify {
            let (expected, serial_time) = serial_multiply(a, b)?;
            println!("Serial time: {serial_time:.4} seconds");
            println!("max deviation: {:.3e}", product.max_deviation(&expected));
        }
    }
    Ok(())
}

fn main() {
    if let Err(err) = Cli::parse().run() {
        eprintln!("[error] {err}");
        std::process::exit(1);
    }
}
