use super::error::Result;
use super::rand_xoshiro;
use crate::rand_xoshiro::rand_core::RngCore;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::prelude::*;

/// index of a matrix row; also used for matrix dimensions
pub type RowIndex = usize;
pub type RowNum = RowIndex;
/// zero-based position of a member inside a process group
pub type Rank = usize;

/// the rank holding the full operands and the assembled result
pub const COORDINATOR: Rank = 0;

/// half-open range of rows `[start, end)`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct IndexRange {
    pub range: [RowIndex; 2],
}

// just to distinguish them in code, essentially nothing different
pub type RowRange = IndexRange;

impl IndexRange {
    pub fn new(start: RowIndex, end: RowIndex) -> Self {
        debug_assert!(end >= start, "invalid range [{}, {})", start, end);
        Self { range: [start, end] }
    }
    pub fn new_length(start: RowIndex, length: RowNum) -> Self {
        Self::new(start, start + length)
    }
    pub fn is_empty(&self) -> bool {
        self.range[1] == self.range[0]
    }
    pub fn len(&self) -> usize {
        self.range[1] - self.range[0]
    }
    pub fn start(&self) -> RowIndex {
        self.range[0]
    }
    pub fn end(&self) -> RowIndex {
        self.range[1]
    }
    pub fn sanity_check(&self) {
        assert!(self.start() <= self.end(), "invalid row range {:?}", self);
    }
    pub fn contains(&self, row_index: RowIndex) -> bool {
        row_index >= self.start() && row_index < self.end()
    }
    pub fn iter(&self) -> std::ops::Range<RowIndex> {
        self.range[0]..self.range[1]
    }
    /// the range of flat elements covered by these rows in a row-major matrix with `row_width` columns
    pub fn element_range(&self, row_width: usize) -> std::ops::Range<usize> {
        self.start() * row_width..self.end() * row_width
    }
}

#[allow(dead_code)]
/// use Xoshiro256StarStar for deterministic random number generator
pub type DeterministicRng = rand_xoshiro::Xoshiro256StarStar;

pub trait F64Rng {
    fn next_f64(&mut self) -> f64;
}

impl F64Rng for DeterministicRng {
    fn next_f64(&mut self) -> f64 {
        f64::from_bits(0x3FF << 52 | self.next_u64() >> 12) - 1.
    }
}

/// record the multiplication time of the serial baseline and of every distributed run
pub struct BenchmarkProfiler {
    /// each record corresponds to a single multiplication
    pub records: Vec<BenchmarkProfilerEntry>,
    /// summation of all serial multiplication time
    pub sum_serial_time: f64,
    /// summation of all distributed multiplication time
    pub sum_parallel_time: f64,
    /// the file to output the profiler results
    pub benchmark_profiler_output: Option<File>,
}

impl BenchmarkProfiler {
    /// the first line of the output file is the benchmark configuration
    pub fn new(detail_log_file: Option<(String, serde_json::Value)>) -> Result<Self> {
        let benchmark_profiler_output = match detail_log_file {
            Some((filename, config)) => {
                let mut file = File::create(filename)?;
                file.write_all(serde_json::to_string(&config)?.as_bytes())?;
                file.write_all(b"\n")?;
                Some(file)
            }
            None => None,
        };
        Ok(Self {
            records: vec![],
            sum_serial_time: 0.,
            sum_parallel_time: 0.,
            benchmark_profiler_output,
        })
    }
    /// record a finished multiplication and append it to the output file
    pub fn record(&mut self, entry: BenchmarkProfilerEntry) -> Result<()> {
        match entry.processes {
            Some(_) => self.sum_parallel_time += entry.round_time,
            None => self.sum_serial_time += entry.round_time,
        }
        if let Some(file) = self.benchmark_profiler_output.as_mut() {
            let mut events = serde_json::Map::new();
            for (event_name, time) in entry.events.iter() {
                events.insert(event_name.clone(), json!(time));
            }
            let value = json!({
                "matrix_size": entry.matrix_size,
                "processes": entry.processes,
                "round_time": entry.round_time,
                "events": events,
            });
            file.write_all(serde_json::to_string(&value)?.as_bytes())?;
            file.write_all(b"\n")?;
        }
        self.records.push(entry);
        Ok(())
    }
    /// print out a brief one-line statistics
    pub fn brief(&self) -> String {
        let serial_num = self.records.iter().filter(|entry| entry.processes.is_none()).count();
        let parallel_num = self.records.len() - serial_num;
        format!(
            "serial: {} runs {:.3e}s, parallel: {} runs {:.3e}s",
            serial_num, self.sum_serial_time, parallel_num, self.sum_parallel_time
        )
    }
}

#[derive(Debug, Clone)]
pub struct BenchmarkProfilerEntry {
    /// the dimension of the square matrices
    pub matrix_size: RowNum,
    /// `None` for the serial baseline
    pub processes: Option<usize>,
    /// time spent in the multiplication, in seconds
    pub round_time: f64,
    /// time of intermediate events since the beginning, in seconds
    pub events: Vec<(String, f64)>,
}

impl BenchmarkProfilerEntry {
    pub fn new(matrix_size: RowNum, processes: Option<usize>, round_time: f64) -> Self {
        Self {
            matrix_size,
            processes,
            round_time,
            events: vec![],
        }
    }
    pub fn with_events(mut self, events: Vec<(String, f64)>) -> Self {
        self.events = events;
        self
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::rand_xoshiro::rand_core::SeedableRng;

    #[test]
    fn util_index_range_1() {
        // cargo test util_index_range_1 -- --nocapture
        let range = RowRange::new_length(25, 26);
        assert_eq!(range, RowRange::new(25, 51));
        assert_eq!(range.len(), 26);
        assert!(range.contains(25) && range.contains(50));
        assert!(!range.contains(51) && !range.contains(24));
        assert_eq!(range.element_range(4), 100..204);
        assert!(RowRange::new(3, 3).is_empty());
        assert_eq!(RowRange::new(1, 4).iter().collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn util_deterministic_rng_1() {
        // cargo test util_deterministic_rng_1 -- --nocapture
        let mut rng_1 = DeterministicRng::seed_from_u64(7);
        let mut rng_2 = DeterministicRng::seed_from_u64(7);
        for _ in 0..1000 {
            let value = rng_1.next_f64();
            assert!((0. ..1.).contains(&value));
            assert_eq!(value.to_bits(), rng_2.next_f64().to_bits());
        }
    }

    #[test]
    fn util_benchmark_profiler_1() {
        // cargo test util_benchmark_profiler_1 -- --nocapture
        let dir = tempfile::tempdir().unwrap();
        let filename = dir.path().join("profile.jsonl").to_string_lossy().to_string();
        let mut profiler = BenchmarkProfiler::new(Some((filename.clone(), json!({"seed": 1})))).unwrap();
        profiler.record(BenchmarkProfilerEntry::new(10, None, 0.5)).unwrap();
        profiler
            .record(BenchmarkProfilerEntry::new(10, Some(2), 0.25).with_events(vec![("gather".to_string(), 0.2)]))
            .unwrap();
        assert_eq!(profiler.sum_serial_time, 0.5);
        assert_eq!(profiler.sum_parallel_time, 0.25);
        println!("{}", profiler.brief());
        drop(profiler);
        let content = std::fs::read_to_string(filename).unwrap();
        let lines: Vec<serde_json::Value> = content.lines().map(|line| serde_json::from_str(line).unwrap()).collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], json!({"seed": 1}));
        assert_eq!(lines[1]["processes"], serde_json::Value::Null);
        assert_eq!(lines[2]["processes"], json!(2));
        assert_eq!(lines[2]["events"]["gather"], json!(0.2));
    }
}
