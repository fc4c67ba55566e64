//! Report
//!
//! Turns [`BenchmarkResults`] into a human readable text report and into the series of a performance chart.
//!
//! The chart has matrix size on the x axis and execution time on a logarithmic y axis, with one curve for the serial
//! baseline and one per process count. [`ChartData`] holds its series: it's saved as JSON and rendered as a PNG image.
//! Chart text (title, axis labels, legend) is drawn only with the `chart_text` feature, which needs system fonts;
//! without it the image still has the curves and the grid.
//!

use super::benchmark::BenchmarkResults;
use super::error::{MatmulError, Result};
use crate::chrono::Local;
use crate::plotters::prelude::*;
use crate::serde_json;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;

pub const REPORT_TITLE: &str = "Performance Report";

pub fn generate_report(results: &BenchmarkResults) -> String {
    let mut report = vec![REPORT_TITLE.to_string(), "=".repeat(REPORT_TITLE.len())];
    for (size_index, n) in results.matrix_sizes.iter().enumerate() {
        report.push(format!("\nMatrix size: {n}x{n}"));
        report.push(format!("Serial time: {:.4} seconds", results.serial_times[size_index]));
        for (process_index, processes) in results.process_counts.iter().enumerate() {
            match (
                results.parallel_time(size_index, process_index),
                results.speedup(size_index, process_index),
            ) {
                (Some(parallel_time), Some(speedup)) => {
                    report.push(format!("Parallel time ({processes} procs): {parallel_time:.4} seconds"));
                    if speedup.is_infinite() {
                        report.push("Speedup: infx".to_string());
                    } else {
                        report.push(format!("Speedup: {speedup:.2}x"));
                    }
                }
                _ => report.push(format!("Parallel time ({processes} procs): skipped")),
            }
        }
    }
    report.join("\n")
}

/// write the report to `filename` and return its content
pub fn write_report(results: &BenchmarkResults, filename: &str) -> Result<String> {
    let report = generate_report(results);
    let mut file = File::create(filename)?;
    file.write_all(report.as_bytes())?;
    Ok(report)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChartSeries {
    pub label: String,
    /// matrix sizes
    pub x: Vec<usize>,
    /// seconds; `None` where the run was skipped
    pub y: Vec<Option<f64>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChartData {
    pub title: String,
    pub x_label: String,
    pub y_label: String,
    pub y_scale: String,
    /// local time at which the chart data was generated
    pub created: String,
    pub series: Vec<ChartSeries>,
}

impl ChartData {
    pub fn new(results: &BenchmarkResults) -> Self {
        let mut series = vec![ChartSeries {
            label: "Serial".to_string(),
            x: results.matrix_sizes.clone(),
            y: results.serial_times.iter().map(|&time| Some(time)).collect(),
        }];
        for (process_index, processes) in results.process_counts.iter().enumerate() {
            series.push(ChartSeries {
                label: format!("Parallel ({processes} procs)"),
                x: results.matrix_sizes.clone(),
                y: results.parallel_series(process_index),
            });
        }
        Self {
            title: "Matrix Multiplication Performance".to_string(),
            x_label: "Matrix Size".to_string(),
            y_label: "Execution Time (seconds)".to_string(),
            y_scale: "log".to_string(),
            created: Local::now().format("%Y%m%d-%H-%M-%S%.3f").to_string(),
            series,
        }
    }

    pub fn save(&self, filename: &str) -> Result<()> {
        let mut file = File::create(filename)?;
        file.write_all(serde_json::to_string_pretty(self)?.as_bytes())?;
        Ok(())
    }

    /// the drawable points of a series: skipped runs are left out, and so are non-positive times on the log axis
    pub fn points(series: &ChartSeries) -> Vec<(f64, f64)> {
        series
            .x
            .iter()
            .zip(series.y.iter())
            .filter_map(|(&x, &y)| y.filter(|&y| y > 0.).map(|y| (x as f64, y)))
            .collect()
    }

    /// render the chart as a bitmap image; the format follows the file extension
    pub fn render(&self, filename: &str) -> Result<()> {
        let chart_error = |err: &dyn std::fmt::Display| MatmulError::Chart(err.to_string());
        let all_points: Vec<Vec<(f64, f64)>> = self.series.iter().map(Self::points).collect();
        let (mut x_min, mut x_max) = (f64::INFINITY, f64::NEG_INFINITY);
        let (mut y_min, mut y_max) = (f64::INFINITY, f64::NEG_INFINITY);
        for &(x, y) in all_points.iter().flatten() {
            x_min = x_min.min(x);
            x_max = x_max.max(x);
            y_min = y_min.min(y);
            y_max = y_max.max(y);
        }
        if x_min > x_max {
            (x_min, x_max) = (0., 1.);
        } else if x_min == x_max {
            (x_min, x_max) = (x_min - 1., x_max + 1.);
        }
        if y_min > y_max {
            (y_min, y_max) = (1e-6, 1.);
        }
        // text needs a font backend, which only the `chart_text` feature provides
        let draw_text = cfg!(feature = "chart_text");
        let root = BitMapBackend::new(filename, (1000, 600)).into_drawing_area();
        root.fill(&WHITE).map_err(|err| chart_error(&err))?;
        let mut builder = ChartBuilder::on(&root);
        builder.margin(20);
        if draw_text {
            builder
                .caption(&self.title, ("sans-serif", 24))
                .x_label_area_size(40)
                .y_label_area_size(70);
        }
        let mut chart = builder
            .build_cartesian_2d(x_min..x_max, (y_min / 2.0..y_max * 2.0).log_scale())
            .map_err(|err| chart_error(&err))?;
        {
            let mut mesh = chart.configure_mesh();
            if draw_text {
                mesh.x_desc(self.x_label.as_str()).y_desc(self.y_label.as_str());
            }
            mesh.draw().map_err(|err| chart_error(&err))?;
        }
        for (index, (series, points)) in self.series.iter().zip(all_points.into_iter()).enumerate() {
            let color = Palette99::pick(index).to_rgba();
            chart
                .draw_series(LineSeries::new(points, color.stroke_width(2)))
                .map_err(|err| chart_error(&err))?
                .label(series.label.as_str())
                .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color.stroke_width(2)));
        }
        if draw_text {
            chart
                .configure_series_labels()
                .background_style(WHITE.mix(0.8))
                .border_style(&BLACK)
                .draw()
                .map_err(|err| chart_error(&err))?;
        }
        root.present().map_err(|err| chart_error(&err))?;
        Ok(())
    }
}
