//! Reporting of resampling cycles.
//!
//! The host passes a [ResamplingSink] into every resampling call; the resampler reports each completed pass and
//! every recoverable problem to it. [LogSink] forwards to the `log` facade, [CsvStateLogger] writes one CSV row per
//! cycle.
use crate::error::ResamplingError;
use crate::resampling::ResamplingReport;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

/// Receiver for resampling reports and warnings.
pub trait ResamplingSink {
    /// Called once per completed resampling pass.
    fn record(&mut self, report: &ResamplingReport);
    /// Called for every recoverable problem, before [ResamplingSink::record].
    fn warn(&mut self, warning: &ResamplingError);
}

/// Forwards reports to the `log` facade.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSink;
impl ResamplingSink for LogSink {
    fn record(&mut self, report: &ResamplingReport) {
        debug!(
            "{} resampling: {} -> {} samples, {} recovered, bins: {:?}",
            report.strategy,
            report.source_size,
            report.output_size,
            report.recovered,
            report.occupied_bins
        );
    }
    fn warn(&mut self, warning: &ResamplingError) {
        warn!("{}", warning);
    }
}

/// One row of the resampling state log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    pub cycle: usize,
    /// Seconds since the logger was created.
    pub elapsed_s: f64,
    pub strategy: String,
    pub source_size: usize,
    pub output_size: usize,
    pub recovered: usize,
    pub occupied_bins: Option<usize>,
    pub degenerate_weights: bool,
    pub warnings: usize,
}

/// Writes a [StateRecord] per resampling cycle as CSV.
pub struct CsvStateLogger<W: Write> {
    writer: csv::Writer<W>,
    start: DateTime<Utc>,
    cycle: usize,
    pending_warnings: usize,
}
impl CsvStateLogger<File> {
    /// Create (or truncate) a CSV state log at `path`.
    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        if let Some(parent) = path.as_ref().parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        Ok(CsvStateLogger::new(File::create(path)?))
    }
}
impl<W: Write> CsvStateLogger<W> {
    pub fn new(writer: W) -> Self {
        CsvStateLogger {
            writer: csv::Writer::from_writer(writer),
            start: Utc::now(),
            cycle: 0,
            pending_warnings: 0,
        }
    }
    /// Number of rows written.
    pub fn cycles(&self) -> usize {
        self.cycle
    }
    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
    /// Flush and return the underlying writer.
    pub fn into_inner(self) -> io::Result<W> {
        self.writer.into_inner().map_err(|e| io::Error::other(e.to_string()))
    }
}
impl<W: Write> ResamplingSink for CsvStateLogger<W> {
    fn record(&mut self, report: &ResamplingReport) {
        let elapsed = Utc::now().signed_duration_since(self.start);
        let row = StateRecord {
            cycle: self.cycle,
            elapsed_s: elapsed.num_microseconds().unwrap_or(i64::MAX) as f64 * 1e-6,
            strategy: report.strategy.to_string(),
            source_size: report.source_size,
            output_size: report.output_size,
            recovered: report.recovered,
            occupied_bins: report.occupied_bins,
            degenerate_weights: report.degenerate_weights,
            warnings: self.pending_warnings.max(report.warnings.len()),
        };
        if let Err(e) = self.writer.serialize(&row) {
            warn!("failed to write resampling state row {}: {}", self.cycle, e);
        }
        self.cycle += 1;
        self.pending_warnings = 0;
    }
    fn warn(&mut self, warning: &ResamplingError) {
        self.pending_warnings += 1;
        warn!("{}", warning);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resampling::ResamplingStrategy;

    fn report(recovered: usize) -> ResamplingReport {
        let mut report = ResamplingReport::new(ResamplingStrategy::Residual, 10);
        report.output_size = 8;
        report.recovered = recovered;
        report.occupied_bins = Some(3);
        report
    }

    #[test]
    fn test_csv_state_logger_rows() {
        let mut logger = CsvStateLogger::new(Vec::new());
        logger.record(&report(0));
        logger.warn(&ResamplingError::DegenerateWeights { total: 0.0 });
        logger.record(&report(2));
        assert_eq!(logger.cycles(), 2);
        let bytes = logger.into_inner().unwrap();

        let mut reader = csv::Reader::from_reader(bytes.as_slice());
        let rows: Vec<StateRecord> = reader.deserialize().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].cycle, 0);
        assert_eq!(rows[0].strategy, "residual");
        assert_eq!(rows[0].warnings, 0);
        assert_eq!(rows[1].recovered, 2);
        assert_eq!(rows[1].occupied_bins, Some(3));
        assert_eq!(rows[1].warnings, 1);
        assert!(rows[1].elapsed_s >= rows[0].elapsed_s);
    }
}
