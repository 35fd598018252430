use std::collections::BTreeMap;
use std::io::Write;
use std::time::SystemTime;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::drivers::message::millis_since_epoch;
use crate::drivers::trigger::Publisher;
use crate::drivers::TriggeringError;
use crate::types::AnalysisResult;

/// Running min, max and mean of one metric.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricStat {
    pub min: f32,
    pub max: f32,
    pub average: f32,
    #[serde(skip)]
    sum: f64,
    #[serde(skip)]
    count: u32,
}

impl MetricStat {
    pub fn new(value: f32) -> Self {
        Self {
            min: value,
            max: value,
            average: value,
            sum: f64::from(value),
            count: 1,
        }
    }

    pub fn append(&mut self, value: f32) {
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.sum += f64::from(value);
        self.count += 1;
        self.average = (self.sum / f64::from(self.count)) as f32;
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}

/// Min/max/average summary over a run of analysis results.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricsMessage {
    pub box_id: u32,
    /// When the summary was cut, ms since epoch.
    pub time: u64,
    pub measurements: u32,
    pub metrics: BTreeMap<String, MetricStat>,
}

/// Folds analysis results into per-metric statistics.
///
/// Non-finite values (a missing frequency) are left out of their metric.
#[derive(Debug, Default)]
pub struct MetricsSummary {
    metrics: BTreeMap<String, MetricStat>,
    measurements: u32,
}

impl MetricsSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, result: &AnalysisResult) {
        let values = [
            ("rms", result.rms),
            ("frequency", result.frequency),
            ("thd", result.thd),
            ("transient", result.transient),
        ];
        for (name, value) in values {
            if !value.is_finite() {
                continue;
            }
            match self.metrics.get_mut(name) {
                Some(stat) => stat.append(value),
                None => {
                    self.metrics.insert(name.to_owned(), MetricStat::new(value));
                }
            }
        }
        self.measurements += 1;
    }

    pub fn measurements(&self) -> u32 {
        self.measurements
    }

    pub fn get(&self, name: &str) -> Option<&MetricStat> {
        self.metrics.get(name)
    }

    /// Cuts the current summary and starts a new one.
    pub fn take(&mut self, box_id: u32, now: SystemTime) -> MetricsMessage {
        let summary = std::mem::take(self);
        MetricsMessage {
            box_id,
            time: millis_since_epoch(now),
            measurements: summary.measurements,
            metrics: summary.metrics,
        }
    }
}

/// Publishes one [`MetricsMessage`] JSON line per `every` results.
pub struct SummaryPublisher<W: Write> {
    writer: W,
    box_id: u32,
    every: usize,
    summary: MetricsSummary,
}

impl<W: Write> SummaryPublisher<W> {
    pub fn new(writer: W, box_id: u32, every: usize) -> Self {
        Self {
            writer,
            box_id,
            every: every.max(1),
            summary: MetricsSummary::new(),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> Publisher for SummaryPublisher<W> {
    fn publish(&mut self, result: &AnalysisResult) -> Result<(), TriggeringError> {
        self.summary.add(result);
        if (self.summary.measurements() as usize) < self.every {
            return Ok(());
        }
        let message = self.summary.take(self.box_id, SystemTime::now());
        debug!("Publishing summary of {} measurements", message.measurements);
        let line = serde_json::to_string(&message).map_err(|e| TriggeringError::Publish(e.to_string()))?;
        writeln!(self.writer, "{line}")
            .and_then(|()| self.writer.flush())
            .map_err(|e| TriggeringError::Publish(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::message::from_millis;
    use crate::types::HISTOGRAM_BINS;

    fn result(rms: f32, frequency: f32) -> AnalysisResult {
        AnalysisResult {
            rms,
            frequency,
            thd: 0.01,
            transient: 2.0,
            start: from_millis(1_000),
            last_pulse_counter: 0,
            current_counter: 0,
            flags: 0,
            histogram: [0; HISTOGRAM_BINS],
        }
    }

    #[test]
    fn stat_tracks_min_max_and_mean() {
        let mut stat = MetricStat::new(120.0);
        stat.append(118.0);
        stat.append(125.0);
        assert_eq!((stat.min, stat.max), (118.0, 125.0));
        assert!((stat.average - 121.0).abs() < 1e-4);
        assert_eq!(stat.count(), 3);
    }

    #[test]
    fn missing_frequency_is_left_out() {
        let mut summary = MetricsSummary::new();
        summary.add(&result(120.0, 60.0));
        summary.add(&result(121.0, f32::NAN));
        summary.add(&result(119.0, 59.9));
        assert_eq!(summary.measurements(), 3);
        assert_eq!(summary.get("rms").unwrap().count(), 3);
        let frequency = summary.get("frequency").unwrap();
        assert_eq!(frequency.count(), 2);
        assert!((frequency.average - 59.95).abs() < 1e-4);
        assert_eq!(frequency.min, 59.9);
    }

    #[test]
    fn take_resets_the_summary() {
        let mut summary = MetricsSummary::new();
        summary.add(&result(120.0, 60.0));
        let message = summary.take(9, from_millis(42));
        assert_eq!((message.box_id, message.time, message.measurements), (9, 42, 1));
        assert_eq!(message.metrics.len(), 4);
        assert_eq!(summary.measurements(), 0);
        assert!(summary.get("rms").is_none());
    }

    #[test]
    fn publisher_writes_one_line_per_window() {
        let mut publisher = SummaryPublisher::new(Vec::new(), 2, 3);
        for rms in [118.0, 120.0, 122.0, 130.0, 131.0] {
            publisher.publish(&result(rms, 60.0)).unwrap();
        }
        let text = String::from_utf8(publisher.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 1);
        let message: MetricsMessage = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(message.box_id, 2);
        assert_eq!(message.measurements, 3);
        let rms = message.metrics["rms"];
        assert_eq!((rms.min, rms.max), (118.0, 122.0));
        assert!((rms.average - 120.0).abs() < 1e-4);
        let json: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert!(json["metrics"]["rms"].get("count").is_none());
    }
}
