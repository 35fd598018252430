use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::types::{AnalysisResult, Measurement};

/// Milliseconds since the Unix epoch; times before the epoch clamp to zero.
pub fn millis_since_epoch(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

pub fn from_millis(millis: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(millis)
}

/// Trigger summary of one measurement, as published off the box.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TriggerMessage {
    pub box_id: u32,
    /// Absent when the waveform had too few zero crossings.
    pub frequency: Option<f32>,
    pub rms: f32,
    pub thd: f32,
    pub transient: f32,
    /// Start of the measurement, ms since epoch.
    pub time: u64,
    pub current_count: u16,
    pub last_pulse_count: u16,
    pub flags: u32,
}

impl TriggerMessage {
    pub fn from_result(box_id: u32, result: &AnalysisResult) -> Self {
        Self {
            box_id,
            frequency: result.has_frequency().then_some(result.frequency),
            rms: result.rms,
            thd: result.thd,
            transient: result.transient,
            time: millis_since_epoch(result.start),
            current_count: result.current_counter,
            last_pulse_count: result.last_pulse_counter,
            flags: result.flags,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CycleMessage {
    pub time: u64,
    pub data: Vec<i16>,
    pub current_count: u16,
    pub last_pulse_count: u16,
    pub flags: u32,
}

/// Raw cycles of one archived measurement.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DataMessage {
    pub box_id: u32,
    pub cycles: Vec<CycleMessage>,
}

impl DataMessage {
    pub fn from_measurement(box_id: u32, measurement: &Measurement) -> Self {
        let cycles = measurement
            .cycles
            .iter()
            .zip(&measurement.timestamps)
            .map(|(cycle, &captured_at)| CycleMessage {
                time: millis_since_epoch(captured_at),
                data: cycle.samples.to_vec(),
                current_count: cycle.current_counter,
                last_pulse_count: cycle.last_pulse_counter,
                flags: cycle.flags,
            })
            .collect();
        Self { box_id, cycles }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Cycle, HISTOGRAM_BINS, SAMPLES_PER_CYCLE};

    fn result(frequency: f32) -> AnalysisResult {
        AnalysisResult {
            rms: 120.5,
            frequency,
            thd: 0.02,
            transient: 3.5,
            start: from_millis(1_600_000_000_123),
            last_pulse_counter: 7,
            current_counter: 9,
            flags: 1,
            histogram: [0; HISTOGRAM_BINS],
        }
    }

    #[test]
    fn millis_conversion() {
        assert_eq!(millis_since_epoch(from_millis(42)), 42);
        assert_eq!(millis_since_epoch(UNIX_EPOCH - Duration::from_secs(1)), 0);
    }

    #[test]
    fn trigger_message_json_shape() {
        let json = serde_json::to_value(TriggerMessage::from_result(3, &result(60.01))).unwrap();
        assert_eq!(json["box_id"], 3);
        assert_eq!(json["time"], 1_600_000_000_123_u64);
        assert_eq!(json["current_count"], 9);
        assert_eq!(json["last_pulse_count"], 7);
        assert!((json["frequency"].as_f64().unwrap() - 60.01).abs() < 1e-4);
    }

    #[test]
    fn missing_frequency_serializes_as_null() {
        let message = TriggerMessage::from_result(1, &result(f32::NAN));
        assert_eq!(message.frequency, None);
        let line = serde_json::to_string(&message).unwrap();
        assert!(line.contains("\"frequency\":null"));
        let back: TriggerMessage = serde_json::from_str(&line).unwrap();
        assert_eq!(back, message);
    }

    #[test]
    fn data_message_keeps_every_cycle() {
        let mut m = Measurement::default();
        let mut cycle = Cycle::new([5; SAMPLES_PER_CYCLE]);
        cycle.current_counter = 11;
        m.push(cycle, from_millis(1_000));
        m.push(Cycle::new([-5; SAMPLES_PER_CYCLE]), from_millis(1_017));
        let message = DataMessage::from_measurement(2, &m);
        assert_eq!(message.cycles.len(), 2);
        assert_eq!(message.cycles[0].data.len(), SAMPLES_PER_CYCLE);
        assert_eq!(message.cycles[0].current_count, 11);
        assert_eq!(message.cycles[1].time, 1_017);
        assert_eq!(message.cycles[1].data[0], -5);
    }
}
