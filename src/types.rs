// src/types.rs
use std::time::SystemTime;

/// Grid cycles per second.
pub const CYCLES_PER_SEC: usize = 60;
/// ADC samples captured per grid cycle.
pub const SAMPLES_PER_CYCLE: usize = 200;
/// Raw sampling rate of the ADC stream.
pub const SAMPLING_RATE_HZ: f32 = (SAMPLES_PER_CYCLE * CYCLES_PER_SEC) as f32;
/// Only every n-th antialiased sample reaches the low-pass stage.
pub const DECIMATION_FACTOR: usize = 10;
pub const HISTOGRAM_BINS: usize = 100;

/// Set in `Cycle::flags` when a timing pulse arrived during the cycle.
pub const PULSE_THIS_CYCLE: u32 = 1;

/// One AC-line period of raw ADC samples as handed over by the driver.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Cycle {
    pub samples: [i16; SAMPLES_PER_CYCLE],
    /// Value of `current_counter` at the last timing pulse.
    pub last_pulse_counter: u16,
    /// Rolling sample counter.
    pub current_counter: u16,
    pub flags: u32,
}

impl Cycle {
    /// Size of the packed frame produced by the kernel driver.
    pub const WIRE_SIZE: usize = SAMPLES_PER_CYCLE * 2 + 2 + 2 + 4;

    pub fn new(samples: [i16; SAMPLES_PER_CYCLE]) -> Self {
        Self {
            samples,
            last_pulse_counter: 0,
            current_counter: 0,
            flags: 0,
        }
    }

    /// Decodes the driver frame: samples, last pulse counter, current counter, flags.
    /// Every field is little-endian and the struct is packed.
    pub fn from_le_bytes(frame: &[u8; Self::WIRE_SIZE]) -> Self {
        let mut samples = [0i16; SAMPLES_PER_CYCLE];
        for (sample, bytes) in samples.iter_mut().zip(frame.chunks_exact(2)) {
            *sample = i16::from_le_bytes([bytes[0], bytes[1]]);
        }
        let tail = &frame[SAMPLES_PER_CYCLE * 2..];
        Self {
            samples,
            last_pulse_counter: u16::from_le_bytes([tail[0], tail[1]]),
            current_counter: u16::from_le_bytes([tail[2], tail[3]]),
            flags: u32::from_le_bytes([tail[4], tail[5], tail[6], tail[7]]),
        }
    }

    pub fn pulse_occurred(&self) -> bool {
        self.flags & PULSE_THIS_CYCLE != 0
    }

    /// True RMS of the raw ADC counts over the cycle.
    pub fn rms(&self) -> f32 {
        let sum_sq: f64 = self
            .samples
            .iter()
            .map(|&s| {
                let v = f64::from(s);
                v * v
            })
            .sum();
        (sum_sq / SAMPLES_PER_CYCLE as f64).sqrt() as f32
    }
}

/// A batch of consecutive cycles with the time each one was captured.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Measurement {
    pub cycles: Vec<Cycle>,
    pub timestamps: Vec<SystemTime>,
}

impl Measurement {
    pub fn with_capacity(frames: usize) -> Self {
        Self {
            cycles: Vec::with_capacity(frames),
            timestamps: Vec::with_capacity(frames),
        }
    }

    pub fn push(&mut self, cycle: Cycle, captured_at: SystemTime) {
        self.cycles.push(cycle);
        self.timestamps.push(captured_at);
    }

    pub fn len(&self) -> usize {
        self.cycles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cycles.is_empty()
    }

    /// Capture time of the first cycle.
    pub fn start(&self) -> Option<SystemTime> {
        self.timestamps.first().copied()
    }

    pub fn sample_count(&self) -> usize {
        self.cycles.len() * SAMPLES_PER_CYCLE
    }

    /// All raw samples in capture order.
    pub fn samples(&self) -> impl Iterator<Item = i16> + '_ {
        self.cycles.iter().flat_map(|c| c.samples.iter().copied())
    }

    /// Bitwise OR of every cycle's flags.
    pub fn combined_flags(&self) -> u32 {
        self.cycles.iter().fold(0, |acc, c| acc | c.flags)
    }
}

/// Per-measurement result handed to the trigger stage.
#[derive(Clone, Debug, PartialEq)]
pub struct AnalysisResult {
    /// Calibrated RMS voltage.
    pub rms: f32,
    /// Line frequency in Hz, NaN when fewer than two zero crossings were seen.
    pub frequency: f32,
    pub thd: f32,
    /// Peak of what is left after removing the fundamental and its harmonics,
    /// calibrated like `rms`.
    pub transient: f32,
    pub start: SystemTime,
    pub last_pulse_counter: u16,
    pub current_counter: u16,
    pub flags: u32,
    /// Reserved, always zero for now.
    pub histogram: [u16; HISTOGRAM_BINS],
}

impl AnalysisResult {
    pub fn has_frequency(&self) -> bool {
        self.frequency.is_finite()
    }
}
