use std::collections::VecDeque;
use std::f64::consts::PI;
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::drivers::TriggeringError;
use crate::types::{Cycle, CYCLES_PER_SEC, PULSE_THIS_CYCLE, SAMPLES_PER_CYCLE};

/// Something that yields one AC cycle per call, blocking until it is available.
///
/// An error means the link to the sampling hardware is gone.
pub trait CycleSource {
    fn read_cycle(&mut self) -> Result<Cycle, TriggeringError>;
}

impl<S: CycleSource + ?Sized> CycleSource for Box<S> {
    fn read_cycle(&mut self) -> Result<Cycle, TriggeringError> {
        (**self).read_cycle()
    }
}

/// Reads packed driver frames from a character device (or any reader).
pub struct DeviceSource<R: Read> {
    reader: R,
    frame: [u8; Cycle::WIRE_SIZE],
}

impl DeviceSource<File> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TriggeringError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| TriggeringError::DeviceOpen {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self::new(file))
    }
}

impl<R: Read> DeviceSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            frame: [0; Cycle::WIRE_SIZE],
        }
    }
}

impl<R: Read> CycleSource for DeviceSource<R> {
    fn read_cycle(&mut self) -> Result<Cycle, TriggeringError> {
        match self.reader.read_exact(&mut self.frame) {
            Ok(()) => Ok(Cycle::from_le_bytes(&self.frame)),
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => Err(TriggeringError::DeviceClosed),
            Err(err) => Err(TriggeringError::DeviceRead(err)),
        }
    }
}

/// Stand-in for the hardware: a 60 Hz sine with a little uniform noise.
pub struct SimulatedSource {
    amplitude: f64,
    noise: i32,
    rng: StdRng,
    pacing: Option<Duration>,
    next_due: Instant,
}

impl SimulatedSource {
    pub const DEFAULT_AMPLITUDE: f64 = 16384.0;
    pub const DEFAULT_NOISE: i32 = 100;

    /// Real-time source producing 60 cycles per second.
    pub fn new() -> Self {
        Self {
            amplitude: Self::DEFAULT_AMPLITUDE,
            noise: Self::DEFAULT_NOISE,
            rng: StdRng::from_entropy(),
            pacing: Some(Duration::from_secs(1) / CYCLES_PER_SEC as u32),
            next_due: Instant::now(),
        }
    }

    /// Produces cycles as fast as they are read.
    pub fn unpaced() -> Self {
        Self {
            pacing: None,
            ..Self::new()
        }
    }

    /// Peak amplitude in ADC counts and noise half-width; zero noise gives a clean sine.
    pub fn with_signal(mut self, amplitude: f64, noise: i32) -> Self {
        self.amplitude = amplitude;
        self.noise = noise.max(0);
        self
    }

    pub fn seeded(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    fn pace(&mut self) {
        let Some(period) = self.pacing else {
            return;
        };
        let now = Instant::now();
        if self.next_due > now {
            thread::sleep(self.next_due - now);
        }
        self.next_due = self.next_due.max(now) + period;
    }
}

impl Default for SimulatedSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CycleSource for SimulatedSource {
    fn read_cycle(&mut self) -> Result<Cycle, TriggeringError> {
        self.pace();
        let mut samples = [0i16; SAMPLES_PER_CYCLE];
        for (i, sample) in samples.iter_mut().enumerate() {
            let clean = self.amplitude * (2.0 * PI * i as f64 / SAMPLES_PER_CYCLE as f64).sin();
            let noise = if self.noise > 0 {
                self.rng.gen_range(-self.noise..self.noise)
            } else {
                0
            };
            *sample = (clean.round() as i32 + noise).clamp(i16::MIN.into(), i16::MAX.into()) as i16;
        }
        Ok(Cycle {
            samples,
            last_pulse_counter: 200,
            current_counter: 100,
            flags: PULSE_THIS_CYCLE,
        })
    }
}

/// In-memory source useful for tests and deterministic playback.
///
/// Reports the link as closed once every cycle has been read.
pub struct ManualSource {
    queue: VecDeque<Cycle>,
}

impl ManualSource {
    pub fn new(cycles: impl IntoIterator<Item = Cycle>) -> Self {
        Self {
            queue: cycles.into_iter().collect(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.queue.len()
    }
}

impl CycleSource for ManualSource {
    fn read_cycle(&mut self) -> Result<Cycle, TriggeringError> {
        self.queue.pop_front().ok_or(TriggeringError::DeviceClosed)
    }
}
