use std::sync::Arc;
use std::time::SystemTime;

use log::{debug, info, trace, warn};

use crate::drivers::fft::MeasurementSpectrum;
use crate::drivers::filter::FirFilter;
use crate::drivers::{SyncQueue, TimeSeries, TriggeringError};
use crate::engine::{RunFlag, POLL_INTERVAL};
use crate::settings::{self, Settings};
use crate::types::{
    AnalysisResult, Measurement, DECIMATION_FACTOR, HISTOGRAM_BINS, SAMPLING_RATE_HZ,
};

/// Archive of raw measurements served to historical requests.
pub type MeasurementArchive = TimeSeries<Arc<Measurement>>;

/// Filter warm-up progress of the analysis stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AnalysisState {
    /// Filling the antialias filter history.
    WarmingAntialias,
    /// Filling the low-pass filter history with decimated samples.
    WarmingLowPass,
    Running,
}

/// Turns measurements into analysis results once both filters are primed.
///
/// Owns its filters and scratch buffers; it is only ever driven from one thread.
pub struct LocalAnalysis {
    settings: Arc<Settings>,
    archive: Arc<MeasurementArchive>,
    state: AnalysisState,
    samples_processed: usize,
    antialias: FirFilter,
    lowpass: FirFilter,
    downsampled: Vec<f32>,
    spectrum: MeasurementSpectrum,
    calibration: f32,
    calibration_rejected: bool,
    clock_stepped_back: bool,
}

impl LocalAnalysis {
    pub fn new(
        settings: Arc<Settings>,
        archive: Arc<MeasurementArchive>,
    ) -> Result<Self, TriggeringError> {
        let frames = settings.frames_per_measurement()?;
        let calibration = settings.calibration_constant()?;
        Ok(Self {
            settings,
            archive,
            state: AnalysisState::WarmingAntialias,
            samples_processed: 0,
            antialias: FirFilter::antialias(),
            lowpass: FirFilter::lowpass(),
            downsampled: Vec::new(),
            spectrum: MeasurementSpectrum::with_cycles(frames),
            calibration,
            calibration_rejected: false,
            clock_stepped_back: false,
        })
    }

    pub fn state(&self) -> AnalysisState {
        self.state
    }

    /// Last analysed waveform with the fundamental and its harmonics removed.
    pub fn residual(&mut self) -> Vec<f32> {
        self.spectrum.residual()
    }

    /// Consumes measurements until the input is closed or the flag is cleared.
    pub fn run(
        &mut self,
        input: &SyncQueue<Measurement>,
        output: &SyncQueue<AnalysisResult>,
        flag: &RunFlag,
    ) -> Result<(), TriggeringError> {
        info!("Analysis filter setup");
        while flag.is_running() {
            let Some(measurement) = input.pop_timeout(POLL_INTERVAL) else {
                if input.is_closed() {
                    break;
                }
                continue;
            };
            if let Some(result) = self.process(measurement) {
                if output.push(result).is_some() {
                    warn!("Trigger queue full; dropped the oldest analysis result");
                }
            }
        }
        Ok(())
    }

    /// Runs one measurement through the stage.
    ///
    /// Returns `None` while the filters are warming up. In the running state
    /// every measurement yields exactly one result and is archived.
    pub fn process(&mut self, measurement: Measurement) -> Option<AnalysisResult> {
        let Some(start) = measurement.start() else {
            warn!("Skipping empty measurement");
            return None;
        };
        if self.state != AnalysisState::Running {
            self.warm_up(&measurement);
            return None;
        }
        self.refresh_calibration();

        let rms = rms_voltage(&measurement, self.calibration);
        self.downsample(&measurement);
        let frequency = estimate_frequency(&self.downsampled);
        self.spectrum.transform(&measurement);
        let thd = self.spectrum.thd();
        let transient = peak_magnitude(&self.spectrum.residual()) / self.calibration;

        let last = *measurement.cycles.last()?;
        let result = AnalysisResult {
            rms,
            frequency,
            thd,
            transient,
            start,
            last_pulse_counter: last.last_pulse_counter,
            current_counter: last.current_counter,
            flags: measurement.combined_flags(),
            histogram: [0; HISTOGRAM_BINS],
        };
        trace!("rms {rms:.2} V, f {frequency:.3} Hz, thd {thd:.4}");

        self.settings.set(settings::LATEST_RMS, rms);
        if frequency.is_finite() {
            self.settings.set(settings::LATEST_FREQUENCY, frequency);
        }
        self.archive_measurement(start, Arc::new(measurement));
        Some(result)
    }

    /// Archives under the capture time. If the wall clock stepped back, the
    /// measurement is filed under the newest archived time until it catches up.
    fn archive_measurement(&mut self, start: SystemTime, measurement: Arc<Measurement>) {
        match self.archive.insert(start, Arc::clone(&measurement)) {
            Ok(()) => self.clock_stepped_back = false,
            Err(TriggeringError::OutOfOrder { latest, .. }) => {
                if !self.clock_stepped_back {
                    let behind = latest.duration_since(start).unwrap_or_default();
                    warn!("Wall clock stepped back {behind:?}; archiving at the newest archived time");
                    self.clock_stepped_back = true;
                }
                if let Err(err) = self.archive.insert(latest, measurement) {
                    warn!("Measurement not archived: {err}");
                }
            }
            Err(err) => warn!("Measurement not archived: {err}"),
        }
    }

    fn warm_up(&mut self, measurement: &Measurement) {
        match self.state {
            AnalysisState::WarmingAntialias => {
                for sample in measurement.samples() {
                    self.antialias.put(f32::from(sample));
                    self.samples_processed += 1;
                }
                if self.samples_processed > self.antialias.tap_count() {
                    debug!("Antialias filter primed after {} samples", self.samples_processed);
                    self.state = AnalysisState::WarmingLowPass;
                    self.samples_processed = 0;
                }
            }
            AnalysisState::WarmingLowPass => {
                for cycle in &measurement.cycles {
                    for (i, &sample) in cycle.samples.iter().enumerate() {
                        self.antialias.put(f32::from(sample));
                        if i % DECIMATION_FACTOR == 0 {
                            self.lowpass.put(self.antialias.get());
                            self.samples_processed += 1;
                        }
                    }
                }
                if self.samples_processed >= self.lowpass.tap_count() {
                    info!("Analysis filters ready");
                    self.state = AnalysisState::Running;
                    self.samples_processed = 0;
                }
            }
            AnalysisState::Running => {}
        }
    }

    /// Antialias every sample, low-pass every tenth, keep the low-pass output.
    fn downsample(&mut self, measurement: &Measurement) {
        self.downsampled.clear();
        for cycle in &measurement.cycles {
            for (i, &sample) in cycle.samples.iter().enumerate() {
                self.antialias.put(f32::from(sample));
                if i % DECIMATION_FACTOR == 0 {
                    let antialiased = self.antialias.get();
                    self.lowpass.put(antialiased);
                    self.downsampled.push(self.lowpass.get());
                }
            }
        }
    }

    fn refresh_calibration(&mut self) {
        match self.settings.calibration_constant() {
            Ok(value) => {
                self.calibration = value;
                self.calibration_rejected = false;
            }
            Err(err) if !self.calibration_rejected => {
                warn!("{err}; keeping calibration constant {}", self.calibration);
                self.calibration_rejected = true;
            }
            Err(_) => {}
        }
    }
}

fn peak_magnitude(values: &[f32]) -> f32 {
    values.iter().fold(0.0, |peak, v| peak.max(v.abs()))
}

/// Mean of the per-cycle RMS values, divided by the calibration constant.
pub fn rms_voltage(measurement: &Measurement, calibration: f32) -> f32 {
    if measurement.is_empty() {
        return 0.0;
    }
    let sum: f32 = measurement.cycles.iter().map(|c| c.rms()).sum();
    sum / measurement.len() as f32 / calibration
}

/// Fractional positions of upward zero crossings, by linear interpolation.
///
/// A sample of exactly zero counts on either side of the crossing, but the
/// crossing is reported once.
pub fn zero_crossings(samples: &[f32]) -> Vec<f32> {
    let mut crossings: Vec<f32> = Vec::new();
    for (i, pair) in samples.windows(2).enumerate() {
        let (last, next) = (pair[0], pair[1]);
        let rising = (last <= 0.0 && next > 0.0) || (last < 0.0 && next >= 0.0);
        if !rising {
            continue;
        }
        let position = (i + 1) as f32 - next / (next - last);
        if crossings.last() != Some(&position) {
            crossings.push(position);
        }
    }
    crossings
}

/// Line frequency of a decimated waveform, NaN with fewer than two crossings.
pub fn estimate_frequency(decimated: &[f32]) -> f32 {
    let crossings = zero_crossings(decimated);
    if crossings.len() < 2 {
        return f32::NAN;
    }
    let total: f32 = crossings.windows(2).map(|w| w[1] - w[0]).sum();
    let mean_period = total / (crossings.len() - 1) as f32;
    SAMPLING_RATE_HZ / (DECIMATION_FACTOR as f32 * mean_period)
}
