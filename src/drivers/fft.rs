use std::sync::Arc;

use rustfft::{num_complex::Complex32, Fft, FftPlanner};

use crate::types::{Measurement, CYCLES_PER_SEC, SAMPLES_PER_CYCLE, SAMPLING_RATE_HZ};

/// Forward spectrum of a whole measurement, owned by the analysis stage.
///
/// The scratch buffer is sized for the measurement and re-planned when the
/// number of cycles changes. Nothing here mutates the spectrum after the
/// transform, so [`residual`](Self::residual) and [`thd`](Self::thd) can be
/// used in any order.
pub struct MeasurementSpectrum {
    planner: FftPlanner<f32>,
    forward: Option<Arc<dyn Fft<f32>>>,
    sample_count: usize,
    buffer: Vec<Complex32>,
}

impl MeasurementSpectrum {
    pub fn with_cycles(cycles: usize) -> Self {
        let mut spectrum = Self {
            planner: FftPlanner::new(),
            forward: None,
            sample_count: 0,
            buffer: Vec::new(),
        };
        spectrum.resize(cycles * SAMPLES_PER_CYCLE);
        spectrum
    }

    fn resize(&mut self, sample_count: usize) {
        if sample_count == self.sample_count && self.forward.is_some() {
            return;
        }
        self.sample_count = sample_count;
        self.forward = (sample_count > 0).then(|| self.planner.plan_fft_forward(sample_count));
        self.buffer = vec![Complex32::ZERO; sample_count];
    }

    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    /// Transforms the concatenated raw samples of `measurement`.
    pub fn transform(&mut self, measurement: &Measurement) {
        self.resize(measurement.sample_count());
        for (slot, sample) in self.buffer.iter_mut().zip(measurement.samples()) {
            *slot = Complex32::new(f32::from(sample), 0.0);
        }
        if let Some(fft) = &self.forward {
            fft.process(&mut self.buffer);
        }
    }

    /// Non-redundant half of the spectrum, DC through Nyquist.
    pub fn bins(&self) -> &[Complex32] {
        let available = if self.sample_count == 0 {
            0
        } else {
            self.sample_count / 2 + 1
        };
        &self.buffer[..available]
    }

    pub fn resolution_hz(&self) -> f32 {
        SAMPLING_RATE_HZ / self.sample_count as f32
    }

    /// Bin nearest the nominal line frequency.
    pub fn fundamental_bin(&self) -> usize {
        if self.sample_count == 0 {
            return 0;
        }
        (CYCLES_PER_SEC as f32 / self.resolution_hz()).round() as usize
    }

    /// Total harmonic distortion of the last transformed measurement.
    pub fn thd(&self) -> f32 {
        harmonic_distortion(self.bins(), self.fundamental_bin())
    }

    /// Waveform of the last measurement with the fundamental and all of its
    /// harmonics removed.
    pub fn residual(&mut self) -> Vec<f32> {
        let count = self.sample_count;
        let fundamental = self.fundamental_bin();
        if count == 0 || fundamental == 0 || fundamental > count / 2 {
            return self.buffer_as_waveform();
        }
        let mut scratch = self.buffer.clone();
        for bin in (fundamental..=count / 2).step_by(fundamental) {
            scratch[bin] = Complex32::ZERO;
            scratch[(count - bin) % count] = Complex32::ZERO;
        }
        self.planner.plan_fft_inverse(count).process(&mut scratch);
        let scale = 1.0 / count as f32;
        scratch.iter().map(|c| c.re * scale).collect()
    }

    fn buffer_as_waveform(&mut self) -> Vec<f32> {
        let count = self.sample_count;
        if count == 0 {
            return Vec::new();
        }
        let mut scratch = self.buffer.clone();
        self.planner.plan_fft_inverse(count).process(&mut scratch);
        scratch.iter().map(|c| c.re / count as f32).collect()
    }
}

/// sqrt(power at 2f, 3f, ...) / magnitude at f, over the available bins.
///
/// Falls back to zero when the fundamental bin is not available or empty.
pub fn harmonic_distortion(bins: &[Complex32], fundamental: usize) -> f32 {
    if fundamental == 0 || fundamental >= bins.len() {
        return 0.0;
    }
    let fundamental_magnitude = bins[fundamental].norm();
    if fundamental_magnitude == 0.0 {
        return 0.0;
    }
    let harmonics: f32 = bins
        .iter()
        .skip(fundamental * 2)
        .step_by(fundamental)
        .map(|c| c.norm_sqr())
        .sum();
    harmonics.sqrt() / fundamental_magnitude
}
