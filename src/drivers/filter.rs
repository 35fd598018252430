use crate::types::{DECIMATION_FACTOR, SAMPLING_RATE_HZ};

/// Which tap table a [`FirFilter`] runs with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterKind {
    /// Raw-rate antialiasing ahead of decimation. Passband 0-500 Hz with unity
    /// gain at 60 Hz and 0.8-1.5x elsewhere, at least 40 dB down from 600 Hz.
    Antialias,
    /// Decimated-rate low-pass isolating the fundamental. Passband 10-100 Hz
    /// with unity gain at 60 Hz and 0.85-1.8x elsewhere, at least 40 dB down
    /// from 120 Hz.
    LowPass,
}

impl FilterKind {
    pub fn taps(self) -> &'static [f32] {
        match self {
            FilterKind::Antialias => &ANTIALIAS_TAPS,
            FilterKind::LowPass => &LOWPASS_TAPS,
        }
    }

    pub fn tap_count(self) -> usize {
        self.taps().len()
    }

    pub fn sample_rate_hz(self) -> f32 {
        match self {
            FilterKind::Antialias => SAMPLING_RATE_HZ,
            FilterKind::LowPass => SAMPLING_RATE_HZ / DECIMATION_FACTOR as f32,
        }
    }
}

/// Single-input single-output FIR filter over a circular sample history.
///
/// `put` stores one sample; `get` returns the filtered value for the most
/// recently stored sample. The output is meaningless until `tap_count`
/// samples have been stored.
#[derive(Clone, Debug)]
pub struct FirFilter {
    kind: FilterKind,
    taps: &'static [f32],
    history: Vec<f32>,
    cursor: usize,
}

impl FirFilter {
    pub fn new(kind: FilterKind) -> Self {
        let taps = kind.taps();
        Self {
            kind,
            taps,
            history: vec![0.0; taps.len()],
            cursor: 0,
        }
    }

    pub fn antialias() -> Self {
        Self::new(FilterKind::Antialias)
    }

    pub fn lowpass() -> Self {
        Self::new(FilterKind::LowPass)
    }

    pub fn kind(&self) -> FilterKind {
        self.kind
    }

    pub fn tap_count(&self) -> usize {
        self.taps.len()
    }

    /// Zeroes the history and rewinds the cursor.
    pub fn init(&mut self) {
        self.history.fill(0.0);
        self.cursor = 0;
    }

    pub fn put(&mut self, sample: f32) {
        self.history[self.cursor] = sample;
        self.cursor = (self.cursor + 1) % self.history.len();
    }

    pub fn get(&self) -> f32 {
        let len = self.history.len();
        let mut index = self.cursor;
        let mut acc = 0.0;
        for &tap in self.taps {
            index = if index == 0 { len - 1 } else { index - 1 };
            acc += self.history[index] * tap;
        }
        acc
    }

    pub fn process_sample(&mut self, sample: f32) -> f32 {
        self.put(sample);
        self.get()
    }
}

#[rustfmt::skip]
static ANTIALIAS_TAPS: [f32; 128] = [
    0.0049726586, 0.0038870382, 0.0052524647, 0.006696728, 0.008202293, 0.009712354,
    0.011104696, 0.012319316, 0.013232161, 0.013790646, 0.013917814, 0.013559413,
    0.012654855, 0.0112293, 0.009295742, 0.006922082, 0.004184604, 0.0012294886,
    -0.0018253507, -0.004811352, -0.0075681806, -0.0099235, -0.011749247, -0.012908962,
    -0.013324769, -0.01294928, -0.011794609, -0.009906955, -0.0073970975, -0.004420784,
    -0.0011601507, 0.002146285, 0.005288327, 0.008004677, 0.010094485, 0.011359523,
    0.011666494, 0.010919919, 0.009128119, 0.0063313344, 0.0026832172, -0.0016147561,
    -0.00628801, -0.011011593, -0.015438109, -0.019187251, -0.021912841, -0.023279332,
    -0.023020819, -0.020931039, -0.016904624, -0.01092884, -0.0030976448, 0.0063881455,
    0.017226087, 0.029033083, 0.04135672, 0.05368803, 0.06551727, 0.07632022,
    0.08562066, 0.0929998, 0.09811245, 0.100733295, 0.100733295, 0.09811245,
    0.0929998, 0.08562066, 0.07632022, 0.06551727, 0.05368803, 0.04135672,
    0.029033083, 0.017226087, 0.0063881455, -0.0030976448, -0.01092884, -0.016904624,
    -0.020931039, -0.023020819, -0.023279332, -0.021912841, -0.019187251, -0.015438109,
    -0.011011593, -0.00628801, -0.0016147561, 0.0026832172, 0.0063313344, 0.009128119,
    0.010919919, 0.011666494, 0.011359523, 0.010094485, 0.008004677, 0.005288327,
    0.002146285, -0.0011601507, -0.004420784, -0.0073970975, -0.009906955, -0.011794609,
    -0.01294928, -0.013324769, -0.012908962, -0.011749247, -0.0099235, -0.0075681806,
    -0.004811352, -0.0018253507, 0.0012294886, 0.004184604, 0.006922082, 0.009295742,
    0.0112293, 0.012654855, 0.013559413, 0.013917814, 0.013790646, 0.013232161,
    0.012319316, 0.011104696, 0.009712354, 0.008202293, 0.006696728, 0.0052524647,
    0.0038870382, 0.0049726586,
];

#[rustfmt::skip]
static LOWPASS_TAPS: [f32; 64] = [
    0.008638138, 0.012450958, 0.01874328, 0.02430594, 0.027537761, 0.026951423,
    0.021585768, 0.011431338, -0.002279685, -0.01727774, -0.030643623, -0.039369285,
    -0.041305162, -0.035697598, -0.023661323, -0.008121491, 0.006805294, 0.016712561,
    0.018134339, 0.009603539, -0.007686628, -0.029760048, -0.050616786, -0.06336647,
    -0.061984953, -0.0427518, -0.005546229, 0.045882855, 0.10427812, 0.16030353,
    0.2043448, 0.22856353, 0.22856353, 0.2043448, 0.16030353, 0.10427812,
    0.045882855, -0.005546229, -0.0427518, -0.061984953, -0.06336647, -0.050616786,
    -0.029760048, -0.007686628, 0.009603539, 0.018134339, 0.016712561, 0.006805294,
    -0.008121491, -0.023661323, -0.035697598, -0.041305162, -0.039369285, -0.030643623,
    -0.01727774, -0.002279685, 0.011431338, 0.021585768, 0.026951423, 0.027537761,
    0.02430594, 0.01874328, 0.012450958, 0.008638138,
];
