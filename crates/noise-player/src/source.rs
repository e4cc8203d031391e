//! Sample generators feeding the producer loop.
//!
//! Every generator writes into a caller-owned buffer so the producer can reuse one batch
//! allocation for the whole session.

use std::f64::consts::TAU;

use rand::{Rng, SeedableRng};
use rand_pcg::Pcg32;

/// A replaceable strategy that produces mono `i16` samples on demand.
pub trait SampleSource: Send {
    /// Overwrite every slot of `out` with freshly generated samples.
    fn fill(&mut self, out: &mut [i16]);

    /// Convenience wrapper returning `count` new samples.
    fn generate(&mut self, count: usize) -> Vec<i16> {
        let mut out = vec![0; count];
        self.fill(&mut out);
        out
    }
}

/// Uniform random samples over the full `i16` range.
pub struct WhiteNoise {
    rng: Pcg32,
}

impl WhiteNoise {
    /// Noise seeded from the thread RNG.
    pub fn new() -> Self {
        Self::with_seed(rand::random())
    }

    /// Reproducible noise stream.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Pcg32::seed_from_u64(seed),
        }
    }
}

impl Default for WhiteNoise {
    fn default() -> Self {
        Self::new()
    }
}

impl SampleSource for WhiteNoise {
    fn fill(&mut self, out: &mut [i16]) {
        for sample in out.iter_mut() {
            *sample = self.rng.random::<i16>();
        }
    }
}

/// Phase-continuous sine tone.
pub struct Sine {
    step: f64,
    phase: f64,
    amplitude: f64,
}

impl Sine {
    /// `amplitude` is a fraction of full scale and is clamped to `0.0..=1.0`.
    pub fn new(frequency_hz: f32, amplitude: f32, sample_rate: u32) -> Self {
        let step = if sample_rate == 0 {
            0.0
        } else {
            f64::from(frequency_hz) / f64::from(sample_rate)
        };
        Self {
            step,
            phase: 0.0,
            amplitude: f64::from(amplitude.clamp(0.0, 1.0)),
        }
    }
}

impl SampleSource for Sine {
    fn fill(&mut self, out: &mut [i16]) {
        let scale = self.amplitude * f64::from(i16::MAX);
        for sample in out.iter_mut() {
            *sample = ((self.phase * TAU).sin() * scale).round() as i16;
            self.phase = (self.phase + self.step).fract();
        }
    }
}

/// Digital silence.
#[derive(Default)]
pub struct Silence;

impl SampleSource for Silence {
    fn fill(&mut self, out: &mut [i16]) {
        out.fill(0);
    }
}

/// Which generator a session should run.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SourceKind {
    WhiteNoise { seed: Option<u64> },
    Sine { frequency_hz: f32, amplitude: f32 },
    Silence,
}

impl Default for SourceKind {
    fn default() -> Self {
        Self::WhiteNoise { seed: None }
    }
}

impl SourceKind {
    /// Instantiate the generator for a stream running at `sample_rate`.
    pub fn build(self, sample_rate: u32) -> Box<dyn SampleSource> {
        match self {
            Self::WhiteNoise { seed: Some(seed) } => Box::new(WhiteNoise::with_seed(seed)),
            Self::WhiteNoise { seed: None } => Box::new(WhiteNoise::new()),
            Self::Sine {
                frequency_hz,
                amplitude,
            } => Box::new(Sine::new(frequency_hz, amplitude, sample_rate)),
            Self::Silence => Box::new(Silence),
        }
    }

    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::WhiteNoise { .. } => "white-noise",
            Self::Sine { .. } => "sine",
            Self::Silence => "silence",
        }
    }
}
