//! Random block labels, call-site ids and per-site sampling decisions.
//!
//! Labels are drawn once per program point while preparing a build and stay
//! fixed for the lifetime of the artifact. Collisions are expected: two edges
//! sharing a map slot is an accepted approximation of coverage.

use std::fmt;

use anyhow::{Result, bail, ensure};
use eifuzz::MAP_SIZE;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use serde::{Deserialize, Serialize};

pub const RATIO_ERROR: &str = "Bad value of AFL_INST_RATIO (must be between 1 and 100)";

/// Percentage of program points that receive a recording call, in `[1, 100]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct SamplingRatio(u32);

impl SamplingRatio {
    pub const ALWAYS: Self = Self(100);

    pub fn new(ratio: u32) -> Result<Self> {
        ensure!((1..=100).contains(&ratio), RATIO_ERROR);
        Ok(Self(ratio))
    }

    /// Parses the textual form used in the environment, e.g. `"50"`.
    pub fn parse(text: &str) -> Result<Self> {
        let Ok(ratio) = text.trim().parse::<u32>() else {
            bail!(RATIO_ERROR);
        };
        Self::new(ratio)
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl Default for SamplingRatio {
    fn default() -> Self {
        Self::ALWAYS
    }
}

impl TryFrom<u32> for SamplingRatio {
    type Error = anyhow::Error;

    fn try_from(ratio: u32) -> Result<Self> {
        Self::new(ratio)
    }
}

impl From<SamplingRatio> for u32 {
    fn from(ratio: SamplingRatio) -> u32 {
        ratio.0
    }
}

impl fmt::Display for SamplingRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

macro_rules! map_index {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "u32", into = "u32")]
        pub struct $name(u32);

        impl $name {
            pub fn new(value: u32) -> Result<Self> {
                ensure!(
                    (value as usize) < MAP_SIZE,
                    "{} {value} is outside [0, {MAP_SIZE})",
                    stringify!($name)
                );
                Ok(Self(value))
            }

            pub fn get(self) -> u32 {
                self.0
            }
        }

        impl TryFrom<u32> for $name {
            type Error = anyhow::Error;

            fn try_from(value: u32) -> Result<Self> {
                Self::new(value)
            }
        }

        impl From<$name> for u32 {
            fn from(value: $name) -> u32 {
                value.0
            }
        }
    };
}

map_index!(
    /// The fixed label of one instrumented program point.
    BlockLabel
);

map_index!(
    /// The fixed id of one bracketed call site.
    CallSiteId
);

/// Seeded source of labels, call-site ids and sampling decisions.
///
/// Every call advances the same stream, so a fixed seed and a fixed order of
/// requests reproduce the same plan.
#[derive(Debug, Clone)]
pub struct LabelSource {
    rng: StdRng,
    seed: u64,
}

impl LabelSource {
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            seed,
        }
    }

    /// Seeds from the thread RNG. The seed is kept so the build can be redone.
    pub fn from_entropy() -> Self {
        Self::from_seed(rand::rng().next_u64())
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn next_label(&mut self) -> BlockLabel {
        BlockLabel(self.rng.random_range(0..MAP_SIZE as u32))
    }

    pub fn next_call_site_id(&mut self) -> CallSiteId {
        CallSiteId(self.rng.random_range(0..MAP_SIZE as u32))
    }

    /// Draws from `[0, 100)` and keeps the site iff the draw is below `ratio`.
    pub fn should_instrument(&mut self, ratio: SamplingRatio) -> bool {
        self.rng.random_range(0..100u32) < ratio.get()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn ratio_bounds() {
        assert_matches!(SamplingRatio::new(1), Ok(r) if r.get() == 1);
        assert_matches!(SamplingRatio::new(100), Ok(SamplingRatio::ALWAYS));
        assert!(SamplingRatio::new(0).is_err());
        assert!(SamplingRatio::new(101).is_err());
        assert_eq!(SamplingRatio::default(), SamplingRatio::ALWAYS);
    }

    #[test]
    fn ratio_parsing_rejects_non_integers() {
        assert_eq!(SamplingRatio::parse(" 42 ").unwrap().get(), 42);
        for bad in ["", "abc", "-5", "12.5", "0", "1000", "50%"] {
            let err = SamplingRatio::parse(bad).unwrap_err();
            assert_eq!(err.to_string(), RATIO_ERROR, "input {bad:?}");
        }
    }

    #[test]
    fn labels_stay_inside_the_map() {
        let mut source = LabelSource::from_seed(7);
        for _ in 0..10_000 {
            assert!((source.next_label().get() as usize) < MAP_SIZE);
            assert!((source.next_call_site_id().get() as usize) < MAP_SIZE);
        }
        assert!(BlockLabel::new(MAP_SIZE as u32).is_err());
        assert!(CallSiteId::new(MAP_SIZE as u32 - 1).is_ok());
    }

    #[test]
    fn same_seed_same_stream() {
        let mut a = LabelSource::from_seed(1234);
        let mut b = LabelSource::from_seed(1234);
        let half = SamplingRatio::new(50).unwrap();
        for _ in 0..100 {
            assert_eq!(a.should_instrument(half), b.should_instrument(half));
            assert_eq!(a.next_label(), b.next_label());
        }
        assert_eq!(a.seed(), 1234);
    }

    #[test]
    fn full_ratio_always_selects() {
        let mut source = LabelSource::from_seed(99);
        assert!((0..10_000).all(|_| source.should_instrument(SamplingRatio::ALWAYS)));
    }

    #[test]
    fn selection_frequency_approximates_ratio() {
        const TRIALS: u32 = 100_000;
        let mut source = LabelSource::from_seed(0xdecaf);
        for ratio in [1, 10, 33, 50, 90] {
            let ratio = SamplingRatio::new(ratio).unwrap();
            let selected = (0..TRIALS)
                .filter(|_| source.should_instrument(ratio))
                .count() as f64;
            let freq = selected / TRIALS as f64 * 100.0;
            assert!(
                (freq - ratio.get() as f64).abs() < 1.0,
                "ratio {ratio}: observed {freq:.2}%"
            );
        }
    }

    #[test]
    fn serde_checks_ranges() {
        let label: BlockLabel = serde_json::from_str("513").unwrap();
        assert_eq!(label.get(), 513);
        assert!(serde_json::from_str::<BlockLabel>("65536").is_err());
        assert!(serde_json::from_str::<SamplingRatio>("0").is_err());
    }
}
