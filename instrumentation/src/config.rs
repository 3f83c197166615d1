//! Instrumentation settings, read once before any code is instrumented.

use std::ffi::OsString;
use std::fmt;
use std::io::IsTerminal;

use anyhow::{Result, bail};
use serde::Serialize;

use crate::labels::{RATIO_ERROR, SamplingRatio};

pub const INST_RATIO_ENV_VAR: &str = "AFL_INST_RATIO";
pub const QUIET_ENV_VAR: &str = "AFL_QUIET";
pub const HARDEN_ENV_VAR: &str = "AFL_HARDEN";
pub const USE_ASAN_ENV_VAR: &str = "AFL_USE_ASAN";
pub const USE_MSAN_ENV_VAR: &str = "AFL_USE_MSAN";

/// The build flavour reported in the summary line. It has no effect on labels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum HardeningMode {
    Hardened,
    Sanitized,
    #[default]
    NonHardened,
}

impl fmt::Display for HardeningMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HardeningMode::Hardened => "hardened",
            HardeningMode::Sanitized => "ASAN/MSAN",
            HardeningMode::NonHardened => "non-hardened",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct InstrumentationConfig {
    pub ratio: SamplingRatio,
    /// Suppresses the banner and summary on stderr.
    pub quiet: bool,
    pub mode: HardeningMode,
    /// Seed for label generation; `None` draws a fresh one.
    pub seed: Option<u64>,
    /// Plan call-site ids and read interception in addition to block labels.
    pub execution_indexing: bool,
}

impl Default for InstrumentationConfig {
    fn default() -> Self {
        Self {
            ratio: SamplingRatio::ALWAYS,
            quiet: true,
            mode: HardeningMode::NonHardened,
            seed: None,
            execution_indexing: true,
        }
    }
}

impl InstrumentationConfig {
    /// Reads the process environment.
    ///
    /// A malformed `AFL_INST_RATIO` is a fatal error: nothing may be
    /// instrumented with an inconsistent configuration.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|k: &str| std::env::var_os(k), std::io::stderr().is_terminal())
    }

    /// Same as [`InstrumentationConfig::from_env`] with an explicit variable
    /// lookup and terminal check.
    ///
    /// Flags count as set whenever the variable is present, whatever its value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<OsString>, interactive: bool) -> Result<Self> {
        let ratio = match lookup(INST_RATIO_ENV_VAR) {
            Some(value) => {
                let Some(text) = value.to_str() else {
                    bail!(RATIO_ERROR);
                };
                SamplingRatio::parse(text)?
            }
            None => SamplingRatio::ALWAYS,
        };

        let quiet = !interactive || lookup(QUIET_ENV_VAR).is_some();

        let mode = if lookup(HARDEN_ENV_VAR).is_some() {
            HardeningMode::Hardened
        } else if lookup(USE_ASAN_ENV_VAR).is_some() || lookup(USE_MSAN_ENV_VAR).is_some() {
            HardeningMode::Sanitized
        } else {
            HardeningMode::NonHardened
        };

        Ok(Self {
            ratio,
            quiet,
            mode,
            ..Self::default()
        })
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_ratio(mut self, ratio: SamplingRatio) -> Self {
        self.ratio = ratio;
        self
    }

    pub fn with_execution_indexing(mut self, enabled: bool) -> Self {
        self.execution_indexing = enabled;
        self
    }
}
