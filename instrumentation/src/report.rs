//! Human-facing diagnostics of the preparation phase.

use slog::{info, warn};

use crate::config::InstrumentationConfig;
use crate::logger;
use crate::plan::InstrumentationPlan;

pub fn banner() -> String {
    format!("eifuzz instrumentation {}", env!("CARGO_PKG_VERSION"))
}

/// The one-line outcome printed after planning.
pub fn summary_line(plan: &InstrumentationPlan, config: &InstrumentationConfig) -> String {
    match plan.instrumented_locations() {
        0 => "No instrumentation targets found.".to_string(),
        count => format!(
            "Instrumented {count} locations ({} mode, ratio {}).",
            config.mode, plan.ratio
        ),
    }
}

/// Names the seed so a randomly labelled build can be reproduced.
pub fn seed_line(plan: &InstrumentationPlan, config: &InstrumentationConfig) -> String {
    match config.seed {
        Some(seed) => format!("Using fixed instrumentation seed {seed}"),
        None => format!("The seed used for instrumentation is {}", plan.seed),
    }
}

/// Logs the plan and, unless quiet, prints the banner, seed and summary to stderr.
pub fn report(plan: &InstrumentationPlan, config: &InstrumentationConfig) {
    let summary = summary_line(plan, config);
    if plan.instrumented_locations() == 0 {
        warn!(logger(), "{}", summary);
    } else {
        info!(logger(), "{}", summary;
            "seed" => plan.seed,
            "call_sites" => plan.call_sites(),
            "read_interceptions" => plan.read_interceptions());
    }

    if config.quiet {
        return;
    }
    eprintln!("{}", banner());
    eprintln!("{}", seed_line(plan, config));
    eprintln!("{summary}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::SamplingRatio;
    use crate::plan::{FunctionSites, ProgramSites, plan};

    fn one_function(blocks: usize) -> ProgramSites {
        ProgramSites {
            functions: vec![FunctionSites {
                name: "f".to_string(),
                blocks,
                call_sites: Vec::new(),
            }],
        }
    }

    #[test]
    fn summary_mentions_count_mode_and_ratio() {
        let config = InstrumentationConfig::default()
            .with_seed(3)
            .with_ratio(SamplingRatio::ALWAYS);
        let plan = plan(&one_function(3), &config);
        assert_eq!(
            summary_line(&plan, &config),
            "Instrumented 3 locations (non-hardened mode, ratio 100%)."
        );
        report(&plan, &config);
    }

    #[test]
    fn empty_program_warns() {
        let config = InstrumentationConfig::default().with_seed(3);
        let plan = plan(&one_function(0), &config);
        assert_eq!(summary_line(&plan, &config), "No instrumentation targets found.");
    }

    #[test]
    fn drawn_seed_is_printed_for_reproduction() {
        let config = InstrumentationConfig::default();
        let plan = plan(&one_function(2), &config);
        assert_eq!(
            seed_line(&plan, &config),
            format!("The seed used for instrumentation is {}", plan.seed)
        );
    }

    #[test]
    fn fixed_seed_is_reported_as_fixed() {
        let config = InstrumentationConfig::default().with_seed(77);
        let plan = plan(&one_function(2), &config);
        assert_eq!(plan.seed, 77);
        assert_eq!(seed_line(&plan, &config), "Using fixed instrumentation seed 77");
    }
}
