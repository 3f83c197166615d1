//! Turns the program points chosen by the instrumentor into fixed labels.
//!
//! The instrumentor decides *where* recording calls go; this module decides
//! *what* they carry. It performs the following steps:
//! 1. For every program point, in program order, draw a sampling decision and,
//!    if kept, a block label.
//! 2. When execution indexing is enabled, draw a call-site id for every call
//!    site and mark calls to the read primitive for interception.
//!
//! All blocks are labelled before any call site, so the label assignment of a
//! build does not depend on whether execution indexing is on.

use eifuzz::constants::READ_PRIMITIVE_NAME;
use serde::{Deserialize, Serialize};
use slog::debug;

use crate::config::InstrumentationConfig;
use crate::labels::{BlockLabel, CallSiteId, LabelSource, SamplingRatio};
use crate::logger;

/// The program points of one function, as reported by the instrumentor.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionSites {
    pub name: String,
    /// Number of program points (basic-block entries) in the function.
    pub blocks: usize,
    /// Call instructions, in program order.
    pub call_sites: Vec<CallSite>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSite {
    /// The statically known callee, `None` for indirect calls.
    pub callee: Option<String>,
}

impl CallSite {
    pub fn direct(callee: &str) -> Self {
        Self {
            callee: Some(callee.to_string()),
        }
    }

    pub fn indirect() -> Self {
        Self { callee: None }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramSites {
    pub functions: Vec<FunctionSites>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSitePlan {
    pub id: CallSiteId,
    pub callee: Option<String>,
    /// The call goes to `__afl_ei_fread` instead of the read primitive.
    pub intercept_read: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionPlan {
    pub name: String,
    /// One entry per program point; `None` when sampling skipped it.
    pub blocks: Vec<Option<BlockLabel>>,
    /// Empty when execution indexing is disabled.
    pub call_sites: Vec<CallSitePlan>,
}

/// The fixed label assignment for one build.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentationPlan {
    pub seed: u64,
    pub ratio: SamplingRatio,
    pub functions: Vec<FunctionPlan>,
}

impl InstrumentationPlan {
    pub fn instrumented_locations(&self) -> usize {
        self.blocks().filter(|label| label.is_some()).count()
    }

    pub fn skipped_locations(&self) -> usize {
        self.blocks().filter(|label| label.is_none()).count()
    }

    pub fn call_sites(&self) -> usize {
        self.functions.iter().map(|f| f.call_sites.len()).sum()
    }

    pub fn read_interceptions(&self) -> usize {
        self.functions
            .iter()
            .flat_map(|f| &f.call_sites)
            .filter(|site| site.intercept_read)
            .count()
    }

    pub fn function(&self, name: &str) -> Option<&FunctionPlan> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// Label of program point `block` in function `name`, if it was kept.
    pub fn label(&self, name: &str, block: usize) -> Option<BlockLabel> {
        self.function(name)?.blocks.get(block).copied().flatten()
    }

    fn blocks(&self) -> impl Iterator<Item = &Option<BlockLabel>> {
        self.functions.iter().flat_map(|f| &f.blocks)
    }
}

/// Plans `sites` with the settings in `config`.
///
/// Uses `config.seed` when set, a fresh seed otherwise; the seed ends up in the
/// returned plan either way.
pub fn plan(sites: &ProgramSites, config: &InstrumentationConfig) -> InstrumentationPlan {
    let mut source = match config.seed {
        Some(seed) => LabelSource::from_seed(seed),
        None => LabelSource::from_entropy(),
    };
    plan_with(sites, config, &mut source)
}

/// Plans `sites` drawing from an existing label source.
pub fn plan_with(
    sites: &ProgramSites,
    config: &InstrumentationConfig,
    source: &mut LabelSource,
) -> InstrumentationPlan {
    let mut functions: Vec<FunctionPlan> = sites
        .functions
        .iter()
        .map(|function| FunctionPlan {
            name: function.name.clone(),
            blocks: (0..function.blocks)
                .map(|_| {
                    source
                        .should_instrument(config.ratio)
                        .then(|| source.next_label())
                })
                .collect(),
            call_sites: Vec::new(),
        })
        .collect();

    if config.execution_indexing {
        for (function, plan) in sites.functions.iter().zip(functions.iter_mut()) {
            plan.call_sites = function
                .call_sites
                .iter()
                .map(|site| CallSitePlan {
                    id: source.next_call_site_id(),
                    callee: site.callee.clone(),
                    intercept_read: site.callee.as_deref() == Some(READ_PRIMITIVE_NAME),
                })
                .collect();
        }
    }

    let plan = InstrumentationPlan {
        seed: source.seed(),
        ratio: config.ratio,
        functions,
    };
    debug!(logger(), "planned instrumentation";
        "seed" => plan.seed,
        "locations" => plan.instrumented_locations(),
        "skipped" => plan.skipped_locations(),
        "call_sites" => plan.call_sites());
    plan
}
