//! Preparation phase for `eifuzz` instrumented builds.
//!
//! The external instrumentor reports the program points and call sites it
//! wants to instrument; this crate assigns each of them a fixed random label
//! (or skips it, according to the sampling ratio) before any code is emitted:
//!
//! ```no_run
//! use instrumentation::config::InstrumentationConfig;
//! use instrumentation::plan::{CallSite, FunctionSites, ProgramSites, plan};
//! use instrumentation::report::report;
//!
//! let config = InstrumentationConfig::from_env().expect("invalid instrumentation settings");
//! let sites = ProgramSites {
//!     functions: vec![FunctionSites {
//!         name: "main".to_string(),
//!         blocks: 3,
//!         call_sites: vec![CallSite::direct("fread")],
//!     }],
//! };
//! let plan = plan(&sites, &config);
//! report(&plan, &config);
//! ```
pub mod config;
pub mod labels;
pub mod plan;
pub mod report;

pub use eifuzz::MAP_SIZE;
pub use eifuzz::logging::{logger, set_logger};
