//! Run-time support for AFL-style instrumented fuzz targets.
//!
//! An external instrumentor inserts calls into this crate at chosen program
//! points. At run time they record:
//!
//! - **edge coverage**, as hit counters in a shared `MAP_SIZE` byte map indexed by
//!   `prev_loc ^ cur_loc` ([`coverage`]);
//! - **execution indexing**, a per-thread shadow stack of active call sites that
//!   disambiguates hits landing on the same map slot under different call paths
//!   ([`context`]), with a deterministic read wrapper so replays of the same input
//!   reproduce the same context states ([`read`]).
//!
//! ## Getting Started
//!
//! Instrumented C code links the `staticlib` and calls the `extern "C"` entry
//! points in [`runtime`]. Rust embedders can drive the same machinery directly:
//!
//! ```no_run
//! use eifuzz::context::CallContextFrame;
//! use eifuzz::runtime::with_thread_context;
//!
//! // 1. Attach the map the harness published in `__AFL_SHM_ID`.
//! eifuzz::shm::attach_from_env().unwrap();
//!
//! // 2. Record edges and bracket calls on the current thread.
//! with_thread_context(|ctx| {
//!     ctx.record_edge(0x1234);
//!     ctx.push_call(CallContextFrame::direct(0x0042, "parse_header"));
//!     ctx.record_edge(0x0777);
//!     ctx.pop_return();
//! });
//! ```
pub mod constants;
pub mod context;
pub mod coverage;
pub mod logging;
pub mod read;
pub mod runtime;
pub mod shm;

pub use constants::MAP_SIZE;
pub use context::{CallContextFrame, CallContextStack};
pub use coverage::{CoverageMap, CoverageRecorder, edge_id};
pub use read::{DeterministicReader, ReadEvent, ReadTrace};
pub use runtime::{ThreadContext, with_thread_context};

// re-export the logging crate so hosts can build a compatible logger
pub use slog;
