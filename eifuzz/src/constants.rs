//! This module defines constants shared between the instrumentor and the runtime.
//! These constants are related to the AFL-style coverage map, the execution
//! indexing entry points, and the handshake with the external fuzzing harness.

/// Log2 of [`MAP_SIZE`].
pub const MAP_SIZE_POW2: u32 = 16;

/// The size of the shared memory map used for AFL-style coverage tracking.
/// This value (2^16) is standard for AFL. Block labels and call-site ids are
/// drawn from `[0, MAP_SIZE)`, so the instrumentor and the runtime must agree on it.
pub const MAP_SIZE: usize = 1 << MAP_SIZE_POW2;

/// Mask that folds any index into `[0, MAP_SIZE)`.
pub const MAP_MASK: usize = MAP_SIZE - 1;

/// The environment variable through which the harness publishes the shared
/// memory id of the coverage map.
pub const SHM_ENV_VAR: &str = "__AFL_SHM_ID";

/// The name of the buffered read primitive that is routed through
/// [`crate::read::DeterministicReader`] when execution indexing is enabled.
pub const READ_PRIMITIVE_NAME: &str = "fread";

/// Call-site id under which the read wrapper brackets the intercepted read.
/// The instrumentor pushes the real call-site id before the wrapper runs, so
/// every intercepted read shows up as two frames: the call site, then this one.
pub const READ_CALL_SITE_ID: u32 = 0;
