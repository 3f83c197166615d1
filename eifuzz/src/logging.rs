//! Process-wide structured logger.
//!
//! The runtime lives inside someone else's process, so it stays silent until the
//! host installs a logger with [`set_logger`].

use once_cell::sync::OnceCell;
use slog::{Discard, Logger, o};

static LOGGER: OnceCell<Logger> = OnceCell::new();

/// Installs the logger used by the runtime and the preparation phase.
/// Returns `false` if a logger was already installed (or already used).
pub fn set_logger(logger: Logger) -> bool {
    LOGGER.set(logger).is_ok()
}

pub fn logger() -> &'static Logger {
    LOGGER.get_or_init(|| Logger::root(Discard, o!()))
}
