//! Shared-memory plumbing between the fuzzing harness and the instrumented target.
//!
//! The harness allocates a `MAP_SIZE` map with [`HarnessMap`] and publishes its id
//! in the environment. The target, before any instrumented code runs, maps the
//! same region with [`attach_from_env_var`] and publishes the address in
//! `__afl_area_ptr`. Without a published id the target runs with a detached map.

use std::sync::atomic::Ordering;

use anyhow::{Result, anyhow, ensure};
use libafl_bolts::shmem::{ShMem, ShMemProvider, StdShMemProvider};
use once_cell::sync::OnceCell;
use slog::{debug, info};

use crate::constants::{MAP_SIZE, SHM_ENV_VAR};
use crate::coverage::CoverageMap;
use crate::logging::logger;
use crate::runtime::{__afl_area_ptr, global_map};

type StdShMem = <StdShMemProvider as ShMemProvider>::ShMem;

/// The map attached from the environment. Mapped at most once per process.
static ATTACHED: OnceCell<CoverageMap> = OnceCell::new();

/// Publishes `map` as the process-wide coverage map.
pub fn attach(map: CoverageMap) {
    __afl_area_ptr.store(map.as_ptr(), Ordering::Relaxed);
}

/// Publishes a raw map pointer.
///
/// # Safety
///
/// See [`CoverageMap::from_raw`]; the region must outlive every thread that
/// records into it.
pub unsafe fn attach_raw(ptr: *mut u8) {
    attach(unsafe { CoverageMap::from_raw(ptr) });
}

/// Detaches the process-wide map; recording becomes a no-op.
pub fn detach() {
    attach(CoverageMap::detached());
}

/// Attaches the map the harness published in `__AFL_SHM_ID`.
pub fn attach_from_env() -> Result<Option<CoverageMap>> {
    attach_from_env_var(SHM_ENV_VAR)
}

/// Maps the shared coverage map whose id the harness stored in `env_name`.
///
/// Returns `Ok(None)` when the variable is not set, i.e. the target runs
/// outside a harness. The mapping is kept for the rest of the process: once a
/// map is attached, later calls republish that same map whatever `env_name`
/// they name. A failed attempt leaves nothing behind and may be retried.
pub fn attach_from_env_var(env_name: &str) -> Result<Option<CoverageMap>> {
    if let Some(&map) = ATTACHED.get() {
        attach(map);
        return Ok(Some(map));
    }
    if std::env::var_os(env_name).is_none() {
        debug!(logger(), "no shared coverage map published"; "env" => env_name);
        return Ok(None);
    }

    let &map = ATTACHED.get_or_try_init(|| map_from_env(env_name))?;
    attach(map);
    Ok(Some(map))
}

fn map_from_env(env_name: &str) -> Result<CoverageMap> {
    let mut provider = StdShMemProvider::new()
        .map_err(|e| anyhow!("Failed to init shared memory provider: {e}"))?;
    let shmem = provider
        .existing_from_env(env_name)
        .map_err(|e| anyhow!("Failed to map shared memory from {env_name}: {e}"))?;
    ensure!(
        shmem.len() >= MAP_SIZE,
        "Shared coverage map is {} bytes, expected at least {MAP_SIZE}",
        shmem.len()
    );

    // The mapping has to outlive every instrumented thread.
    let shmem: &'static mut StdShMem = Box::leak(Box::new(shmem));
    std::mem::forget(provider);

    let bytes: &mut [u8] = &mut *shmem;
    info!(logger(), "attached shared coverage map"; "env" => env_name, "size" => bytes.len());
    Ok(unsafe { CoverageMap::from_raw(bytes.as_mut_ptr()) })
}

/// Harness-side owner of a shared coverage map.
pub struct HarnessMap {
    shmem: StdShMem,
    _provider: StdShMemProvider,
}

impl HarnessMap {
    /// Allocates a zeroed `MAP_SIZE` shared map.
    pub fn new() -> Result<Self> {
        let mut provider = StdShMemProvider::new()
            .map_err(|e| anyhow!("Failed to init shared memory provider: {e}"))?;
        let mut shmem = provider
            .new_shmem(MAP_SIZE)
            .map_err(|e| anyhow!("Failed to allocate shared coverage map: {e}"))?;
        shmem.fill(0);
        Ok(Self {
            shmem,
            _provider: provider,
        })
    }

    /// Stores the map id in `env_name` so that child processes can attach it.
    pub fn publish(&self, env_name: &str) -> Result<()> {
        // SAFETY: sets a process environment variable; callers publish the map
        // before spawning children.
        unsafe { self.shmem.write_to_env(env_name) }
            .map_err(|e| anyhow!("Failed to publish shared coverage map in {env_name}: {e}"))
    }

    /// A handle usable by recorders in this process.
    pub fn map(&mut self) -> CoverageMap {
        let bytes: &mut [u8] = &mut self.shmem;
        unsafe { CoverageMap::from_raw(bytes.as_mut_ptr()) }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.shmem[..MAP_SIZE]
    }

    pub fn touched_slots(&self) -> Vec<usize> {
        self.as_slice()
            .iter()
            .enumerate()
            .filter_map(|(idx, &count)| (count > 0).then_some(idx))
            .collect()
    }

    /// Zeroes the map between two executions.
    pub fn clear(&mut self) {
        self.shmem.fill(0);
    }
}

/// Whether a map is currently published in `__afl_area_ptr`.
pub fn is_attached() -> bool {
    global_map().is_attached()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_env_var_leaves_map_detached() {
        let attached = attach_from_env_var("EIFUZZ_TEST_UNSET_SHM_ID").unwrap();
        assert_eq!(attached, None);
    }
}
