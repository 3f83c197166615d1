//! Per-thread execution context and the entry points called by instrumented code.
//!
//! The instrumentor inserts calls to the `extern "C"` functions below:
//! - `__afl_trace_edge(cur_loc)` at every sampled program point,
//! - `__afl_ei_push_call(site, callee)` / `__afl_ei_pop_return()` around every call,
//! - `__afl_ei_fread(..)` in place of the target's `fread`.
//!
//! Each thread gets its own [`ThreadContext`] (previous-location register and
//! shadow stack). The coverage map is process-wide and published in
//! `__afl_area_ptr`.

use std::cell::RefCell;
use std::ffi::{CStr, c_char, c_void};
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

use libc::{FILE, size_t};
use slog::warn;

use crate::context::{CallContextFrame, CallContextStack};
use crate::coverage::{CoverageMap, CoverageRecorder};
use crate::logging::logger;
use crate::read::read_frame;
use crate::shm;

/// Address of the shared coverage map, null while no map is attached.
///
/// `AtomicPtr<u8>` has the same layout as `*mut u8`, so instrumented code can
/// load it as a plain pointer.
#[allow(non_upper_case_globals)]
#[unsafe(no_mangle)]
pub static __afl_area_ptr: AtomicPtr<u8> = AtomicPtr::new(ptr::null_mut());

/// The coverage map currently published in `__afl_area_ptr`.
pub fn global_map() -> CoverageMap {
    unsafe { CoverageMap::from_raw(__afl_area_ptr.load(Ordering::Relaxed)) }
}

/// The state one thread of control needs to record coverage and call context.
#[derive(Debug, Default)]
pub struct ThreadContext {
    recorder: CoverageRecorder,
    stack: CallContextStack,
}

impl ThreadContext {
    pub fn new(map: CoverageMap) -> Self {
        Self {
            recorder: CoverageRecorder::new(map),
            stack: CallContextStack::new(),
        }
    }

    pub fn recorder(&self) -> &CoverageRecorder {
        &self.recorder
    }

    pub fn recorder_mut(&mut self) -> &mut CoverageRecorder {
        &mut self.recorder
    }

    pub fn stack(&self) -> &CallContextStack {
        &self.stack
    }

    pub fn stack_mut(&mut self) -> &mut CallContextStack {
        &mut self.stack
    }

    pub fn record_edge(&mut self, cur_loc: u32) {
        self.recorder.record(cur_loc);
    }

    pub fn push_call(&mut self, frame: CallContextFrame) {
        self.stack.push(frame);
    }

    pub fn pop_return(&mut self) -> Option<CallContextFrame> {
        self.stack.pop()
    }

    /// Restores the thread-start state: register 0, empty stack.
    pub fn reset(&mut self) {
        self.recorder.reset();
        self.stack.clear();
    }
}

thread_local! {
    static THREAD_CONTEXT: RefCell<ThreadContext> = RefCell::new(ThreadContext::new(global_map()));
}

/// Runs `f` on the calling thread's context.
///
/// The context follows `__afl_area_ptr`, so a map attached after the thread
/// started is picked up on the next call.
///
/// # Panics
///
/// Panics if called re-entrantly from inside `f`, or during thread teardown.
pub fn with_thread_context<R>(f: impl FnOnce(&mut ThreadContext) -> R) -> R {
    THREAD_CONTEXT.with(|ctx| {
        let mut ctx = ctx.borrow_mut();
        sync_map(&mut ctx);
        f(&mut ctx)
    })
}

/// Like [`with_thread_context`], but gives up instead of panicking. Used by the
/// `extern "C"` entry points, which must never unwind into instrumented code.
fn try_with_thread_context<R>(f: impl FnOnce(&mut ThreadContext) -> R) -> Option<R> {
    THREAD_CONTEXT
        .try_with(|ctx| {
            let mut ctx = ctx.try_borrow_mut().ok()?;
            sync_map(&mut ctx);
            Some(f(&mut ctx))
        })
        .ok()
        .flatten()
}

#[inline(always)]
fn sync_map(ctx: &mut ThreadContext) {
    let map = global_map();
    if ctx.recorder.map() != map {
        ctx.recorder.set_map(map);
    }
}

/// Attaches the harness' coverage map named by `__AFL_SHM_ID`, if any.
///
/// Failures are logged and leave the map detached: recording then silently
/// does nothing.
#[unsafe(no_mangle)]
pub extern "C" fn __afl_ei_init() {
    if let Err(err) = shm::attach_from_env() {
        warn!(logger(), "coverage map not attached, recording disabled"; "error" => %err);
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn __afl_trace_edge(cur_loc: u32) {
    try_with_thread_context(|ctx| ctx.record_edge(cur_loc));
}

/// Pushes a call frame.
///
/// # Safety
///
/// `callee` is either null (indirect call) or a NUL-terminated string that
/// lives for the rest of the process, such as a string constant emitted by the
/// instrumentor.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn __afl_ei_push_call(call_site_id: u32, callee: *const c_char) {
    let callee = if callee.is_null() {
        None
    } else {
        let name: &'static CStr = unsafe { CStr::from_ptr(callee) };
        Some(name.to_string_lossy())
    };
    try_with_thread_context(|ctx| ctx.push_call(CallContextFrame::new(call_site_id, callee)));
}

#[unsafe(no_mangle)]
pub extern "C" fn __afl_ei_pop_return() {
    try_with_thread_context(|ctx| ctx.pop_return());
}

/// Drop-in replacement for `fread`, bracketed like a call site.
///
/// # Safety
///
/// Same contract as `fread(3)`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn __afl_ei_fread(
    ptr: *mut c_void,
    size: size_t,
    nmemb: size_t,
    stream: *mut FILE,
) -> size_t {
    try_with_thread_context(|ctx| ctx.push_call(read_frame()));
    let read = unsafe { libc::fread(ptr, size, nmemb, stream) };
    try_with_thread_context(|ctx| ctx.pop_return());
    read
}
