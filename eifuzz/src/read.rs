//! Deterministic input reads.
//!
//! When execution indexing is enabled, the target's buffered reads are routed
//! through a wrapper that behaves exactly like the wrapped read (same bytes, same
//! buffer placement, same return value) but is itself bracketed like a call
//! site. Replaying the same input then reproduces the same sequence of
//! context-stack states at every point where input is consumed.

use std::io::{self, Read};

use serde::Serialize;

use crate::constants::{READ_CALL_SITE_ID, READ_PRIMITIVE_NAME};
use crate::context::{CallContextFrame, CallContextStack};
use crate::runtime::with_thread_context;

/// One observed read: how many bytes it returned and the call path it ran under.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReadEvent {
    pub consumed: usize,
    pub context: Vec<CallContextFrame>,
}

/// Ordered log of the reads seen by a [`DeterministicReader`].
pub type ReadTrace = Vec<ReadEvent>;

/// The frame pushed around every intercepted read.
pub fn read_frame() -> CallContextFrame {
    CallContextFrame::direct(READ_CALL_SITE_ID, READ_PRIMITIVE_NAME)
}

/// Runs `read` bracketed by the read frame on `stack`.
///
/// The context is captured while the frame is pushed, i.e. the recorded state is
/// the one in effect at the moment of consumption.
pub fn bracket_read<T>(
    stack: &mut CallContextStack,
    read: impl FnOnce() -> T,
    consumed: impl Fn(&T) -> usize,
    trace: Option<&mut ReadTrace>,
) -> T {
    stack.bracket(read_frame(), |stack| {
        let ret = read();
        if let Some(trace) = trace {
            trace.push(ReadEvent {
                consumed: consumed(&ret),
                context: stack.snapshot(),
            });
        }
        ret
    })
}

/// A [`Read`] adapter that brackets every read of the inner reader.
///
/// Used through [`Read`], it brackets on the calling thread's context. Embedders
/// that manage their own [`CallContextStack`] use [`DeterministicReader::read_in`].
#[derive(Debug)]
pub struct DeterministicReader<R> {
    inner: R,
    trace: Option<ReadTrace>,
}

impl<R: Read> DeterministicReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, trace: None }
    }

    /// Like [`DeterministicReader::new`], also recording every read.
    pub fn with_trace(inner: R) -> Self {
        Self {
            inner,
            trace: Some(ReadTrace::new()),
        }
    }

    pub fn trace(&self) -> Option<&ReadTrace> {
        self.trace.as_ref()
    }

    pub fn take_trace(&mut self) -> Option<ReadTrace> {
        self.trace.as_mut().map(std::mem::take)
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Reads into `buf` bracketed on an explicit context stack.
    pub fn read_in(&mut self, stack: &mut CallContextStack, buf: &mut [u8]) -> io::Result<usize> {
        let inner = &mut self.inner;
        bracket_read(
            stack,
            || inner.read(buf),
            |ret: &io::Result<usize>| *ret.as_ref().unwrap_or(&0),
            self.trace.as_mut(),
        )
    }
}

impl<R: Read> Read for DeterministicReader<R> {
    // The thread context is not borrowed while the inner read runs, so the
    // inner reader may itself be instrumented.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        with_thread_context(|ctx| ctx.stack_mut().push(read_frame()));
        let ret = self.inner.read(buf);
        with_thread_context(|ctx| {
            if let Some(trace) = self.trace.as_mut() {
                trace.push(ReadEvent {
                    consumed: *ret.as_ref().unwrap_or(&0),
                    context: ctx.stack().snapshot(),
                });
            }
            ctx.stack_mut().pop();
        });
        ret
    }
}
