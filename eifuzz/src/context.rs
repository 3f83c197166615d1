//! Execution indexing: a per-thread shadow stack of active call sites.
//!
//! The instrumentor brackets every call instruction with a push before the call
//! and a pop after it returns. The frames on the stack at any instant describe
//! the call path leading to the current execution point, which lets an observer
//! tell apart two coverage hits that share a map slot but happened under
//! different calling contexts.

use std::borrow::Cow;

use serde::Serialize;

use crate::constants::MAP_MASK;

/// One active call: the call-site id assigned at instrumentation time and the
/// statically known callee name (`None` for indirect calls).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct CallContextFrame {
    pub call_site_id: u32,
    pub callee: Option<Cow<'static, str>>,
}

impl CallContextFrame {
    pub fn new(call_site_id: u32, callee: Option<Cow<'static, str>>) -> Self {
        Self {
            call_site_id: call_site_id & MAP_MASK as u32,
            callee,
        }
    }

    /// Frame for a call whose target is known statically.
    pub fn direct(call_site_id: u32, callee: &'static str) -> Self {
        Self::new(call_site_id, Some(Cow::Borrowed(callee)))
    }

    /// Frame for a call whose target cannot be determined statically.
    pub fn indirect(call_site_id: u32) -> Self {
        Self::new(call_site_id, None)
    }
}

/// The shadow stack of one thread of control. Push/pop only.
///
/// A call that never returns normally (the callee exits the process, or a
/// panic unwinds through the bracket) leaves its frame behind. That imbalance
/// is kept as is; [`CallContextStack::clear`] restores a clean state.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CallContextStack {
    frames: Vec<CallContextFrame>,
}

impl CallContextStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame: CallContextFrame) {
        self.frames.push(frame);
    }

    /// Pops the innermost frame. Popping an empty stack is ignored.
    pub fn pop(&mut self) -> Option<CallContextFrame> {
        self.frames.pop()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Active frames, outermost first.
    pub fn frames(&self) -> &[CallContextFrame] {
        &self.frames
    }

    pub fn top(&self) -> Option<&CallContextFrame> {
        self.frames.last()
    }

    pub fn snapshot(&self) -> Vec<CallContextFrame> {
        self.frames.clone()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    /// Order-sensitive digest of the active call-site ids, folded into
    /// `[0, MAP_SIZE)` the same way edge ids are, so `a -> b` and `b -> a`
    /// produce different values.
    pub fn fingerprint(&self) -> u32 {
        self.frames
            .iter()
            .fold(0u32, |acc, frame| (acc >> 1) ^ frame.call_site_id)
            & MAP_MASK as u32
    }

    /// Runs `call` bracketed by a push of `frame` and a pop after it returns.
    ///
    /// The pop only happens on a normal return. If `call` unwinds, the frame
    /// stays on the stack, matching the behaviour of the inserted call sites.
    pub fn bracket<R>(&mut self, frame: CallContextFrame, call: impl FnOnce(&mut Self) -> R) -> R {
        self.push(frame);
        let ret = call(self);
        self.pop();
        ret
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(stack: &CallContextStack) -> Vec<u32> {
        stack.frames().iter().map(|f| f.call_site_id).collect()
    }

    #[test]
    fn push_pop_is_lifo() {
        let mut stack = CallContextStack::new();
        stack.push(CallContextFrame::direct(1, "parse"));
        stack.push(CallContextFrame::indirect(2));
        assert_eq!(stack.depth(), 2);
        assert_eq!(stack.top(), Some(&CallContextFrame::indirect(2)));
        assert_eq!(stack.pop(), Some(CallContextFrame::indirect(2)));
        assert_eq!(stack.pop(), Some(CallContextFrame::direct(1, "parse")));
        assert!(stack.is_empty());
    }

    #[test]
    fn pop_on_empty_stack_is_ignored() {
        let mut stack = CallContextStack::new();
        assert_eq!(stack.pop(), None);
        assert_eq!(stack.depth(), 0);
    }

    #[test]
    fn call_site_ids_are_folded_into_map_range() {
        let frame = CallContextFrame::indirect(u32::MAX);
        assert_eq!(frame.call_site_id, MAP_MASK as u32);
    }

    #[test]
    fn nested_and_sibling_calls_stay_balanced() {
        let mut stack = CallContextStack::new();
        stack.push(CallContextFrame::direct(7, "main"));
        let before = stack.depth();

        stack.bracket(CallContextFrame::direct(100, "outer"), |s| {
            assert_eq!(ids(s), vec![7, 100]);
            s.bracket(CallContextFrame::direct(200, "middle"), |s| {
                assert_eq!(ids(s), vec![7, 100, 200]);
                s.bracket(CallContextFrame::indirect(300), |s| {
                    assert_eq!(ids(s), vec![7, 100, 200, 300]);
                    assert_eq!(s.top().and_then(|f| f.callee.clone()), None);
                });
                assert_eq!(ids(s), vec![7, 100, 200]);
            });
            // sibling of `middle`
            s.bracket(CallContextFrame::direct(201, "sibling"), |s| {
                assert_eq!(ids(s), vec![7, 100, 201]);
            });
            assert_eq!(ids(s), vec![7, 100]);
        });

        assert_eq!(stack.depth(), before);
        assert_eq!(ids(&stack), vec![7]);
    }

    #[test]
    fn bracket_passes_return_value_through() {
        let mut stack = CallContextStack::new();
        let ret = stack.bracket(CallContextFrame::direct(5, "len"), |_| "abc".len());
        assert_eq!(ret, 3);
        assert!(stack.is_empty());
    }

    #[test]
    fn unwinding_call_leaves_frame_behind() {
        let mut stack = CallContextStack::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            stack.bracket(CallContextFrame::direct(9, "abort_like"), |_| panic!("boom"))
        }));
        assert!(result.is_err());
        assert_eq!(ids(&stack), vec![9]);
        stack.clear();
        assert!(stack.is_empty());
    }

    #[test]
    fn fingerprint_is_order_sensitive() {
        let mut ab = CallContextStack::new();
        ab.push(CallContextFrame::indirect(0x10));
        ab.push(CallContextFrame::indirect(0x2000));

        let mut ba = CallContextStack::new();
        ba.push(CallContextFrame::indirect(0x2000));
        ba.push(CallContextFrame::indirect(0x10));

        assert_ne!(ab.fingerprint(), ba.fingerprint());
        assert_eq!(CallContextStack::new().fingerprint(), 0);
    }
}
