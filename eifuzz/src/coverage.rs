//! Edge coverage recording.
//!
//! Every instrumented program point carries a fixed label `cur_loc`. When control
//! reaches it, the recorder computes the edge id `prev_loc ^ cur_loc`, bumps the
//! matching byte of the shared coverage map and remembers `cur_loc >> 1` as the
//! new previous location:
//! ```text
//!   edge_id = prev_loc ^ cur_loc;
//!   shared_mem[edge_id]++;
//!   prev_loc = cur_loc >> 1;
//! ```
//! Storing the shifted label keeps `A -> B` and `B -> A` apart and stops a block
//! that runs twice in a row from collapsing to slot 0.

use std::ptr;

use crate::constants::{MAP_MASK, MAP_SIZE};

/// A handle to the shared coverage map.
///
/// The map is `MAP_SIZE` bytes owned by someone else (normally the fuzzing
/// harness, through shared memory). The handle never allocates or frees it.
/// A detached handle (null pointer) turns every update into a no-op.
///
/// Updates are plain loads and stores with no synchronization. Concurrent
/// increments of one slot may lose counts, which only understates hit counts:
/// a touched slot still becomes non-zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CoverageMap {
    ptr: *mut u8,
}

// The map is shared by every thread of the target by construction.
unsafe impl Send for CoverageMap {}
unsafe impl Sync for CoverageMap {}

impl CoverageMap {
    /// A handle that is not attached to any map.
    pub const fn detached() -> Self {
        Self {
            ptr: ptr::null_mut(),
        }
    }

    /// Wraps a raw map pointer. A null pointer yields a detached handle.
    ///
    /// # Safety
    ///
    /// A non-null `ptr` must point to at least `MAP_SIZE` writable bytes that
    /// stay valid for as long as this handle, or any copy of it, is used.
    pub const unsafe fn from_raw(ptr: *mut u8) -> Self {
        Self { ptr }
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    pub fn is_attached(&self) -> bool {
        !self.ptr.is_null()
    }

    /// Increments the counter for `edge_id`, wrapping at 256.
    #[inline(always)]
    pub fn hit(&self, edge_id: usize) {
        if self.ptr.is_null() {
            return;
        }
        unsafe {
            let entry = self.ptr.add(edge_id & MAP_MASK);
            *entry = (*entry).wrapping_add(1);
        }
    }

    /// Reads the counter for `edge_id`, or `None` when detached.
    pub fn slot(&self, edge_id: usize) -> Option<u8> {
        if self.ptr.is_null() {
            return None;
        }
        Some(unsafe { *self.ptr.add(edge_id & MAP_MASK) })
    }

    /// Indices of all non-zero slots, in ascending order.
    pub fn touched_slots(&self) -> Vec<usize> {
        (0..MAP_SIZE)
            .filter(|&idx| self.slot(idx).is_some_and(|count| count > 0))
            .collect()
    }

    /// Zeroes the whole map.
    pub fn clear(&self) {
        if self.ptr.is_null() {
            return;
        }
        unsafe { ptr::write_bytes(self.ptr, 0, MAP_SIZE) };
    }
}

impl Default for CoverageMap {
    fn default() -> Self {
        Self::detached()
    }
}

/// Combines the previous location and the current label into a map index.
#[inline(always)]
pub const fn edge_id(prev_loc: u32, cur_loc: u32) -> usize {
    ((prev_loc ^ cur_loc) as usize) & MAP_MASK
}

/// Records edges into a [`CoverageMap`] for one thread of control.
///
/// The recorder owns that thread's previous-location register, so edges from
/// different threads are never stitched into a false edge.
#[derive(Debug, Default)]
pub struct CoverageRecorder {
    map: CoverageMap,
    prev_loc: u32,
}

impl CoverageRecorder {
    pub fn new(map: CoverageMap) -> Self {
        Self { map, prev_loc: 0 }
    }

    pub fn map(&self) -> CoverageMap {
        self.map
    }

    /// Points the recorder at another map (e.g. once the harness attached one).
    pub fn set_map(&mut self, map: CoverageMap) {
        self.map = map;
    }

    pub fn prev_loc(&self) -> u32 {
        self.prev_loc
    }

    /// Records the traversal of the edge ending at the block labelled `cur_loc`.
    ///
    /// With a detached map the call is skipped entirely, register included.
    #[inline(always)]
    pub fn record(&mut self, cur_loc: u32) {
        if !self.map.is_attached() {
            return;
        }
        let cur_loc = cur_loc & MAP_MASK as u32;
        self.map.hit(edge_id(self.prev_loc, cur_loc));
        self.prev_loc = cur_loc >> 1;
    }

    /// Puts the register back into its thread-start state.
    pub fn reset(&mut self) {
        self.prev_loc = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heap_map() -> (Box<[u8]>, CoverageMap) {
        let mut buf = vec![0u8; MAP_SIZE].into_boxed_slice();
        let map = unsafe { CoverageMap::from_raw(buf.as_mut_ptr()) };
        (buf, map)
    }

    #[test]
    fn edge_id_is_xor_of_locations() {
        assert_eq!(edge_id(0, 0x1234), 0x1234);
        assert_eq!(edge_id(0x00ff, 0xff00), 0xffff);
        assert_eq!(edge_id(0x1234, 0x1234), 0);
    }

    #[test]
    fn first_edge_uses_zero_prev_loc() {
        let (buf, map) = heap_map();
        let mut recorder = CoverageRecorder::new(map);
        recorder.record(0x4242);
        assert_eq!(buf[0x4242], 1);
        assert_eq!(recorder.prev_loc(), 0x4242 >> 1);
    }

    #[test]
    fn slot_increments_by_one_per_traversal() {
        let (buf, map) = heap_map();
        let mut recorder = CoverageRecorder::new(map);
        let (a, b) = (0x0a0a, 0x1337);
        let ab = edge_id(a >> 1, b);

        for expected in 1..=5u8 {
            recorder.reset();
            recorder.record(a);
            recorder.record(b);
            assert_eq!(buf[ab], expected);
        }
    }

    #[test]
    fn counters_wrap_past_255() {
        let (buf, map) = heap_map();
        let mut recorder = CoverageRecorder::new(map);
        for _ in 0..256 {
            recorder.reset();
            recorder.record(7);
        }
        assert_eq!(buf[7], 0);
        recorder.reset();
        recorder.record(7);
        assert_eq!(buf[7], 1);
    }

    #[test]
    fn self_loop_does_not_land_on_slot_zero() {
        let (buf, map) = heap_map();
        let mut recorder = CoverageRecorder::new(map);
        let label = 0x0f0f;

        recorder.record(label);
        assert_eq!(recorder.prev_loc(), label >> 1);
        recorder.record(label);
        assert_eq!(recorder.prev_loc(), label >> 1);

        assert_eq!(buf[0], 0);
        assert_eq!(buf[edge_id(label >> 1, label)], 1);
    }

    #[test]
    fn detached_map_is_a_no_op() {
        let mut recorder = CoverageRecorder::new(CoverageMap::detached());
        recorder.record(0x1111);
        recorder.record(0x2222);
        assert_eq!(recorder.prev_loc(), 0);
        assert_eq!(recorder.map().slot(0x1111), None);
        assert!(recorder.map().touched_slots().is_empty());
    }

    #[test]
    fn touched_slots_and_clear() {
        let (_buf, map) = heap_map();
        map.hit(3);
        map.hit(MAP_SIZE + 9);
        assert_eq!(map.touched_slots(), vec![3, 9]);
        map.clear();
        assert!(map.touched_slots().is_empty());
    }
}
