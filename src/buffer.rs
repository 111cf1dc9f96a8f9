use std::io;
use std::ptr::NonNull;

use log::{debug, warn};

use crate::error::DaqError;

const PAGE_ALIGN: usize = 4096;

/// Lifecycle of one DMA buffer. Transitions run strictly in the cycle
/// free -> posted -> filled -> processing -> free; anything else is a
/// protocol violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    Free,
    Posted,
    Filled,
    Processing,
}

/// One pinned host-memory region sized for a single DMA transfer.
///
/// The region is page-aligned and locked into physical memory so the card
/// can write it without page faults. The raw pointer is handed to the device
/// while the buffer is posted; the pool's state machine guarantees the
/// device and the demuxer never hold it at the same time.
#[derive(Debug)]
pub struct DmaBuffer {
    ptr: NonNull<u8>,
    len: usize,
    slot: usize,
    state: BufferState,
    locked: bool,
}

// The region is owned, fixed and page-locked; moving the handle between
// threads does not move the memory.
unsafe impl Send for DmaBuffer {}

impl DmaBuffer {
    fn alloc(slot: usize, len: usize) -> Result<Self, DaqError> {
        let mut raw: *mut libc::c_void = std::ptr::null_mut();
        let ret = unsafe { libc::posix_memalign(&mut raw, PAGE_ALIGN, len) };
        if ret != 0 || raw.is_null() {
            return Err(DaqError::ResourceExhausted(format!(
                "posix_memalign({len} bytes) failed: {}",
                io::Error::from_raw_os_error(ret)
            )));
        }
        // RLIMIT_MEMLOCK may forbid pinning; the buffer is still usable for a
        // simulated device, so degrade instead of failing the acquisition.
        let locked = unsafe { libc::mlock(raw, len) } == 0;
        if !locked {
            warn!(
                "mlock({len} bytes) failed for slot {slot}: {}; buffer left unpinned",
                io::Error::last_os_error()
            );
        }
        unsafe { std::ptr::write_bytes(raw as *mut u8, 0, len) };
        // null checked above
        let ptr = NonNull::new(raw as *mut u8).ok_or_else(|| {
            DaqError::ResourceExhausted("allocator returned null".into())
        })?;
        Ok(DmaBuffer {
            ptr,
            len,
            slot,
            state: BufferState::Free,
            locked,
        })
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn state(&self) -> BufferState {
        self.state
    }

    pub fn as_ptr(&mut self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for DmaBuffer {
    fn drop(&mut self) {
        unsafe {
            if self.locked {
                libc::munlock(self.ptr.as_ptr() as *const libc::c_void, self.len);
            }
            libc::free(self.ptr.as_ptr() as *mut libc::c_void);
        }
    }
}

/// Fixed pool of pinned DMA buffers with a cyclic posting protocol.
///
/// The pool owns every buffer for the whole acquisition. `destroy` releases
/// the pinned memory; it is idempotent so cleanup-on-error paths can call it
/// unconditionally.
#[derive(Debug)]
pub struct BufferPool {
    buffers: Vec<DmaBuffer>,
    next_free: usize,
    destroyed: bool,
}

impl BufferPool {
    pub fn allocate(count: usize, size: usize) -> Result<Self, DaqError> {
        if count == 0 || size == 0 {
            return Err(DaqError::Configuration(format!(
                "buffer pool needs count >= 1 and size >= 1, got {count} x {size}"
            )));
        }
        let mut buffers = Vec::with_capacity(count);
        for slot in 0..count {
            buffers.push(DmaBuffer::alloc(slot, size)?);
        }
        debug!("allocated {count} DMA buffers of {size} bytes");
        Ok(BufferPool {
            buffers,
            next_free: 0,
            destroyed: false,
        })
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Byte size of each buffer in the pool.
    pub fn buffer_len(&self) -> usize {
        self.buffers.first().map_or(0, |b| b.len())
    }

    pub fn state_of(&self, slot: usize) -> Option<BufferState> {
        self.buffers.get(slot).map(|b| b.state())
    }

    /// Next free buffer in round-robin slot order. Under the posting
    /// protocol a free buffer always exists when this is called; failure
    /// signals a logic error upstream, not a recoverable condition.
    pub fn acquire_free(&mut self) -> Result<usize, DaqError> {
        let n = self.buffers.len();
        for step in 0..n {
            let slot = (self.next_free + step) % n;
            if self.buffers[slot].state() == BufferState::Free {
                self.next_free = (slot + 1) % n;
                return Ok(slot);
            }
        }
        Err(DaqError::NoBufferAvailable)
    }

    pub fn mark_posted(&mut self, slot: usize) -> Result<(), DaqError> {
        self.transition(slot, BufferState::Free, BufferState::Posted)
    }

    pub fn mark_filled(&mut self, slot: usize) -> Result<(), DaqError> {
        self.transition(slot, BufferState::Posted, BufferState::Filled)
    }

    pub fn mark_processing(&mut self, slot: usize) -> Result<(), DaqError> {
        self.transition(slot, BufferState::Filled, BufferState::Processing)
    }

    pub fn release(&mut self, slot: usize) -> Result<(), DaqError> {
        self.transition(slot, BufferState::Processing, BufferState::Free)
    }

    fn transition(&mut self, slot: usize, from: BufferState, to: BufferState) -> Result<(), DaqError> {
        let buf = self
            .buffers
            .get_mut(slot)
            .ok_or(DaqError::NoBufferAvailable)?;
        if buf.state != from {
            return Err(DaqError::InvalidBufferState {
                slot,
                from: buf.state,
                to,
            });
        }
        buf.state = to;
        Ok(())
    }

    pub fn slot_ptr(&mut self, slot: usize) -> *mut u8 {
        self.buffers[slot].as_ptr()
    }

    pub fn slot_slice(&self, slot: usize) -> &[u8] {
        self.buffers[slot].as_slice()
    }

    /// Force every buffer back to free without processing. Only valid on the
    /// abort path, where posted and filled buffers are reclaimed wholesale.
    pub fn reclaim_all(&mut self) {
        for buf in &mut self.buffers {
            buf.state = BufferState::Free;
        }
        self.next_free = 0;
    }

    /// Counts of buffers per state, in free/posted/filled/processing order.
    pub fn state_counts(&self) -> [usize; 4] {
        let mut counts = [0usize; 4];
        for buf in &self.buffers {
            let idx = match buf.state() {
                BufferState::Free => 0,
                BufferState::Posted => 1,
                BufferState::Filled => 2,
                BufferState::Processing => 3,
            };
            counts[idx] += 1;
        }
        counts
    }

    /// Release all pinned memory. Exactly-once semantics; a second call is a
    /// no-op.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.buffers.clear();
        self.next_free = 0;
        self.destroyed = true;
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_follow_the_cycle() {
        let mut pool = BufferPool::allocate(2, 4096).unwrap();
        assert_eq!(pool.state_of(0), Some(BufferState::Free));

        pool.mark_posted(0).unwrap();
        pool.mark_filled(0).unwrap();
        pool.mark_processing(0).unwrap();
        pool.release(0).unwrap();
        assert_eq!(pool.state_of(0), Some(BufferState::Free));

        pool.destroy();
    }

    #[test]
    fn out_of_order_transition_is_rejected() {
        let mut pool = BufferPool::allocate(1, 4096).unwrap();
        match pool.mark_filled(0) {
            Err(DaqError::InvalidBufferState { slot: 0, from, to }) => {
                assert_eq!(from, BufferState::Free);
                assert_eq!(to, BufferState::Filled);
            }
            other => panic!("expected InvalidBufferState, got {other:?}"),
        }
        // a failed transition leaves the state untouched
        assert_eq!(pool.state_of(0), Some(BufferState::Free));
        pool.destroy();
    }

    #[test]
    fn acquire_free_is_round_robin() {
        let mut pool = BufferPool::allocate(3, 4096).unwrap();
        let a = pool.acquire_free().unwrap();
        pool.mark_posted(a).unwrap();
        let b = pool.acquire_free().unwrap();
        pool.mark_posted(b).unwrap();
        let c = pool.acquire_free().unwrap();
        pool.mark_posted(c).unwrap();
        assert_eq!((a, b, c), (0, 1, 2));
        assert!(matches!(
            pool.acquire_free(),
            Err(DaqError::NoBufferAvailable)
        ));
        pool.destroy();
    }

    #[test]
    fn states_partition_the_pool() {
        let mut pool = BufferPool::allocate(4, 4096).unwrap();
        pool.mark_posted(0).unwrap();
        pool.mark_posted(1).unwrap();
        pool.mark_filled(1).unwrap();
        pool.mark_posted(2).unwrap();
        pool.mark_filled(2).unwrap();
        pool.mark_processing(2).unwrap();

        let counts = pool.state_counts();
        assert_eq!(counts, [1, 1, 1, 1]);
        assert_eq!(counts.iter().sum::<usize>(), pool.len());
        pool.destroy();
    }

    #[test]
    fn destroy_is_idempotent_and_final() {
        let mut pool = BufferPool::allocate(2, 4096).unwrap();
        pool.destroy();
        assert!(pool.is_destroyed());
        assert_eq!(pool.len(), 0);
        pool.destroy();
        assert!(matches!(
            pool.acquire_free(),
            Err(DaqError::NoBufferAvailable)
        ));
        assert!(matches!(
            pool.mark_posted(0),
            Err(DaqError::NoBufferAvailable)
        ));
    }

    #[test]
    fn reclaim_returns_everything_to_free() {
        let mut pool = BufferPool::allocate(3, 4096).unwrap();
        pool.mark_posted(0).unwrap();
        pool.mark_posted(1).unwrap();
        pool.mark_filled(1).unwrap();
        pool.reclaim_all();
        assert_eq!(pool.state_counts(), [3, 0, 0, 0]);
        pool.destroy();
    }

    #[test]
    fn buffers_are_zeroed_and_writable() {
        let mut pool = BufferPool::allocate(1, 4096).unwrap();
        assert!(pool.slot_slice(0).iter().all(|&b| b == 0));
        let slice = unsafe { std::slice::from_raw_parts_mut(pool.slot_ptr(0), 4096) };
        slice[100] = 0xAB;
        assert_eq!(pool.slot_slice(0)[100], 0xAB);
        pool.destroy();
    }
}
