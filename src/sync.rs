//! CPU/GPU synchronization over a monotonic fence timeline.
//!
//! Every submission is paired with a fence value from a strictly increasing
//! counter. Waiting on a value blocks until the queue has retired the
//! submission that carries it; values at or below the completed watermark
//! return immediately. [`TrackedBuffer`] uses the same timeline to refuse
//! host writes to buffers the GPU may still be reading.

use std::cell::Cell;
use std::collections::VecDeque;
use std::time::Duration;

use crate::error::{Error, Result};

/// Upper bound on a blocking fence wait. A device that stops making
/// progress surfaces as a poll error instead of an unrecoverable hang.
const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Fence bookkeeping, generic over the queue's submission handle so the
/// ordering rules are testable without a device.
#[derive(Debug, Default)]
pub struct FenceCore<S> {
    last_signaled: u64,
    completed: u64,
    pending: VecDeque<(u64, S)>,
}

impl<S> FenceCore<S> {
    pub fn new() -> Self {
        Self {
            last_signaled: 0,
            completed: 0,
            pending: VecDeque::new(),
        }
    }

    /// Associates the next fence value with a submission. Values start at 1
    /// and never repeat.
    pub fn signal(&mut self, submission: S) -> u64 {
        self.last_signaled += 1;
        self.pending.push_back((self.last_signaled, submission));
        self.last_signaled
    }

    pub fn completed_value(&self) -> u64 {
        self.completed
    }

    pub fn last_signaled(&self) -> u64 {
        self.last_signaled
    }

    /// Whether work up to `target` has already been observed complete.
    pub fn is_retired(&self, target: u64) -> bool {
        target <= self.completed
    }

    /// Resolves a wait request without touching the timeline: `None` when
    /// the target already retired, otherwise the submission handle the
    /// caller must block on. The target only retires through [`retire`]
    /// once that block has actually succeeded.
    ///
    /// [`retire`]: FenceCore::retire
    pub fn wait_plan(&self, target: u64) -> Result<Option<&S>> {
        if target <= self.completed {
            return Ok(None);
        }
        if target > self.last_signaled {
            return Err(Error::WaitTargetNotSignaled {
                target,
                last_signaled: self.last_signaled,
            });
        }
        Ok(self.pending.iter().find(|(value, _)| *value == target).map(|(_, s)| s))
    }

    /// Records that work up to `target` has been observed complete.
    /// Retiring a value retires everything signaled before it, so earlier
    /// pending entries are dropped alongside.
    pub fn retire(&mut self, target: u64) {
        while let Some((value, submission)) = self.pending.pop_front() {
            if value > target {
                self.pending.push_front((value, submission));
                break;
            }
        }
        if target > self.completed {
            self.completed = target;
        }
    }
}

/// Fence timeline bound to a wgpu queue.
pub struct FenceSync {
    core: FenceCore<wgpu::SubmissionIndex>,
}

impl FenceSync {
    pub fn new() -> Self {
        Self {
            core: FenceCore::new(),
        }
    }

    /// Signals the fence for a submission just handed to the queue and
    /// returns its fence value.
    pub fn signal(&mut self, submission: wgpu::SubmissionIndex) -> u64 {
        self.core.signal(submission)
    }

    pub fn completed_value(&self) -> u64 {
        self.core.completed_value()
    }

    pub fn is_retired(&self, target: u64) -> bool {
        self.core.is_retired(target)
    }

    /// Blocks until the submission carrying `target` has retired, bounded
    /// by [`WAIT_TIMEOUT`]. Returns immediately when the target is already
    /// past. The timeline only advances once the device confirms the wait;
    /// a poll failure leaves the target unretired.
    pub fn wait_until(&mut self, device: &wgpu::Device, target: u64) -> Result<()> {
        let submission = match self.core.wait_plan(target)? {
            None => return Ok(()),
            Some(submission) => submission.clone(),
        };
        device.poll(wgpu::PollType::Wait {
            submission_index: Some(submission),
            timeout: Some(WAIT_TIMEOUT),
        })?;
        self.core.retire(target);
        Ok(())
    }

    /// Drains the queue: submits an empty batch behind everything pending
    /// and blocks until it retires. Used after the initial acceleration
    /// structure build, before any dependent resource is created.
    pub fn flush_all(&mut self, device: &wgpu::Device, queue: &wgpu::Queue) -> Result<()> {
        let submission = queue.submit(std::iter::empty());
        let target = self.core.signal(submission);
        self.wait_until(device, target)
    }
}

impl Default for FenceSync {
    fn default() -> Self {
        Self::new()
    }
}

/// A buffer whose host writes are gated on the fence timeline. The last
/// fence value that may read the buffer is recorded at submit time; a write
/// while that value is still in flight is refused instead of racing.
pub struct TrackedBuffer {
    buffer: wgpu::Buffer,
    label: String,
    last_use: Cell<u64>,
}

impl TrackedBuffer {
    pub fn new(device: &wgpu::Device, label: &str, size: u64, usage: wgpu::BufferUsages) -> Self {
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage,
            mapped_at_creation: false,
        });
        Self {
            buffer,
            label: label.to_string(),
            last_use: Cell::new(0),
        }
    }

    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    /// Records that the submission with fence value `target` reads the
    /// buffer.
    pub fn mark_used(&self, target: u64) {
        if target > self.last_use.get() {
            self.last_use.set(target);
        }
    }

    /// Stages `data` for upload, refusing if the GPU may still be reading
    /// the buffer.
    pub fn write(&self, fence: &FenceSync, queue: &wgpu::Queue, data: &[u8]) -> Result<()> {
        let target = self.last_use.get();
        if !fence.is_retired(target) {
            return Err(Error::BufferInFlight {
                label: self.label.clone(),
                target,
                completed: fence.completed_value(),
            });
        }
        queue.write_buffer(&self.buffer, 0, data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_values_strictly_increase() {
        let mut core = FenceCore::new();
        let a = core.signal(10u32);
        let b = core.signal(11u32);
        let c = core.signal(12u32);
        assert_eq!((a, b, c), (1, 2, 3));
        assert_eq!(core.last_signaled(), 3);
    }

    #[test]
    fn retired_target_waits_without_blocking() {
        let mut core = FenceCore::new();
        let target = core.signal(5u32);
        assert_eq!(core.wait_plan(target).unwrap(), Some(&5));
        core.retire(target);
        // Second wait on the same value is already satisfied.
        assert_eq!(core.wait_plan(target).unwrap(), None);
        assert!(core.is_retired(target));
    }

    #[test]
    fn planning_a_wait_does_not_retire_the_target() {
        // The watermark may only advance once the device confirms the
        // wait; until then buffer-reuse gates must keep refusing.
        let mut core = FenceCore::new();
        let target = core.signal(7u32);
        assert_eq!(core.wait_plan(target).unwrap(), Some(&7));
        assert!(!core.is_retired(target));
        assert_eq!(core.completed_value(), 0);
        // The handle stays available for a retried wait.
        assert_eq!(core.wait_plan(target).unwrap(), Some(&7));
        core.retire(target);
        assert!(core.is_retired(target));
        assert_eq!(core.completed_value(), target);
    }

    #[test]
    fn retiring_covers_earlier_submissions() {
        let mut core = FenceCore::new();
        core.signal(1u32);
        core.signal(2u32);
        let third = core.signal(3u32);
        assert_eq!(core.wait_plan(third).unwrap(), Some(&3));
        core.retire(third);
        assert_eq!(core.completed_value(), third);
        assert_eq!(core.wait_plan(1).unwrap(), None);
        assert_eq!(core.wait_plan(2).unwrap(), None);
    }

    #[test]
    fn wait_beyond_last_signal_is_an_error() {
        let mut core = FenceCore::new();
        core.signal(1u32);
        let err = core.wait_plan(9).unwrap_err();
        assert!(matches!(
            err,
            Error::WaitTargetNotSignaled {
                target: 9,
                last_signaled: 1
            }
        ));
    }
}
