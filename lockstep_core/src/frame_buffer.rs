//! Ordered buffer of agreed frames with a configurable lookahead delay.

use lockstep_env::{Frame, FrameIndex, FrameSink};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::trace;

/// The two counters that define the buffered frame range.
///
/// `last_frame_pointer >= frame_counter` always holds; the difference is
/// the number of frames received but not yet consumed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationClock {
    /// Next frame index to consume
    pub frame_counter: FrameIndex,

    /// Next frame index the transport may write to
    pub last_frame_pointer: FrameIndex,
}

impl SimulationClock {
    /// Frames received but not consumed yet.
    pub fn backlog(&self) -> u32 {
        self.last_frame_pointer - self.frame_counter
    }
}

/// Why a pop found nothing to consume, read under the same lock as the pop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotReady {
    /// Frames buffered; never more than `frame_delay`
    pub backlog: u32,
    pub frame_delay: u32,
}

struct FrameRange<C> {
    /// Frames `frame_counter..last_frame_pointer`, front first
    frames: VecDeque<Frame<C>>,
    clock: SimulationClock,
    frame_delay: u32,
}

impl<C> FrameRange<C> {
    fn ready(&self) -> bool {
        self.clock.backlog() > self.frame_delay
    }
}

/// Thread-safe frame queue between the transport and the step engine.
///
/// Frames are consumed in push order, exactly once, and only while more
/// than `frame_delay` frames are buffered. The lookahead absorbs network
/// jitter: with a delay of `d`, frame `n` is consumed only once frame
/// `n + d` has arrived.
pub struct FrameBuffer<C> {
    inner: Mutex<FrameRange<C>>,
}

impl<C> FrameBuffer<C> {
    /// Creates an empty buffer with the given lookahead.
    pub fn new(frame_delay: u32) -> Self {
        Self {
            inner: Mutex::new(FrameRange {
                frames: VecDeque::new(),
                clock: SimulationClock::default(),
                frame_delay,
            }),
        }
    }

    /// Appends a frame at `last_frame_pointer` and returns its index.
    pub fn push(&self, frame: Frame<C>) -> FrameIndex {
        let mut range = self.lock();
        let index = range.clock.last_frame_pointer;
        range.frames.push_back(frame);
        range.clock.last_frame_pointer += 1;
        trace!("buffered frame {} (backlog {})", index, range.clock.backlog());
        index
    }

    /// Removes the frame at `frame_counter` if enough lookahead is buffered.
    ///
    /// `None` means "not ready": at most `frame_delay` frames are buffered.
    /// This is the normal back-pressure signal, not a fault.
    pub fn try_pop(&self) -> Option<(FrameIndex, Frame<C>)> {
        self.pop_ready().ok()
    }

    /// Like [`try_pop`](Self::try_pop), but a miss reports the backlog and
    /// delay it saw.
    pub fn pop_ready(&self) -> Result<(FrameIndex, Frame<C>), NotReady> {
        let mut range = self.lock();
        let not_ready = NotReady {
            backlog: range.clock.backlog(),
            frame_delay: range.frame_delay,
        };
        if !range.ready() {
            return Err(not_ready);
        }
        let frame = range.frames.pop_front().ok_or(not_ready)?;
        let index = range.clock.frame_counter;
        range.clock.frame_counter += 1;
        Ok((index, frame))
    }

    /// Returns true if `try_pop` would currently succeed.
    pub fn can_pop(&self) -> bool {
        self.lock().ready()
    }

    /// Consistent read of both counters.
    pub fn clock(&self) -> SimulationClock {
        self.lock().clock
    }

    pub fn frame_counter(&self) -> FrameIndex {
        self.lock().clock.frame_counter
    }

    pub fn last_frame_pointer(&self) -> FrameIndex {
        self.lock().clock.last_frame_pointer
    }

    /// Frames received but not consumed yet.
    pub fn backlog(&self) -> u32 {
        self.lock().clock.backlog()
    }

    pub fn frame_delay(&self) -> u32 {
        self.lock().frame_delay
    }

    /// Changes the lookahead. Takes effect on the next `try_pop`.
    pub fn set_frame_delay(&self, frame_delay: u32) {
        self.lock().frame_delay = frame_delay;
    }

    // Every mutation completes before the guard drops, so a poisoned lock
    // still guards a consistent range.
    fn lock(&self) -> MutexGuard<'_, FrameRange<C>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<C: Send> FrameSink<C> for FrameBuffer<C> {
    fn push(&self, frame: Frame<C>) -> FrameIndex {
        FrameBuffer::push(self, frame)
    }
}
