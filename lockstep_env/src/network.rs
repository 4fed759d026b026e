//! Transport-facing boundary of the lockstep core.

use crate::types::{Frame, FrameIndex, PeerId};

/// Destination for agreed frames delivered by a transport.
///
/// The transport is the producer side of the frame buffer: it hands over
/// frames in agreed order and gets nothing back. Implementations must be
/// callable from any thread while the simulation is stepping.
///
/// # Frame Flow
///
/// ```text
/// Peers                 Transport                FrameSink
///   |                      |                        |
///   |-- commands --------->|                        |
///   |                      |-- push(frame) -------->|  index = last_frame_pointer++
///   |                      |                        |
/// ```
pub trait FrameSink<C>: Send + Sync {
    /// Appends a frame and returns the index it was stored at.
    fn push(&self, frame: Frame<C>) -> FrameIndex;
}

/// Fault injection hooks for simulated transports.
///
/// Lockstep transports are reliable and ordered, so faults here only delay
/// delivery; they never drop or reorder frames.
pub trait NetworkController: Send + Sync {
    /// Creates a network partition between two peer sets.
    fn partition(&self, group_a: &[PeerId], group_b: &[PeerId]);

    /// Heals all partitions.
    fn heal_all(&self);

    /// Sets base latency (in ticks) for frames travelling from one peer to another.
    fn set_link_latency(&self, from: PeerId, to: PeerId, latency_ticks: u32);

    /// Sets the jitter standard deviation (in ticks) for a link.
    fn set_link_jitter(&self, from: PeerId, to: PeerId, jitter_ticks: f64);
}
