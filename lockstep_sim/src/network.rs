//! Simulated frame relay with fault injection.
//!
//! The relay carries agreed frames from the sequencer to each replica.
//! Like a real lockstep transport it is reliable and ordered: faults only
//! delay frames, they never drop or reorder them.

use lockstep_core::FrameIndex;
use lockstep_env::{Frame, NetError, NetworkController, PeerId};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace};

/// A frame on its way to a replica.
#[derive(Debug, Clone)]
struct InFlight<C> {
    /// Tick the frame was sent at
    sent: u64,

    /// Tick at which the frame may be delivered
    due: u64,

    /// Already counted as held by a partition
    held: bool,
    index: FrameIndex,
    frame: Frame<C>,
}

/// Link faults shared between the relay and its controller.
#[derive(Debug, Default)]
struct LinkState {
    /// Base latency in ticks per directed link
    latency: BTreeMap<(PeerId, PeerId), u32>,

    /// Jitter standard deviation in ticks per directed link
    jitter: BTreeMap<(PeerId, PeerId), f64>,

    /// Active partitions (peers that cannot communicate)
    partitions: Vec<(Vec<PeerId>, Vec<PeerId>)>,
}

impl LinkState {
    fn can_communicate(&self, from: PeerId, to: PeerId) -> bool {
        !self.partitions.iter().any(|(group_a, group_b)| {
            (group_a.contains(&from) && group_b.contains(&to))
                || (group_b.contains(&from) && group_a.contains(&to))
        })
    }
}

fn lock(state: &Mutex<LinkState>) -> MutexGuard<'_, LinkState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub sent: u64,
    pub delivered: u64,

    /// Frames whose delivery a partition postponed, each counted once
    pub held: u64,

    /// Largest send-to-delivery delay seen, in ticks
    pub max_delay_ticks: u64,
}

/// Relays frames from one sequencer to many replicas.
pub struct SimNetwork<C> {
    sequencer: PeerId,
    queues: BTreeMap<PeerId, VecDeque<InFlight<C>>>,

    /// Last scheduled delivery tick per replica, keeps delivery in order
    last_due: BTreeMap<PeerId, u64>,

    links: Arc<Mutex<LinkState>>,
    rng: ChaCha8Rng,
    stats: RelayStats,
}

impl<C: Clone> SimNetwork<C> {
    /// Creates a relay for the given sequencer and replicas.
    ///
    /// `rng` drives the jitter samples and should come from its own stream.
    pub fn new(sequencer: PeerId, replicas: &[PeerId], rng: ChaCha8Rng) -> Self {
        Self {
            sequencer,
            queues: replicas.iter().map(|&p| (p, VecDeque::new())).collect(),
            last_due: replicas.iter().map(|&p| (p, 0)).collect(),
            links: Arc::new(Mutex::new(LinkState::default())),
            rng,
            stats: RelayStats::default(),
        }
    }

    /// Controller sharing this relay's link state.
    pub fn controller(&self) -> SimNetworkController {
        SimNetworkController {
            links: Arc::clone(&self.links),
        }
    }

    pub fn sequencer(&self) -> PeerId {
        self.sequencer
    }

    /// Sends a frame to one replica at tick `now`.
    pub fn send(
        &mut self,
        to: PeerId,
        index: FrameIndex,
        frame: Frame<C>,
        now: u64,
    ) -> Result<(), NetError> {
        if !self.queues.contains_key(&to) {
            return Err(NetError::unknown(to));
        }

        let delay = self.sample_delay(self.sequencer, to);
        let last = self.last_due.get(&to).copied().unwrap_or(0);
        let due = (now + delay).max(last);
        self.last_due.insert(to, due);

        if let Some(queue) = self.queues.get_mut(&to) {
            queue.push_back(InFlight {
                sent: now,
                due,
                held: false,
                index,
                frame,
            });
        }
        self.stats.sent += 1;
        trace!("frame {} to {} due at tick {}", index, to, due);
        Ok(())
    }

    /// Sends a frame to every replica.
    pub fn broadcast(&mut self, index: FrameIndex, frame: &Frame<C>, now: u64) -> usize {
        let peers: Vec<PeerId> = self.queues.keys().copied().collect();
        peers
            .into_iter()
            .filter(|&peer| self.send(peer, index, frame.clone(), now).is_ok())
            .count()
    }

    fn sample_delay(&mut self, from: PeerId, to: PeerId) -> u64 {
        let (latency, jitter) = {
            let links = lock(&self.links);
            (
                links.latency.get(&(from, to)).copied().unwrap_or(0),
                links.jitter.get(&(from, to)).copied().unwrap_or(0.0),
            )
        };

        let extra = match Normal::new(0.0, jitter) {
            Ok(normal) if jitter > 0.0 => {
                let sample: f64 = normal.sample(&mut self.rng);
                sample.abs().round() as u64
            }
            _ => 0,
        };
        latency as u64 + extra
    }

    /// Frames due for `to` at tick `now`, in send order.
    ///
    /// Nothing is delivered over a partitioned link; the frames wait and
    /// arrive together once the partition heals.
    pub fn deliver(&mut self, to: PeerId, now: u64) -> Vec<(FrameIndex, Frame<C>)> {
        let reachable = lock(&self.links).can_communicate(self.sequencer, to);
        let Some(queue) = self.queues.get_mut(&to) else {
            return Vec::new();
        };

        if !reachable {
            for in_flight in queue.iter_mut().take_while(|f| f.due <= now) {
                if !in_flight.held {
                    in_flight.held = true;
                    self.stats.held += 1;
                }
            }
            return Vec::new();
        }

        let mut delivered = Vec::new();
        while queue.front().is_some_and(|f| f.due <= now) {
            if let Some(in_flight) = queue.pop_front() {
                let delay = now.saturating_sub(in_flight.sent);
                self.stats.max_delay_ticks = self.stats.max_delay_ticks.max(delay);
                delivered.push((in_flight.index, in_flight.frame));
            }
        }
        self.stats.delivered += delivered.len() as u64;
        if !delivered.is_empty() {
            debug!("delivered {} frames to {} at tick {}", delivered.len(), to, now);
        }
        delivered
    }

    /// Frames still queued for a replica.
    pub fn in_flight(&self, to: PeerId) -> usize {
        self.queues.get(&to).map_or(0, VecDeque::len)
    }

    /// Returns true if no frame is queued for any replica.
    pub fn is_idle(&self) -> bool {
        self.queues.values().all(VecDeque::is_empty)
    }

    pub fn stats(&self) -> RelayStats {
        self.stats
    }
}

/// Network controller for fault injection.
#[derive(Debug, Clone)]
pub struct SimNetworkController {
    links: Arc<Mutex<LinkState>>,
}

impl SimNetworkController {
    /// Checks if two peers can communicate (not partitioned).
    pub fn can_communicate(&self, from: PeerId, to: PeerId) -> bool {
        lock(&self.links).can_communicate(from, to)
    }

    /// Gets the latency for a link (default 0).
    pub fn latency(&self, from: PeerId, to: PeerId) -> u32 {
        lock(&self.links)
            .latency
            .get(&(from, to))
            .copied()
            .unwrap_or(0)
    }

    pub fn partition_count(&self) -> usize {
        lock(&self.links).partitions.len()
    }
}

impl NetworkController for SimNetworkController {
    fn partition(&self, group_a: &[PeerId], group_b: &[PeerId]) {
        debug!("partition: {} peers | {} peers", group_a.len(), group_b.len());
        lock(&self.links)
            .partitions
            .push((group_a.to_vec(), group_b.to_vec()));
    }

    fn heal_all(&self) {
        debug!("all partitions healed");
        lock(&self.links).partitions.clear();
    }

    fn set_link_latency(&self, from: PeerId, to: PeerId, latency_ticks: u32) {
        lock(&self.links).latency.insert((from, to), latency_ticks);
    }

    fn set_link_jitter(&self, from: PeerId, to: PeerId, jitter_ticks: f64) {
        let jitter = if jitter_ticks.is_finite() {
            jitter_ticks.max(0.0)
        } else {
            0.0
        };
        lock(&self.links).jitter.insert((from, to), jitter);
    }
}
