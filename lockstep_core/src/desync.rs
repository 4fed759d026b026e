//! Cross-replica checksum comparison.
//!
//! Replicas exchange checksums at agreed checkpoints (every `interval`
//! consumed frames). A mismatch means some replica diverged; recovering
//! from it is up to the layer above.

use lockstep_env::{FrameIndex, PeerId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use tracing::warn;

/// Checkpoints retained for late remote reports.
const DEFAULT_HISTORY: usize = 64;

/// Whether and how often checksums are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DesyncDetection {
    /// Compare after every `interval` consumed frames.
    On { interval: u32 },
    Off,
}

impl DesyncDetection {
    /// Returns true if the state after `frames_consumed` frames is a checkpoint.
    pub fn is_checkpoint(&self, frames_consumed: FrameIndex) -> bool {
        match *self {
            DesyncDetection::On { interval } => {
                interval > 0 && frames_consumed > 0 && frames_consumed % interval == 0
            }
            DesyncDetection::Off => false,
        }
    }
}

impl Default for DesyncDetection {
    fn default() -> Self {
        DesyncDetection::On { interval: 10 }
    }
}

/// A checkpoint where a peer's checksum disagreed with ours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesyncReport {
    /// Frames consumed when the checksums were taken
    pub frame: FrameIndex,
    pub peer: PeerId,
    pub local: u64,
    pub remote: u64,
}

impl std::fmt::Display for DesyncReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "desync at frame {} with peer {}: local {:#018x} != remote {:#018x}",
            self.frame, self.peer, self.local, self.remote
        )
    }
}

/// Compares local checkpoint checksums against remote reports.
pub struct DesyncDetector {
    detection: DesyncDetection,

    /// Local checksums by checkpoint frame
    local: BTreeMap<FrameIndex, u64>,

    /// Remote checksums that arrived before our own checkpoint
    early: BTreeMap<FrameIndex, Vec<(PeerId, u64)>>,

    /// Most recent mismatches, oldest dropped past `max_history`
    reports: VecDeque<DesyncReport>,

    /// Earliest mismatch ever found; survives pruning
    first: Option<DesyncReport>,

    mismatched: u64,

    /// Comparisons that matched
    matched: u64,

    max_history: usize,
}

impl DesyncDetector {
    pub fn new(detection: DesyncDetection) -> Self {
        Self {
            detection,
            local: BTreeMap::new(),
            early: BTreeMap::new(),
            reports: VecDeque::new(),
            first: None,
            mismatched: 0,
            matched: 0,
            max_history: DEFAULT_HISTORY,
        }
    }

    /// Sets how many local checkpoints and mismatch reports are kept.
    pub fn with_history(mut self, max_history: usize) -> Self {
        self.max_history = max_history.max(1);
        self
    }

    pub fn detection(&self) -> DesyncDetection {
        self.detection
    }

    pub fn is_checkpoint(&self, frames_consumed: FrameIndex) -> bool {
        self.detection.is_checkpoint(frames_consumed)
    }

    /// Records our checksum for a checkpoint.
    ///
    /// Remote reports that arrived early for this checkpoint are compared
    /// now; any mismatches are returned.
    pub fn record_local(&mut self, frame: FrameIndex, checksum: u64) -> Vec<DesyncReport> {
        if !self.is_checkpoint(frame) {
            return Vec::new();
        }
        self.local.insert(frame, checksum);

        let mut found = Vec::new();
        if let Some(waiting) = self.early.remove(&frame) {
            for (peer, remote) in waiting {
                if let Some(report) = self.compare(frame, peer, checksum, remote) {
                    found.push(report);
                }
            }
        }
        self.prune();
        found
    }

    /// Records a peer's checksum for a checkpoint.
    ///
    /// Returns a report if it disagrees with our own checksum. Reports for
    /// checkpoints we have not reached yet are held until we do; reports for
    /// checkpoints already pruned from history are ignored.
    pub fn record_remote(
        &mut self,
        peer: PeerId,
        frame: FrameIndex,
        checksum: u64,
    ) -> Option<DesyncReport> {
        if !self.is_checkpoint(frame) {
            return None;
        }
        match self.local.get(&frame) {
            Some(&local) => self.compare(frame, peer, local, checksum),
            None if self.is_pruned(frame) => None,
            None => {
                self.early.entry(frame).or_default().push((peer, checksum));
                None
            }
        }
    }

    fn compare(
        &mut self,
        frame: FrameIndex,
        peer: PeerId,
        local: u64,
        remote: u64,
    ) -> Option<DesyncReport> {
        if local == remote {
            self.matched += 1;
            return None;
        }
        let report = DesyncReport {
            frame,
            peer,
            local,
            remote,
        };
        warn!("{}", report);
        self.mismatched += 1;
        if self.first.map_or(true, |first| frame < first.frame) {
            self.first = Some(report);
        }
        self.reports.push_back(report);
        while self.reports.len() > self.max_history {
            self.reports.pop_front();
        }
        Some(report)
    }

    fn is_pruned(&self, frame: FrameIndex) -> bool {
        self.local.len() >= self.max_history
            && self.local.keys().next().is_some_and(|&oldest| frame < oldest)
    }

    fn prune(&mut self) {
        while self.local.len() > self.max_history {
            self.local.pop_first();
        }
        if let Some(&oldest) = self.local.keys().next() {
            self.early.retain(|&frame, _| frame >= oldest);
        }
    }

    /// Our checksum for a checkpoint, if still retained.
    pub fn local_checksum(&self, frame: FrameIndex) -> Option<u64> {
        self.local.get(&frame).copied()
    }

    /// The most recent mismatches, in detection order.
    pub fn reports(&self) -> impl Iterator<Item = &DesyncReport> {
        self.reports.iter()
    }

    /// The earliest checkpoint at which a mismatch was found.
    pub fn first_desync(&self) -> Option<&DesyncReport> {
        self.first.as_ref()
    }

    pub fn is_desynced(&self) -> bool {
        self.first.is_some()
    }

    /// Number of comparisons that disagreed, including pruned reports.
    pub fn mismatched(&self) -> u64 {
        self.mismatched
    }

    /// Number of comparisons that agreed.
    pub fn matched(&self) -> u64 {
        self.matched
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> DesyncDetector {
        DesyncDetector::new(DesyncDetection::On { interval: 10 })
    }

    #[test]
    fn test_checkpoints() {
        let on = DesyncDetection::On { interval: 10 };
        assert!(!on.is_checkpoint(0));
        assert!(!on.is_checkpoint(5));
        assert!(on.is_checkpoint(10));
        assert!(on.is_checkpoint(20));
        assert!(!DesyncDetection::Off.is_checkpoint(10));
        assert!(!DesyncDetection::On { interval: 0 }.is_checkpoint(10));
    }

    #[test]
    fn test_matching_checksums() {
        let mut d = detector();
        let peer = PeerId::from_seed(1);

        assert!(d.record_local(10, 0xabc).is_empty());
        assert_eq!(d.record_remote(peer, 10, 0xabc), None);
        assert_eq!(d.matched(), 1);
        assert!(!d.is_desynced());
    }

    #[test]
    fn test_mismatch_reported() {
        let mut d = detector();
        let peer = PeerId::from_seed(1);

        d.record_local(10, 1);
        let report = d.record_remote(peer, 10, 2).unwrap();

        assert_eq!(report.frame, 10);
        assert_eq!(report.local, 1);
        assert_eq!(report.remote, 2);
        assert_eq!(d.first_desync(), Some(&report));
    }

    #[test]
    fn test_early_remote_compared_on_local_record() {
        let mut d = detector();
        let a = PeerId::from_seed(1);
        let b = PeerId::from_seed(2);

        assert_eq!(d.record_remote(a, 20, 7), None);
        assert_eq!(d.record_remote(b, 20, 8), None);

        let found = d.record_local(20, 7);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].peer, b);
        assert_eq!(d.matched(), 1);
    }

    #[test]
    fn test_non_checkpoint_frames_ignored() {
        let mut d = detector();
        assert!(d.record_local(7, 1).is_empty());
        assert_eq!(d.local_checksum(7), None);
        assert_eq!(d.record_remote(PeerId::from_seed(1), 7, 2), None);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut d = detector().with_history(2);
        d.record_local(10, 1);
        d.record_local(20, 2);
        d.record_local(30, 3);

        assert_eq!(d.local_checksum(10), None);
        assert_eq!(d.local_checksum(30), Some(3));
        // Too old to compare
        assert_eq!(d.record_remote(PeerId::from_seed(1), 10, 99), None);
        assert!(!d.is_desynced());
    }

    #[test]
    fn test_reports_are_bounded() {
        let mut d = DesyncDetector::new(DesyncDetection::On { interval: 1 }).with_history(2);
        let peer = PeerId::from_seed(1);

        for frame in 1..=1000 {
            d.record_local(frame, 1);
            assert!(d.record_remote(peer, frame, 2).is_some());
        }

        let kept: Vec<FrameIndex> = d.reports().map(|r| r.frame).collect();
        assert_eq!(kept, vec![999, 1000]);
        assert_eq!(d.mismatched(), 1000);
        assert_eq!(d.first_desync().map(|r| r.frame), Some(1));
        assert!(d.is_desynced());
    }
}
