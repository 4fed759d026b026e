//! JSON export of checkpoint checksums.
//!
//! A trace lists, per checkpoint, the checksum every replica announced, so
//! a divergence can be located offline.

use crate::error::HarnessError;
use crate::replica::Checkpoint;
use lockstep_core::{DesyncReport, FrameIndex};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Checksums announced for one checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TracePoint {
    /// Frames consumed at the checkpoint
    pub frame: FrameIndex,

    /// Checksum per replica (short peer id), hex encoded
    pub checksums: BTreeMap<String, String>,

    /// Whether every replica that reported agreed
    pub agreed: bool,
}

/// Complete trace of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChecksumTrace {
    /// Scenario name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    pub replicas: Vec<String>,
    pub checkpoints: Vec<TracePoint>,

    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub desyncs: Vec<DesyncReport>,

    /// Final results
    pub passed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl ChecksumTrace {
    /// Creates an empty trace.
    pub fn new(scenario: &str, seed: u64) -> Self {
        Self {
            scenario: scenario.to_string(),
            seed,
            replicas: Vec::new(),
            checkpoints: Vec::new(),
            desyncs: Vec::new(),
            passed: false,
            failure_reason: None,
        }
    }

    /// Groups announced checkpoints by frame.
    pub fn record(&mut self, checkpoints: &[Checkpoint]) {
        let mut by_frame: BTreeMap<FrameIndex, BTreeMap<String, u64>> = BTreeMap::new();
        for checkpoint in checkpoints {
            by_frame
                .entry(checkpoint.frame)
                .or_default()
                .insert(checkpoint.peer.to_string(), checkpoint.checksum);
        }

        self.checkpoints = by_frame
            .into_iter()
            .map(|(frame, sums)| {
                let mut values = sums.values();
                let first = values.next().copied();
                let agreed = values.all(|&v| Some(v) == first);
                TracePoint {
                    frame,
                    checksums: sums
                        .into_iter()
                        .map(|(peer, sum)| (peer, format!("{:016x}", sum)))
                        .collect(),
                    agreed,
                }
            })
            .collect();
    }

    /// Finalizes the trace.
    pub fn finalize(&mut self, passed: bool, failure_reason: Option<String>) {
        self.passed = passed;
        self.failure_reason = failure_reason;
    }

    /// First checkpoint at which replicas disagreed.
    pub fn first_disagreement(&self) -> Option<FrameIndex> {
        self.checkpoints.iter().find(|p| !p.agreed).map(|p| p.frame)
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<(), HarnessError> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockstep_env::PeerId;

    fn checkpoint(peer: u64, frame: FrameIndex, checksum: u64) -> Checkpoint {
        Checkpoint {
            peer: PeerId::from_seed(peer),
            frame,
            checksum,
        }
    }

    #[test]
    fn test_groups_by_frame() {
        let mut trace = ChecksumTrace::new("steady", 1);
        trace.record(&[
            checkpoint(0, 10, 5),
            checkpoint(1, 10, 5),
            checkpoint(0, 20, 6),
            checkpoint(1, 20, 7),
        ]);

        assert_eq!(trace.checkpoints.len(), 2);
        assert!(trace.checkpoints[0].agreed);
        assert!(!trace.checkpoints[1].agreed);
        assert_eq!(trace.first_disagreement(), Some(20));
        assert_eq!(
            trace.checkpoints[0].checksums.values().next().map(String::as_str),
            Some("0000000000000005")
        );
    }

    #[test]
    fn test_json_omits_empty_fields() {
        let mut trace = ChecksumTrace::new("steady", 1);
        trace.finalize(true, None);

        let json = serde_json::to_value(&trace).unwrap();
        assert!(json.get("desyncs").is_none());
        assert!(json.get("failure_reason").is_none());
        assert_eq!(json["passed"], true);
    }

    #[test]
    fn test_write_to_missing_dir_fails() {
        let trace = ChecksumTrace::new("steady", 1);
        let err = trace.write_to_file("/definitely/not/here/trace.json");
        assert!(matches!(err, Err(HarnessError::Io(_))));
    }
}
