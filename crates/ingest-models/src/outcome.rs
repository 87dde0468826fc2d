//! Pipeline stages and terminal job outcomes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stages of the per-job pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    /// Parse the message body and derive the artifact key
    Decode,
    /// Create the job workspace
    Stage,
    /// Fetch the source artifact into the workspace
    Download,
    /// Run the external transform
    Transform,
    /// Check that the transform produced an output file
    Collect,
    /// Write the output to the processed bucket
    Upload,
    /// Delete the source artifact
    Retire,
    /// Remove the workspace
    Finalize,
}

impl PipelineStage {
    pub const ALL: [PipelineStage; 8] = [
        PipelineStage::Decode,
        PipelineStage::Stage,
        PipelineStage::Download,
        PipelineStage::Transform,
        PipelineStage::Collect,
        PipelineStage::Upload,
        PipelineStage::Retire,
        PipelineStage::Finalize,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Decode => "decode",
            PipelineStage::Stage => "stage",
            PipelineStage::Download => "download",
            PipelineStage::Transform => "transform",
            PipelineStage::Collect => "collect",
            PipelineStage::Upload => "upload",
            PipelineStage::Retire => "retire",
            PipelineStage::Finalize => "finalize",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal state of one pipeline run.
///
/// `Success` leads to a positive acknowledgment, `Failed` to a negative
/// acknowledgment without requeue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobOutcome {
    Success,
    Failed { stage: PipelineStage, reason: String },
}

impl JobOutcome {
    pub fn failed(stage: PipelineStage, reason: impl Into<String>) -> Self {
        Self::Failed {
            stage,
            reason: reason.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Success)
    }

    /// Stage the run failed at, if it failed.
    pub fn failed_stage(&self) -> Option<PipelineStage> {
        match self {
            JobOutcome::Success => None,
            JobOutcome::Failed { stage, .. } => Some(*stage),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobOutcome::Success => "success",
            JobOutcome::Failed { .. } => "failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_names_are_unique() {
        let mut names: Vec<_> = PipelineStage::ALL.iter().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), PipelineStage::ALL.len());
    }

    #[test]
    fn test_outcome_serialization() {
        let failed = JobOutcome::failed(PipelineStage::Download, "object missing");
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["stage"], "download");
        assert_eq!(json["reason"], "object missing");

        assert_eq!(failed.failed_stage(), Some(PipelineStage::Download));
        assert!(JobOutcome::Success.is_success());
        assert_eq!(JobOutcome::Success.failed_stage(), None);
    }
}
