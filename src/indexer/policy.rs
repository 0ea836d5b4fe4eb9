//! Per-dataset failure policy / 数据集失败处理策略

use crate::config::FailurePolicyKind;
use crate::models::Dataset;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    /// Stop the job; earlier datasets stay indexed
    Abort,
    /// Log and continue with the next dataset
    Skip,
}

/// Decides what a job does when one dataset fails to index
pub trait FailurePolicy: Send + Sync {
    fn on_dataset_error(&self, dataset: &Dataset, error: &anyhow::Error) -> FailureAction;
}

/// Best effort, stop on the first error (default) / 遇错即停
#[derive(Debug, Default, Clone, Copy)]
pub struct StopOnFirstError;

impl FailurePolicy for StopOnFirstError {
    fn on_dataset_error(&self, _dataset: &Dataset, _error: &anyhow::Error) -> FailureAction {
        FailureAction::Abort
    }
}

/// Isolate failures per dataset / 跳过失败的数据集
#[derive(Debug, Default, Clone, Copy)]
pub struct SkipFailedDatasets;

impl FailurePolicy for SkipFailedDatasets {
    fn on_dataset_error(&self, _dataset: &Dataset, _error: &anyhow::Error) -> FailureAction {
        FailureAction::Skip
    }
}

impl From<FailurePolicyKind> for Box<dyn FailurePolicy> {
    fn from(kind: FailurePolicyKind) -> Self {
        match kind {
            FailurePolicyKind::StopOnFirstError => Box::new(StopOnFirstError),
            FailurePolicyKind::SkipFailed => Box::new(SkipFailedDatasets),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset() -> Dataset {
        Dataset {
            id: 7,
            identifier: "DS-7".into(),
            name: "seven".into(),
            description: None,
            protocol_id: 1,
        }
    }

    #[test]
    fn test_policy_from_kind() {
        let err = anyhow::anyhow!("index rejected");
        let strict: Box<dyn FailurePolicy> = FailurePolicyKind::StopOnFirstError.into();
        let lenient: Box<dyn FailurePolicy> = FailurePolicyKind::SkipFailed.into();
        assert_eq!(strict.on_dataset_error(&dataset(), &err), FailureAction::Abort);
        assert_eq!(lenient.on_dataset_error(&dataset(), &err), FailureAction::Skip);
    }
}
