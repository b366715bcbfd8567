use serde::{Deserialize, Serialize};

/// How the coordinator commits transactions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionConfig {
    /// Check every merged value before it is written.
    pub validate_on_commit: bool,
    /// After a root commit, wait on a sync barrier in every partition the
    /// commit touched. Needs a log attached with
    /// [`TransactionCoordinator::with_sync`](crate::TransactionCoordinator::with_sync).
    pub sync_on_commit: bool,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            validate_on_commit: true,
            sync_on_commit: true,
        }
    }
}
