//! Backup sync: providers, divergence monitor, and conflict resolution

mod monitor;
mod provider;
mod resolver;

pub use monitor::{BackupSyncMonitor, CheckOutcome, CheckState};
pub use provider::{BackupProvider, FileBackupProvider, HttpBackupProvider};
pub use resolver::{ConflictResolver, Divergence, DivergenceDecision};

#[cfg(test)]
pub(crate) use provider::testing;
