// Checkpoint module
// Resumable multi-step jobs

pub mod ledger;

pub use ledger::{command_fingerprint, CheckpointError, CheckpointLedger, CheckpointRecord};
