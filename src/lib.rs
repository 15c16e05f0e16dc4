// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod config;
pub mod coordinator;
pub mod download;
pub mod feed;
pub mod ledger;
pub mod lock;
pub mod notify;
pub mod postprocess;
pub mod telemetry;
pub mod tools;

// ---- Re-exports for stable public API ----
pub use crate::config::{InterestConfig, Settings};
pub use crate::coordinator::{RunCoordinator, RunOutcome, RunSummary, Services};
pub use crate::notify::{MemoryNotifier, Notifier};
