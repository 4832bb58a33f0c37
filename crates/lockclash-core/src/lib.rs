//! # Lockclash Core
//!
//! Row-lock contention harness: sessions lock two rows in opposite orders
//! through a transactional engine, and every session ends with exactly one
//! classified outcome (committed, deadlock, timeout, error, interrupted).
//!
//! ## Laws (Compiler Enforced)
//!
//! - No `unwrap()` - returns `Result` instead
//! - No `expect()` - returns `Result` instead
//! - No `panic!()` - returns `Result` instead
//! - No `unsafe` - safe Rust only
//!
//! ## Error Handling
//!
//! Run-level failures are [`Error`]. Lock failures are [`LockFailure`] values
//! that [`classify`] turns into an [`OutcomeCategory`]; cleanup failures are
//! [`CleanupError`]s attached to the outcome. None of them abort siblings.

pub mod cancel;
pub mod classify;
pub mod config;
pub mod engine;
mod error;
pub mod harness;
pub mod lock_client;
pub mod outcome;
pub mod rendezvous;
pub mod report;
pub mod session;
pub mod timeline;
pub mod types;

pub use cancel::{forward_signals, CancelReason, CancelSource, CancelToken};
pub use classify::{classify, classify_signal, FailureClass};
pub use config::{load_config, EngineKind, HarnessConfig};
pub use error::{CleanupError, CleanupStage, Error, LockFailure, Result};
pub use harness::Harness;
pub use outcome::{Outcome, OutcomeCategory, OutcomeLog};
pub use report::Report;
pub use timeline::Timeline;
