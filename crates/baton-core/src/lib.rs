//! Baton core - build-repair election and serialized operation queue
//!
//! Agent processes share one `SQLite` file and coordinate through it:
//! - [`BuildCoordinator`] decides which agent repairs a broken build and
//!   takes the job back from a fixer that stops reporting
//! - [`OperationQueue`] hands out version-control operations one at a time,
//!   oldest first, never to two callers
//!
//! There are no in-process locks. Every state change is a single immediate
//! transaction with a conditional update, so the database's isolation is the
//! only synchronization, across threads and processes alike.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod agent;
pub mod build;
pub mod clock;
pub mod config;
pub mod error;
pub mod queue;
pub mod store;

pub use agent::AgentId;
pub use build::{BuildCoordinator, BuildDecision, BuildState, BuildStatus, HandleOptions};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{load_config, BuildConfig, Config, StoreConfig};
pub use error::{Error, Result};
pub use queue::{OperationQueue, QueueItem, QueueStats, QueueStatus};
pub use store::Store;
