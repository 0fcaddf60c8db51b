//! Baton - command-line front end for the build-repair election and the
//! serialized VCS operation queue
//!
//! Every invocation opens the shared state database, performs one
//! transactional step, prints the result, and exits.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod cli;
pub mod commands;
