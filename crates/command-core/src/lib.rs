//! # command-core
//!
//! Domain types and the `CommandStore` contract shared by the control
//! server and its storage backends.
//!
//! A **command** is a unit of work submitted once, claimed by exactly one
//! agent at a time under a time-bounded lease, and resolved to `COMPLETED`
//! or `FAILED` exactly once. This crate owns:
//!
//! - [`CommandType`] / [`CommandPayload`] / [`CommandStatus`] /
//!   [`CommandRecord`] - the data model.
//! - [`CommandStore`] - the operations a backend must implement
//!   atomically: create, get, claim, heartbeat, complete, fail, and
//!   startup-time lease-expiry recovery.
//! - [`CommandError`] / [`StoreError`] / [`ValidationError`] - the error
//!   taxonomy a caller discriminates on to pick an HTTP status code.
//! - [`ids`] - command/lease id generation.
//!
//! This crate has no opinion on *how* a command gets executed (that lives
//! in the agent crate) or on *which* storage engine backs [`CommandStore`]
//! (that lives in `command-store-sqlite`).

mod command;
mod error;
pub mod ids;
mod store;

pub use command::{CommandPayload, CommandRecord, CommandStatus, CommandType};
pub use error::{CommandError, StoreError, ValidationError};
pub use store::{ClaimCommand, CommandStore, CreateCommand, FailCommand};
