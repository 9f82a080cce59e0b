//! # control-server
//!
//! The HTTP control server: translates the public/agent API (spec.md §6.1)
//! into `CommandStore` calls, enforcing nothing beyond the transition table
//! in spec.md §4.2. Stateless between requests - all state lives in the
//! store behind [`AppState`].

mod api;
mod error;
mod routes;
mod state;

pub use routes::build_router;
pub use state::{now_ms, AppState};
