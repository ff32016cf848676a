//! HTTP front end for the hubmirror caching mirror.
//!
//! Exposes the dispatcher from `hubmirror-core` over axum, plus the CLI and
//! logging setup used by the `hubmirror` binary.

pub mod cli;
pub mod logging;
pub mod server;

pub use cli::{Cli, LogFormat};
pub use server::{router, serve, ApiError, AppState, X_CACHE};
