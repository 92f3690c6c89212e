//! textval-server: HTTP surface of the text validation service
//!
//! Wires the [`textval_gate`] core into an axum application: bearer
//! authentication, per-address rate limits, the workflow and custom voice
//! endpoints, the provisioning webhook and a health report.
//!
//! ```no_run
//! # async fn example(state: textval_server::AppState) -> std::io::Result<()> {
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:8000").await?;
//! textval_server::serve(listener, state, std::future::pending::<()>()).await
//! # }
//! ```

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![allow(
    clippy::multiple_crate_versions,
    reason = "transitive dependencies from axum and reqwest"
)]

pub mod error;
pub mod observability;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::{router, serve};
pub use state::AppState;
