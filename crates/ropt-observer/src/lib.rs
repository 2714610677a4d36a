//! HTTP and `WebSocket` API for ROPT.
//!
//! This crate provides an Axum server that exposes:
//!
//! - **Ingestion** (`POST /events`) for the edge event source; a full queue
//!   answers `503` immediately so the producer can drop and retry
//! - **Read endpoints** for the live snapshot, the event log, zones and runs
//! - **Metrics** (`POST /metrics`, `GET /metrics`) for performance samples
//!   (see [`metrics`])
//! - **Operator endpoints** for run lifecycle, zone editing and the base
//!   routing graph (see [`operator`])
//! - **`WebSocket` endpoints**: `/ws` for live updates and `/ws/replay` for
//!   paced replay of a logged run
//!
//! Every handler receives the shared [`AppContext`](ropt_core::AppContext).
//! Handlers never mutate live state directly; events go through the
//! ingestion queue like any other producer's.

pub mod error;
pub mod handlers;
pub mod metrics;
pub mod operator;
pub mod router;
pub mod server;
pub mod ws;

// Re-export primary types for convenience.
pub use error::ObserverError;
pub use router::build_router;
pub use server::{ServerConfig, ServerError, start_server};
