//! Ingestion pipeline, live state, fanout and replay for ROPT.
//!
//! This crate is the runtime core. It turns a stream of zone events into
//! live actor state, zone blocking and reroutes, and pushes every change to
//! connected viewers.
//!
//! # Modules
//!
//! - [`config`] -- YAML configuration with env overrides
//! - [`context`] -- [`AppContext`], built once and shared by everything
//! - [`pipeline`] -- Bounded event queue and the single consumer
//! - [`live_state`] -- Actors, ring buffer, active run (memory or shared)
//! - [`persistence`] -- Durable event log, zones, runs, base graph
//! - [`solver`] -- Routing solver client with a degraded fallback
//! - [`fanout`] -- Viewer registry, local or NATS-relayed delivery
//! - [`replay`] -- Paced re-emission of a logged run
//! - [`error`] -- Error types
//!
//! # Deployment constraint
//!
//! The in-memory live state is correct only with exactly one ingestion
//! process. Several processes must use the shared backend and distributed
//! fanout; [`RoptConfig::validate`] rejects distributed fanout over memory
//! state.

pub mod config;
pub mod context;
pub mod error;
pub mod fanout;
pub mod live_state;
pub mod persistence;
pub mod pipeline;
pub mod replay;
pub mod solver;

pub use config::{ConfigError, RoptConfig};
pub use context::{AppContext, PendingReroute, RunStopped};
pub use error::{CoreError, IngestError};
pub use fanout::{Fanout, Viewer, ViewerId};
pub use live_state::{LiveLimits, LiveState};
pub use persistence::Persistence;
pub use pipeline::{EventQueue, EventReceiver, process_event, spawn_consumer};
pub use replay::{ReplayRequest, run_replay};
pub use solver::{SolveResult, Solver, SolverError};
