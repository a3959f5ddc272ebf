//! Persistence layer for Free Range simulation telemetry (`SQLite`).
//!
//! A simulation engine uses this crate to durably record every timestep of
//! every environment and every agent across repeated runs, and to read those
//! records back as ordered time series. The store enforces the relational
//! invariants itself: foreign keys, one log per timestep and agent, strictly
//! increasing timesteps per environment, and append-only tables.
//!
//! # Architecture
//!
//! ```text
//! Simulation engine
//!     |
//!     +-- Run setup ----------> SessionManager
//!     |                           |-- begin_simulation / begin_environment
//!     |                           |-- register_agent(s)
//!     |                           +-- begin_timestep  (ordering enforced)
//!     |
//!     +-- Each step ----------> Recorder
//!     |                           |-- record_environment_log
//!     |                           |-- record_agent_log
//!     |                           +-- record_step     (one transaction)
//!     |
//!     +-- Analysis / replay --> QueryService
//!                                 |-- environment_timeline (+ stream, range)
//!                                 |-- agent_timeline       (+ stream)
//!                                 +-- simulation_summary
//!
//! Every write allocates its identifier through IdentityAllocator inside the
//! write's own transaction.
//! ```
//!
//! # Modules
//!
//! - [`sqlite`] -- `SQLite` connection pool and configuration
//! - [`config`] -- YAML configuration with environment overrides
//! - [`identity`] -- Per-kind identifier counters
//! - [`session`] -- Simulations, environments, agents and timesteps
//! - [`recorder`] -- Environment and agent logs
//! - [`query`] -- Ordered timelines and hierarchy lookups
//! - [`error`] -- Shared error types

pub mod config;
pub mod error;
pub mod identity;
pub mod query;
pub mod recorder;
mod rows;
pub mod session;
pub mod sqlite;

// Re-export primary types for convenience.
pub use config::{ConfigError, DatabaseConfig, TelemetryConfig};
pub use error::TelemetryError;
pub use identity::IdentityAllocator;
pub use query::{AgentTimelineStream, EnvironmentTimelineStream, QueryService};
pub use recorder::{Recorder, StepRecord};
pub use session::SessionManager;
pub use sqlite::{StoreConfig, TelemetryPool};
