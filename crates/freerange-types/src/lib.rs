//! Shared type definitions for Free Range simulation telemetry.
//!
//! This crate holds the storage-independent vocabulary of the telemetry
//! layer: typed identifiers, the structured payload value, and the records
//! that a simulation engine writes once per timestep.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe integer wrappers for all entity identifiers
//! - [`enums`] -- Entity kinds used for identifier allocation
//! - [`payload`] -- The tagged [`StructuredValue`] and its text encoding
//! - [`records`] -- Simulation, environment, agent, timestep and log records

pub mod enums;
pub mod ids;
pub mod payload;
pub mod records;

// Re-export all public types at crate root for convenience.
pub use enums::EntityKind;
pub use ids::{AgentId, AgentLogId, EnvironmentId, EnvironmentLogId, SimulationId, TimestepId};
pub use payload::{MAX_DEPTH, PayloadError, StructuredValue};
pub use records::{
    Agent, AgentLog, AgentStep, Environment, EnvironmentLog, EnvironmentState, Simulation,
    Timestep, TimelineEntry,
};
