//! Persisted telemetry records and per-step inputs.
//!
//! The ownership hierarchy is `Simulation -> Environment -> {Agent, Timestep}`
//! and `Timestep -> {EnvironmentLog, AgentLog}`. Every record is append-only:
//! once written it is never updated or deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{
    AgentId, AgentLogId, EnvironmentId, EnvironmentLogId, SimulationId, TimestepId,
};
use crate::payload::StructuredValue;

/// One full run of the simulation engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Simulation {
    /// Surrogate identifier.
    pub id: SimulationId,
    /// Human-readable run name.
    pub name: String,
    /// Free-form description of the run.
    pub description: String,
    /// Wall-clock time the run was opened.
    pub created_at: DateTime<Utc>,
}

/// One simulated world instance within a simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    /// Surrogate identifier.
    pub id: EnvironmentId,
    /// Owning simulation.
    pub simulation_id: SimulationId,
    /// Ordinal among the simulation's environments (vectorized index).
    pub simulation_index: u32,
}

/// One actor within an environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    /// Surrogate identifier.
    pub id: AgentId,
    /// Engine-supplied agent name.
    pub name: String,
    /// Owning environment.
    pub environment_id: EnvironmentId,
}

/// One discrete step of one environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestep {
    /// Surrogate identifier.
    pub id: TimestepId,
    /// Owning environment.
    pub environment_id: EnvironmentId,
    /// Step ordinal, strictly increasing per environment.
    pub timestep: u64,
}

/// Environment-wide state supplied by the engine for one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentState {
    /// Active fires.
    pub fires: StructuredValue,
    /// Fire intensities.
    pub intensity: StructuredValue,
    /// Suppressant levels.
    pub suppressants: StructuredValue,
    /// Suppressant capacities.
    pub capacity: StructuredValue,
    /// Equipment state.
    pub equipment: StructuredValue,
    /// Environment-level view of the agent population.
    pub agents: StructuredValue,
}

impl EnvironmentState {
    /// A state where every field is an empty sequence.
    pub const fn empty() -> Self {
        Self {
            fires: StructuredValue::empty_sequence(),
            intensity: StructuredValue::empty_sequence(),
            suppressants: StructuredValue::empty_sequence(),
            capacity: StructuredValue::empty_sequence(),
            equipment: StructuredValue::empty_sequence(),
            agents: StructuredValue::empty_sequence(),
        }
    }
}

/// Snapshot of environment-wide state at one timestep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentLog {
    /// Surrogate identifier.
    pub id: EnvironmentLogId,
    /// The timestep this snapshot belongs to.
    pub timestep_id: TimestepId,
    /// The recorded state.
    pub state: EnvironmentState,
}

/// One agent's interaction with its environment for one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStep {
    /// Reward received this step. Must be finite.
    pub reward: f64,
    /// Index of the action the agent took.
    pub action_field: i64,
    /// Index of the task the agent was assigned.
    pub task_field: i64,
    /// Structured action detail.
    pub action_map: StructuredValue,
    /// Structured observation the agent received.
    pub observation_map: StructuredValue,
}

/// Snapshot of one agent at one timestep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentLog {
    /// Surrogate identifier.
    pub id: AgentLogId,
    /// The timestep this snapshot belongs to.
    pub timestep_id: TimestepId,
    /// The agent this snapshot describes.
    pub agent_id: AgentId,
    /// The recorded step.
    pub step: AgentStep,
}

/// One element of a reconstructed time series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry<T> {
    /// Step ordinal of the owning timestep.
    pub timestep: u64,
    /// The log recorded at that step.
    pub log: T,
}
