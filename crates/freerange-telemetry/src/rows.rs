//! Raw table rows and the conversions between rows and domain records.
//!
//! Rows use storage types (`i64`, JSON text) and are converted into the
//! records of [`freerange_types`] on the way out. Structured payload columns
//! are decoded here; a column that fails to decode fails the whole read.

use chrono::{DateTime, Utc};
use freerange_types::{
    Agent, AgentId, AgentLog, AgentLogId, AgentStep, EntityKind, Environment, EnvironmentId,
    EnvironmentLog, EnvironmentLogId, EnvironmentState, Simulation, SimulationId,
    StructuredValue, TimelineEntry, Timestep, TimestepId,
};
use sqlx::SqliteConnection;

use crate::error::TelemetryError;

/// Convert a caller-supplied timestep ordinal to its storage form.
pub(crate) fn ordinal_to_db(ordinal: u64) -> Result<i64, TelemetryError> {
    i64::try_from(ordinal)
        .ok()
        .ok_or(TelemetryError::OrdinalOutOfRange(ordinal))
}

/// Convert a stored ordinal back. The schema forbids negative values.
pub(crate) fn ordinal_from_db(ordinal: i64) -> u64 {
    u64::try_from(ordinal).unwrap_or(0)
}

/// Validate and encode one payload column.
pub(crate) fn encode_field(
    field: &'static str,
    value: &StructuredValue,
) -> Result<String, TelemetryError> {
    value
        .encode()
        .map_err(|source| TelemetryError::InvalidPayload { field, source })
}

fn decode_field(field: &'static str, text: &str) -> Result<StructuredValue, TelemetryError> {
    StructuredValue::decode(text).map_err(|source| TelemetryError::InvalidPayload { field, source })
}

const fn exists_sql(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Simulation => "SELECT EXISTS(SELECT 1 FROM simulation WHERE id = ?1)",
        EntityKind::Environment => "SELECT EXISTS(SELECT 1 FROM environment WHERE id = ?1)",
        EntityKind::Agent => "SELECT EXISTS(SELECT 1 FROM agent WHERE id = ?1)",
        EntityKind::Timestep => "SELECT EXISTS(SELECT 1 FROM environment_timestep WHERE id = ?1)",
        EntityKind::EnvironmentLog => "SELECT EXISTS(SELECT 1 FROM environment_log WHERE id = ?1)",
        EntityKind::AgentLog => "SELECT EXISTS(SELECT 1 FROM agent_log WHERE id = ?1)",
    }
}

/// Whether a row of `kind` with the given id exists.
pub(crate) async fn exists_in(
    conn: &mut SqliteConnection,
    kind: EntityKind,
    id: i64,
) -> Result<bool, TelemetryError> {
    let found = sqlx::query_scalar::<_, i64>(exists_sql(kind))
        .bind(id)
        .fetch_one(conn)
        .await?;
    Ok(found != 0)
}

/// Fail with [`TelemetryError::Reference`] unless the row exists.
pub(crate) async fn require_reference(
    conn: &mut SqliteConnection,
    kind: EntityKind,
    id: i64,
) -> Result<(), TelemetryError> {
    if exists_in(conn, kind, id).await? {
        Ok(())
    } else {
        Err(TelemetryError::Reference { kind, id })
    }
}

/// A row from the `simulation` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct SimulationRow {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl From<SimulationRow> for Simulation {
    fn from(row: SimulationRow) -> Self {
        Self {
            id: SimulationId(row.id),
            name: row.name,
            description: row.description,
            created_at: row.created_at,
        }
    }
}

/// A row from the `environment` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct EnvironmentRow {
    pub id: i64,
    pub simulation_id: i64,
    pub simulation_index: i64,
}

impl From<EnvironmentRow> for Environment {
    fn from(row: EnvironmentRow) -> Self {
        Self {
            id: EnvironmentId(row.id),
            simulation_id: SimulationId(row.simulation_id),
            simulation_index: u32::try_from(row.simulation_index).unwrap_or(u32::MAX),
        }
    }
}

/// A row from the `agent` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct AgentRow {
    pub id: i64,
    pub name: String,
    pub environment_id: i64,
}

impl From<AgentRow> for Agent {
    fn from(row: AgentRow) -> Self {
        Self {
            id: AgentId(row.id),
            name: row.name,
            environment_id: EnvironmentId(row.environment_id),
        }
    }
}

/// A row from the `environment_timestep` table.
#[derive(Debug, Clone, Copy, sqlx::FromRow)]
pub(crate) struct TimestepRow {
    pub id: i64,
    pub environment_id: i64,
    pub timestep: i64,
}

impl From<TimestepRow> for Timestep {
    fn from(row: TimestepRow) -> Self {
        Self {
            id: TimestepId(row.id),
            environment_id: EnvironmentId(row.environment_id),
            timestep: ordinal_from_db(row.timestep),
        }
    }
}

/// An `environment_log` row joined with its timestep ordinal.
#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct EnvironmentTimelineRow {
    pub timestep: i64,
    pub id: i64,
    pub simulation_timestep_id: i64,
    pub fires: String,
    pub intensity: String,
    pub suppressants: String,
    pub capacity: String,
    pub equipment: String,
    pub agents: String,
}

impl EnvironmentTimelineRow {
    pub(crate) fn into_entry(self) -> Result<TimelineEntry<EnvironmentLog>, TelemetryError> {
        let state = EnvironmentState {
            fires: decode_field("fires", &self.fires)?,
            intensity: decode_field("intensity", &self.intensity)?,
            suppressants: decode_field("suppressants", &self.suppressants)?,
            capacity: decode_field("capacity", &self.capacity)?,
            equipment: decode_field("equipment", &self.equipment)?,
            agents: decode_field("agents", &self.agents)?,
        };
        Ok(TimelineEntry {
            timestep: ordinal_from_db(self.timestep),
            log: EnvironmentLog {
                id: EnvironmentLogId(self.id),
                timestep_id: TimestepId(self.simulation_timestep_id),
                state,
            },
        })
    }
}

/// An `agent_log` row joined with its timestep ordinal.
#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct AgentTimelineRow {
    pub timestep: i64,
    pub id: i64,
    pub simulation_timestep_id: i64,
    pub agent_id: i64,
    pub reward: f64,
    pub action_field: i64,
    pub task_field: i64,
    pub action_map: String,
    pub observation_map: String,
}

impl AgentTimelineRow {
    pub(crate) fn into_entry(self) -> Result<TimelineEntry<AgentLog>, TelemetryError> {
        let step = AgentStep {
            reward: self.reward,
            action_field: self.action_field,
            task_field: self.task_field,
            action_map: decode_field("action_map", &self.action_map)?,
            observation_map: decode_field("observation_map", &self.observation_map)?,
        };
        Ok(TimelineEntry {
            timestep: ordinal_from_db(self.timestep),
            log: AgentLog {
                id: AgentLogId(self.id),
                timestep_id: TimestepId(self.simulation_timestep_id),
                agent_id: AgentId(self.agent_id),
                step,
            },
        })
    }
}
