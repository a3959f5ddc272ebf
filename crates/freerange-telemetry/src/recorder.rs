//! The write path for per-step telemetry.
//!
//! After a timestep is opened, the engine writes one environment log and one
//! agent log per active agent. The two kinds of write have no ordering
//! between them; each only requires that its timestep already exists.
//!
//! Payloads are validated and encoded before a transaction is opened, so a
//! malformed payload never reaches the store. Writes are append-only and not
//! idempotent: repeating a successful write fails with
//! [`TelemetryError::DuplicateLog`].
//!
//! ```text
//! begin_timestep(env, t) --> TimestepId
//!   |
//!   +-- record_environment_log(ts, state)          --> environment_log
//!   +-- record_agent_log(ts, agent, step)  (xN)    --> agent_log
//!   |
//!   +-- or record_step(ts, state, agents)          --> both, one transaction
//! ```

use freerange_types::{
    AgentId, AgentLogId, AgentStep, EntityKind, EnvironmentId, EnvironmentLogId,
    EnvironmentState, TimestepId,
};
use sqlx::{SqliteConnection, SqlitePool};

use crate::error::{Constraint, TelemetryError};
use crate::identity::allocate_in;
use crate::rows::encode_field;

/// Identifiers written by [`Recorder::record_step`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRecord {
    /// The environment log row.
    pub environment_log: EnvironmentLogId,
    /// The agent log rows, in input order.
    pub agent_logs: Vec<AgentLogId>,
}

/// Operations on the `environment_log` and `agent_log` tables.
pub struct Recorder<'a> {
    pool: &'a SqlitePool,
}

impl<'a> Recorder<'a> {
    /// Create a recorder bound to a connection pool.
    pub const fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Record the environment-wide snapshot for a timestep.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::InvalidPayload`] if a field fails validation.
    /// Returns [`TelemetryError::Reference`] if the timestep does not exist.
    /// Returns [`TelemetryError::DuplicateLog`] if the timestep already has
    /// an environment log.
    pub async fn record_environment_log(
        &self,
        timestep_id: TimestepId,
        state: &EnvironmentState,
    ) -> Result<EnvironmentLogId, TelemetryError> {
        let encoded = EncodedEnvironmentState::encode(state)?;

        let mut tx = self.pool.begin().await?;
        let id = allocate_in(&mut tx, EntityKind::EnvironmentLog).await?;
        timestep_environment(&mut tx, timestep_id).await?;
        insert_environment_log(&mut tx, id, timestep_id, &encoded).await?;
        tx.commit().await?;

        Ok(EnvironmentLogId(id))
    }

    /// Record one agent's step.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::InvalidPayload`] or
    /// [`TelemetryError::NonFiniteReward`] if the step fails validation.
    /// Returns [`TelemetryError::Reference`] if the timestep or the agent
    /// does not exist.
    /// Returns [`TelemetryError::AgentOutsideEnvironment`] if the agent
    /// belongs to a different environment than the timestep.
    /// Returns [`TelemetryError::DuplicateLog`] if this agent was already
    /// logged for this timestep.
    pub async fn record_agent_log(
        &self,
        timestep_id: TimestepId,
        agent_id: AgentId,
        step: &AgentStep,
    ) -> Result<AgentLogId, TelemetryError> {
        let encoded = EncodedAgentStep::encode(step)?;

        let mut tx = self.pool.begin().await?;
        let id = allocate_in(&mut tx, EntityKind::AgentLog).await?;
        let environment_id = timestep_environment(&mut tx, timestep_id).await?;
        require_agent_in(&mut tx, agent_id, environment_id, timestep_id).await?;
        insert_agent_log(&mut tx, id, timestep_id, agent_id, &encoded).await?;
        tx.commit().await?;

        Ok(AgentLogId(id))
    }

    /// Record a whole step in one transaction: the environment snapshot and
    /// every agent's step.
    ///
    /// Either every row is written or none is.
    ///
    /// # Errors
    ///
    /// Any error of [`Recorder::record_environment_log`] or
    /// [`Recorder::record_agent_log`]; a repeated agent within `agents` fails
    /// with [`TelemetryError::DuplicateLog`].
    pub async fn record_step(
        &self,
        timestep_id: TimestepId,
        state: &EnvironmentState,
        agents: &[(AgentId, AgentStep)],
    ) -> Result<StepRecord, TelemetryError> {
        let encoded_state = EncodedEnvironmentState::encode(state)?;
        let encoded_agents = agents
            .iter()
            .map(|(agent_id, step)| {
                EncodedAgentStep::encode(step).map(|encoded| (*agent_id, encoded))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut tx = self.pool.begin().await?;
        let env_log_id = allocate_in(&mut tx, EntityKind::EnvironmentLog).await?;
        let environment_id = timestep_environment(&mut tx, timestep_id).await?;
        insert_environment_log(&mut tx, env_log_id, timestep_id, &encoded_state).await?;

        let mut agent_logs = Vec::with_capacity(encoded_agents.len());
        for (agent_id, encoded) in &encoded_agents {
            let id = allocate_in(&mut tx, EntityKind::AgentLog).await?;
            require_agent_in(&mut tx, *agent_id, environment_id, timestep_id).await?;
            insert_agent_log(&mut tx, id, timestep_id, *agent_id, encoded).await?;
            agent_logs.push(AgentLogId(id));
        }

        tx.commit().await?;

        tracing::debug!(
            %timestep_id,
            agents = agent_logs.len(),
            "Recorded step"
        );
        Ok(StepRecord {
            environment_log: EnvironmentLogId(env_log_id),
            agent_logs,
        })
    }
}

/// An [`EnvironmentState`] with every field validated and encoded.
struct EncodedEnvironmentState {
    fires: String,
    intensity: String,
    suppressants: String,
    capacity: String,
    equipment: String,
    agents: String,
}

impl EncodedEnvironmentState {
    fn encode(state: &EnvironmentState) -> Result<Self, TelemetryError> {
        Ok(Self {
            fires: encode_field("fires", &state.fires)?,
            intensity: encode_field("intensity", &state.intensity)?,
            suppressants: encode_field("suppressants", &state.suppressants)?,
            capacity: encode_field("capacity", &state.capacity)?,
            equipment: encode_field("equipment", &state.equipment)?,
            agents: encode_field("agents", &state.agents)?,
        })
    }
}

/// An [`AgentStep`] with a finite reward and encoded maps.
struct EncodedAgentStep {
    reward: f64,
    action_field: i64,
    task_field: i64,
    action_map: String,
    observation_map: String,
}

impl EncodedAgentStep {
    fn encode(step: &AgentStep) -> Result<Self, TelemetryError> {
        if !step.reward.is_finite() {
            return Err(TelemetryError::NonFiniteReward(step.reward));
        }
        Ok(Self {
            reward: step.reward,
            action_field: step.action_field,
            task_field: step.task_field,
            action_map: encode_field("action_map", &step.action_map)?,
            observation_map: encode_field("observation_map", &step.observation_map)?,
        })
    }
}

/// The environment a timestep belongs to, or [`TelemetryError::Reference`].
async fn timestep_environment(
    conn: &mut SqliteConnection,
    timestep_id: TimestepId,
) -> Result<EnvironmentId, TelemetryError> {
    sqlx::query_scalar::<_, i64>(r"SELECT environment_id FROM environment_timestep WHERE id = ?1")
        .bind(timestep_id.into_inner())
        .fetch_optional(conn)
        .await?
        .map(EnvironmentId)
        .ok_or(TelemetryError::Reference {
            kind: EntityKind::Timestep,
            id: timestep_id.into_inner(),
        })
}

/// Check that `agent_id` exists and belongs to `environment_id`.
async fn require_agent_in(
    conn: &mut SqliteConnection,
    agent_id: AgentId,
    environment_id: EnvironmentId,
    timestep_id: TimestepId,
) -> Result<(), TelemetryError> {
    let owner = sqlx::query_scalar::<_, i64>(r"SELECT environment_id FROM agent WHERE id = ?1")
        .bind(agent_id.into_inner())
        .fetch_optional(conn)
        .await?;

    match owner {
        None => Err(TelemetryError::Reference {
            kind: EntityKind::Agent,
            id: agent_id.into_inner(),
        }),
        Some(owner) if owner != environment_id.into_inner() => {
            Err(TelemetryError::AgentOutsideEnvironment {
                agent: agent_id,
                timestep: timestep_id,
            })
        }
        Some(_) => Ok(()),
    }
}

async fn insert_environment_log(
    conn: &mut SqliteConnection,
    id: i64,
    timestep_id: TimestepId,
    encoded: &EncodedEnvironmentState,
) -> Result<(), TelemetryError> {
    sqlx::query(
        r"INSERT INTO environment_log
          (id, simulation_timestep_id, fires, intensity, suppressants, capacity, equipment, agents)
          VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )
    .bind(id)
    .bind(timestep_id.into_inner())
    .bind(encoded.fires.as_str())
    .bind(encoded.intensity.as_str())
    .bind(encoded.suppressants.as_str())
    .bind(encoded.capacity.as_str())
    .bind(encoded.equipment.as_str())
    .bind(encoded.agents.as_str())
    .execute(conn)
    .await
    .map_err(|e| classify_log_error(e, timestep_id, None))?;

    tracing::debug!(environment_log_id = id, %timestep_id, "Recorded environment log");
    Ok(())
}

async fn insert_agent_log(
    conn: &mut SqliteConnection,
    id: i64,
    timestep_id: TimestepId,
    agent_id: AgentId,
    encoded: &EncodedAgentStep,
) -> Result<(), TelemetryError> {
    sqlx::query(
        r"INSERT INTO agent_log
          (id, simulation_timestep_id, agent_id, reward, action_field, task_field, action_map, observation_map)
          VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )
    .bind(id)
    .bind(timestep_id.into_inner())
    .bind(agent_id.into_inner())
    .bind(encoded.reward)
    .bind(encoded.action_field)
    .bind(encoded.task_field)
    .bind(encoded.action_map.as_str())
    .bind(encoded.observation_map.as_str())
    .execute(conn)
    .await
    .map_err(|e| classify_log_error(e, timestep_id, Some(agent_id)))?;

    tracing::debug!(agent_log_id = id, %timestep_id, %agent_id, "Recorded agent log");
    Ok(())
}

fn classify_log_error(
    err: sqlx::Error,
    timestep_id: TimestepId,
    agent_id: Option<AgentId>,
) -> TelemetryError {
    match Constraint::of(&err) {
        Some(Constraint::Unique) => {
            tracing::warn!(%timestep_id, ?agent_id, "Rejected duplicate log");
            TelemetryError::DuplicateLog {
                timestep: timestep_id,
                agent: agent_id,
            }
        }
        Some(Constraint::ForeignKey) => agent_id.map_or(
            TelemetryError::Reference {
                kind: EntityKind::Timestep,
                id: timestep_id.into_inner(),
            },
            |agent| TelemetryError::Reference {
                kind: EntityKind::Agent,
                id: agent.into_inner(),
            },
        ),
        Some(Constraint::Ordering) | None => TelemetryError::Storage(err),
    }
}
