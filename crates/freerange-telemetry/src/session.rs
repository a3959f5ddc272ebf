//! Session management: the top of the ownership hierarchy.
//!
//! A simulation engine opens a [`Simulation`](freerange_types::Simulation)
//! at run start, creates its environments, registers agents as they appear,
//! and opens one timestep per environment step.
//!
//! # Timestep ordering
//!
//! `begin_timestep` never compares against an in-process counter. The
//! `environment_timestep` table carries a `UNIQUE (environment_id, timestep)`
//! constraint and a `BEFORE INSERT` trigger that rejects any ordinal not
//! strictly greater than the environment's current maximum. Whichever of two
//! racing callers commits first wins; the other receives
//! [`TelemetryError::OrderingViolation`]. This holds across threads,
//! processes, and restarts.

use chrono::Utc;
use freerange_types::{AgentId, EntityKind, EnvironmentId, SimulationId, TimestepId};
use sqlx::{SqliteConnection, SqlitePool};

use crate::error::{Constraint, TelemetryError};
use crate::identity::allocate_in;
use crate::rows::{ordinal_from_db, ordinal_to_db, require_reference};

/// Write operations that create simulations, environments, agents and timesteps.
pub struct SessionManager<'a> {
    pool: &'a SqlitePool,
}

impl<'a> SessionManager<'a> {
    /// Create a session manager bound to a connection pool.
    pub const fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Open a new simulation run stamped with the current wall-clock time.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::Storage`] if the store rejects the write.
    pub async fn begin_simulation(
        &self,
        name: &str,
        description: &str,
    ) -> Result<SimulationId, TelemetryError> {
        let mut tx = self.pool.begin().await?;
        let id = allocate_in(&mut tx, EntityKind::Simulation).await?;
        let created_at = Utc::now();

        sqlx::query(
            r"INSERT INTO simulation (id, name, description, created_at)
              VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(id)
        .bind(name)
        .bind(description)
        .bind(created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(simulation_id = id, name, "Began simulation");
        Ok(SimulationId(id))
    }

    /// Create environment number `index` of a simulation.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::Reference`] if the simulation does not exist.
    /// Returns [`TelemetryError::DuplicateEnvironment`] if the simulation
    /// already has an environment at `index`.
    pub async fn begin_environment(
        &self,
        simulation_id: SimulationId,
        index: u32,
    ) -> Result<EnvironmentId, TelemetryError> {
        let mut tx = self.pool.begin().await?;
        let id = allocate_in(&mut tx, EntityKind::Environment).await?;
        require_reference(&mut tx, EntityKind::Simulation, simulation_id.into_inner()).await?;

        sqlx::query(
            r"INSERT INTO environment (id, simulation_id, simulation_index)
              VALUES (?1, ?2, ?3)",
        )
        .bind(id)
        .bind(simulation_id.into_inner())
        .bind(i64::from(index))
        .execute(&mut *tx)
        .await
        .map_err(|e| match Constraint::of(&e) {
            Some(Constraint::Unique) => TelemetryError::DuplicateEnvironment {
                simulation: simulation_id,
                index,
            },
            Some(Constraint::ForeignKey) => TelemetryError::Reference {
                kind: EntityKind::Simulation,
                id: simulation_id.into_inner(),
            },
            _ => TelemetryError::Storage(e),
        })?;

        tx.commit().await?;

        tracing::debug!(
            environment_id = id,
            %simulation_id,
            index,
            "Began environment"
        );
        Ok(EnvironmentId(id))
    }

    /// Register an agent in an environment.
    ///
    /// Agents may be registered at any point in the environment's run. An
    /// agent's identity is permanent once created.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::Reference`] if the environment does not exist.
    pub async fn register_agent(
        &self,
        environment_id: EnvironmentId,
        name: &str,
    ) -> Result<AgentId, TelemetryError> {
        let mut tx = self.pool.begin().await?;
        let id = insert_agent(&mut tx, environment_id, name).await?;
        tx.commit().await?;
        Ok(id)
    }

    /// Register several agents in one transaction.
    ///
    /// Either every agent is registered or none is. Identifiers are returned
    /// in the order of `names`.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::Reference`] if the environment does not exist.
    pub async fn register_agents<S: AsRef<str>>(
        &self,
        environment_id: EnvironmentId,
        names: &[S],
    ) -> Result<Vec<AgentId>, TelemetryError> {
        let mut tx = self.pool.begin().await?;
        if names.is_empty() {
            require_reference(&mut tx, EntityKind::Environment, environment_id.into_inner())
                .await?;
            return Ok(Vec::new());
        }

        let mut ids = Vec::with_capacity(names.len());
        for name in names {
            ids.push(insert_agent(&mut tx, environment_id, name.as_ref()).await?);
        }

        tx.commit().await?;
        Ok(ids)
    }

    /// Open step `timestep_ordinal` of an environment.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::Reference`] if the environment does not exist.
    /// Returns [`TelemetryError::OrderingViolation`] if `timestep_ordinal` is
    /// not strictly greater than the last ordinal recorded for the environment.
    /// Returns [`TelemetryError::OrdinalOutOfRange`] if the ordinal exceeds
    /// the storage integer range.
    pub async fn begin_timestep(
        &self,
        environment_id: EnvironmentId,
        timestep_ordinal: u64,
    ) -> Result<TimestepId, TelemetryError> {
        let ordinal = ordinal_to_db(timestep_ordinal)?;

        let mut tx = self.pool.begin().await?;
        let id = allocate_in(&mut tx, EntityKind::Timestep).await?;
        require_reference(&mut tx, EntityKind::Environment, environment_id.into_inner()).await?;

        let inserted = sqlx::query(
            r"INSERT INTO environment_timestep (id, environment_id, timestep)
              VALUES (?1, ?2, ?3)",
        )
        .bind(id)
        .bind(environment_id.into_inner())
        .bind(ordinal)
        .execute(&mut *tx)
        .await;

        if let Err(e) = inserted {
            return Err(match Constraint::of(&e) {
                Some(Constraint::Ordering | Constraint::Unique) => {
                    let last = last_ordinal(&mut tx, environment_id).await?;
                    tracing::warn!(
                        %environment_id,
                        attempted = timestep_ordinal,
                        last,
                        "Rejected out-of-order timestep"
                    );
                    TelemetryError::OrderingViolation {
                        environment: environment_id,
                        attempted: timestep_ordinal,
                        last,
                    }
                }
                Some(Constraint::ForeignKey) => TelemetryError::Reference {
                    kind: EntityKind::Environment,
                    id: environment_id.into_inner(),
                },
                None => TelemetryError::Storage(e),
            });
        }

        tx.commit().await?;

        tracing::debug!(
            timestep_id = id,
            %environment_id,
            timestep = timestep_ordinal,
            "Began timestep"
        );
        Ok(TimestepId(id))
    }
}

async fn insert_agent(
    conn: &mut SqliteConnection,
    environment_id: EnvironmentId,
    name: &str,
) -> Result<AgentId, TelemetryError> {
    let id = allocate_in(conn, EntityKind::Agent).await?;

    sqlx::query(r"INSERT INTO agent (id, name, environment_id) VALUES (?1, ?2, ?3)")
        .bind(id)
        .bind(name)
        .bind(environment_id.into_inner())
        .execute(&mut *conn)
        .await
        .map_err(|e| match Constraint::of(&e) {
            Some(Constraint::ForeignKey) => TelemetryError::Reference {
                kind: EntityKind::Environment,
                id: environment_id.into_inner(),
            },
            _ => TelemetryError::Storage(e),
        })?;

    tracing::debug!(agent_id = id, %environment_id, name, "Registered agent");
    Ok(AgentId(id))
}

async fn last_ordinal(
    conn: &mut SqliteConnection,
    environment_id: EnvironmentId,
) -> Result<Option<u64>, TelemetryError> {
    let last = sqlx::query_scalar::<_, Option<i64>>(
        r"SELECT MAX(timestep) FROM environment_timestep WHERE environment_id = ?1",
    )
    .bind(environment_id.into_inner())
    .fetch_one(conn)
    .await?;
    Ok(last.map(ordinal_from_db))
}
