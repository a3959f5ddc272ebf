//! The read path: reconstructed time series for analysis and replay.
//!
//! Every query first checks that its root exists and fails with
//! [`TelemetryError::NotFound`] otherwise. Timelines are ordered by timestep
//! ordinal and come in two forms: a lazy stream (`stream_*`), and a collected
//! `Vec` that either resolves completely or fails as a whole.
//!
//! Timelines are read in keyset pages of [`TIMELINE_PAGE_ROWS`] rows. A
//! connection is held only while a page is fetched, so an open stream never
//! blocks writers, even on a single-connection in-memory store. Each page
//! resumes strictly after the last ordinal already yielded: a re-query with no
//! intervening writes yields the same sequence, and steps appended while a
//! stream is open show up at its end.

use std::collections::BTreeSet;

use freerange_types::{
    Agent, AgentId, AgentLog, EntityKind, Environment, EnvironmentId, EnvironmentLog,
    Simulation, SimulationId, TimelineEntry, Timestep, TimestepId,
};
use futures::stream::{self, BoxStream};
use futures::{StreamExt, TryStreamExt};
use sqlx::SqlitePool;

use crate::error::TelemetryError;
use crate::rows::{
    AgentRow, AgentTimelineRow, EnvironmentRow, EnvironmentTimelineRow, SimulationRow,
    TimestepRow, exists_in,
};

/// A lazily decoded environment timeline.
pub type EnvironmentTimelineStream<'a> =
    BoxStream<'a, Result<TimelineEntry<EnvironmentLog>, TelemetryError>>;

/// A lazily decoded agent timeline.
pub type AgentTimelineStream<'a> = BoxStream<'a, Result<TimelineEntry<AgentLog>, TelemetryError>>;

/// Rows fetched per timeline page.
pub const TIMELINE_PAGE_ROWS: i64 = 256;

/// The lowest ordinal not yet read, or `None` once a timeline is exhausted.
type Cursor = Option<i64>;

const ENVIRONMENT_TIMELINE_PAGE_SQL: &str = r"
    SELECT t.timestep, l.id, l.simulation_timestep_id,
           l.fires, l.intensity, l.suppressants, l.capacity, l.equipment, l.agents
    FROM environment_log l
    JOIN environment_timestep t ON t.id = l.simulation_timestep_id
    WHERE t.environment_id = ?1 AND t.timestep >= ?2 AND (?3 IS NULL OR t.timestep < ?3)
    ORDER BY t.timestep
    LIMIT ?4";

const AGENT_TIMELINE_PAGE_SQL: &str = r"
    SELECT t.timestep, l.id, l.simulation_timestep_id, l.agent_id,
           l.reward, l.action_field, l.task_field, l.action_map, l.observation_map
    FROM agent_log l
    JOIN environment_timestep t ON t.id = l.simulation_timestep_id
    WHERE l.agent_id = ?1 AND t.timestep >= ?2
    ORDER BY t.timestep
    LIMIT ?3";

/// Read operations over recorded telemetry.
pub struct QueryService<'a> {
    pool: &'a SqlitePool,
}

impl<'a> QueryService<'a> {
    /// Create a query service bound to a connection pool.
    pub const fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    async fn require_root(&self, kind: EntityKind, id: i64) -> Result<(), TelemetryError> {
        let mut conn = self.pool.acquire().await?;
        if exists_in(&mut conn, kind, id).await? {
            Ok(())
        } else {
            Err(TelemetryError::NotFound { kind, id })
        }
    }

    // =========================================================================
    // Hierarchy
    // =========================================================================

    /// Fetch a simulation record.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::NotFound`] if the simulation does not exist.
    pub async fn simulation(&self, id: SimulationId) -> Result<Simulation, TelemetryError> {
        sqlx::query_as::<_, SimulationRow>(
            r"SELECT id, name, description, created_at FROM simulation WHERE id = ?1",
        )
        .bind(id.into_inner())
        .fetch_optional(self.pool)
        .await?
        .map(Simulation::from)
        .ok_or(TelemetryError::NotFound {
            kind: EntityKind::Simulation,
            id: id.into_inner(),
        })
    }

    /// Fetch an environment record.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::NotFound`] if the environment does not exist.
    pub async fn environment(&self, id: EnvironmentId) -> Result<Environment, TelemetryError> {
        sqlx::query_as::<_, EnvironmentRow>(
            r"SELECT id, simulation_id, simulation_index FROM environment WHERE id = ?1",
        )
        .bind(id.into_inner())
        .fetch_optional(self.pool)
        .await?
        .map(Environment::from)
        .ok_or(TelemetryError::NotFound {
            kind: EntityKind::Environment,
            id: id.into_inner(),
        })
    }

    /// All environments belonging to a simulation.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::NotFound`] if the simulation does not exist.
    pub async fn simulation_summary(
        &self,
        simulation_id: SimulationId,
    ) -> Result<BTreeSet<EnvironmentId>, TelemetryError> {
        self.require_root(EntityKind::Simulation, simulation_id.into_inner())
            .await?;

        let ids = sqlx::query_scalar::<_, i64>(
            r"SELECT id FROM environment WHERE simulation_id = ?1 ORDER BY simulation_index",
        )
        .bind(simulation_id.into_inner())
        .fetch_all(self.pool)
        .await?;

        Ok(ids.into_iter().map(EnvironmentId).collect())
    }

    /// All agents ever registered in an environment, in registration order.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::NotFound`] if the environment does not exist.
    pub async fn environment_agents(
        &self,
        environment_id: EnvironmentId,
    ) -> Result<Vec<Agent>, TelemetryError> {
        self.require_root(EntityKind::Environment, environment_id.into_inner())
            .await?;

        let rows = sqlx::query_as::<_, AgentRow>(
            r"SELECT id, name, environment_id FROM agent WHERE environment_id = ?1 ORDER BY id",
        )
        .bind(environment_id.into_inner())
        .fetch_all(self.pool)
        .await?;

        Ok(rows.into_iter().map(Agent::from).collect())
    }

    /// All timesteps opened for an environment, in ordinal order.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::NotFound`] if the environment does not exist.
    pub async fn timesteps(
        &self,
        environment_id: EnvironmentId,
    ) -> Result<Vec<Timestep>, TelemetryError> {
        self.require_root(EntityKind::Environment, environment_id.into_inner())
            .await?;

        let rows = sqlx::query_as::<_, TimestepRow>(
            r"SELECT id, environment_id, timestep FROM environment_timestep
              WHERE environment_id = ?1
              ORDER BY timestep",
        )
        .bind(environment_id.into_inner())
        .fetch_all(self.pool)
        .await?;

        Ok(rows.into_iter().map(Timestep::from).collect())
    }

    /// The most recently opened timestep of an environment, if any.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::NotFound`] if the environment does not exist.
    pub async fn last_timestep(
        &self,
        environment_id: EnvironmentId,
    ) -> Result<Option<Timestep>, TelemetryError> {
        self.require_root(EntityKind::Environment, environment_id.into_inner())
            .await?;

        let row = sqlx::query_as::<_, TimestepRow>(
            r"SELECT id, environment_id, timestep FROM environment_timestep
              WHERE environment_id = ?1
              ORDER BY timestep DESC
              LIMIT 1",
        )
        .bind(environment_id.into_inner())
        .fetch_optional(self.pool)
        .await?;

        Ok(row.map(Timestep::from))
    }

    // =========================================================================
    // Timelines
    // =========================================================================

    /// Stream the environment logs of an environment in timestep order.
    ///
    /// The root is checked before the stream is returned; a row that fails
    /// to decode surfaces as an `Err` item. No connection is held between
    /// pages.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::NotFound`] if the environment does not exist.
    pub async fn stream_environment_timeline(
        &self,
        environment_id: EnvironmentId,
    ) -> Result<EnvironmentTimelineStream<'a>, TelemetryError> {
        self.stream_environment_range(environment_id, 0, None)
            .await
    }

    /// The full environment timeline of an environment.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::NotFound`] if the environment does not exist,
    /// or the first error met while reading; no partial timeline is returned.
    pub async fn environment_timeline(
        &self,
        environment_id: EnvironmentId,
    ) -> Result<Vec<TimelineEntry<EnvironmentLog>>, TelemetryError> {
        self.stream_environment_timeline(environment_id)
            .await?
            .try_collect()
            .await
    }

    /// The environment timeline restricted to ordinals in `from..to`.
    ///
    /// An empty or inverted range yields an empty timeline.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::NotFound`] if the environment does not exist.
    pub async fn environment_timeline_range(
        &self,
        environment_id: EnvironmentId,
        from: u64,
        to: u64,
    ) -> Result<Vec<TimelineEntry<EnvironmentLog>>, TelemetryError> {
        // Stored ordinals never exceed i64::MAX.
        let Ok(from) = i64::try_from(from) else {
            self.require_root(EntityKind::Environment, environment_id.into_inner())
                .await?;
            return Ok(Vec::new());
        };
        let to = i64::try_from(to).ok();

        self.stream_environment_range(environment_id, from, to)
            .await?
            .try_collect()
            .await
    }

    async fn stream_environment_range(
        &self,
        environment_id: EnvironmentId,
        from: i64,
        to: Option<i64>,
    ) -> Result<EnvironmentTimelineStream<'a>, TelemetryError> {
        self.require_root(EntityKind::Environment, environment_id.into_inner())
            .await?;

        let pool = self.pool;
        let environment_id = environment_id.into_inner();
        let stream = stream::try_unfold(Some(from), move |cursor| {
            environment_page(pool, environment_id, cursor, to)
        })
        .map_ok(|rows| stream::iter(rows.into_iter().map(EnvironmentTimelineRow::into_entry)))
        .try_flatten()
        .boxed();

        Ok(stream)
    }

    /// Stream the logs of one agent in timestep order.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::NotFound`] if the agent does not exist.
    pub async fn stream_agent_timeline(
        &self,
        agent_id: AgentId,
    ) -> Result<AgentTimelineStream<'a>, TelemetryError> {
        self.require_root(EntityKind::Agent, agent_id.into_inner())
            .await?;

        let pool = self.pool;
        let agent_id = agent_id.into_inner();
        let stream = stream::try_unfold(Some(0), move |cursor| agent_page(pool, agent_id, cursor))
            .map_ok(|rows| stream::iter(rows.into_iter().map(AgentTimelineRow::into_entry)))
            .try_flatten()
            .boxed();

        Ok(stream)
    }

    /// The full timeline of one agent.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::NotFound`] if the agent does not exist, or
    /// the first error met while reading.
    pub async fn agent_timeline(
        &self,
        agent_id: AgentId,
    ) -> Result<Vec<TimelineEntry<AgentLog>>, TelemetryError> {
        self.stream_agent_timeline(agent_id)
            .await?
            .try_collect()
            .await
    }

    /// Every agent log recorded at one timestep, ordered by agent.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::NotFound`] if the timestep does not exist.
    pub async fn step_agent_logs(
        &self,
        timestep_id: TimestepId,
    ) -> Result<Vec<AgentLog>, TelemetryError> {
        self.require_root(EntityKind::Timestep, timestep_id.into_inner())
            .await?;

        let rows = sqlx::query_as::<_, AgentTimelineRow>(
            r"SELECT t.timestep, l.id, l.simulation_timestep_id, l.agent_id,
                     l.reward, l.action_field, l.task_field, l.action_map, l.observation_map
              FROM agent_log l
              JOIN environment_timestep t ON t.id = l.simulation_timestep_id
              WHERE l.simulation_timestep_id = ?1
              ORDER BY l.agent_id",
        )
        .bind(timestep_id.into_inner())
        .fetch_all(self.pool)
        .await?;

        rows.into_iter()
            .map(|row| row.into_entry().map(|entry| entry.log))
            .collect()
    }
}

/// Fetch the environment timeline page starting at `cursor`.
async fn environment_page(
    pool: &SqlitePool,
    environment_id: i64,
    cursor: Cursor,
    to: Option<i64>,
) -> Result<Option<(Vec<EnvironmentTimelineRow>, Cursor)>, TelemetryError> {
    let Some(from) = cursor else {
        return Ok(None);
    };

    let rows = sqlx::query_as::<_, EnvironmentTimelineRow>(ENVIRONMENT_TIMELINE_PAGE_SQL)
        .bind(environment_id)
        .bind(from)
        .bind(to)
        .bind(TIMELINE_PAGE_ROWS)
        .fetch_all(pool)
        .await?;

    let next = match rows.last() {
        Some(last) => last.timestep.checked_add(1),
        None => return Ok(None),
    };
    Ok(Some((rows, next)))
}

/// Fetch the agent timeline page starting at `cursor`.
async fn agent_page(
    pool: &SqlitePool,
    agent_id: i64,
    cursor: Cursor,
) -> Result<Option<(Vec<AgentTimelineRow>, Cursor)>, TelemetryError> {
    let Some(from) = cursor else {
        return Ok(None);
    };

    let rows = sqlx::query_as::<_, AgentTimelineRow>(AGENT_TIMELINE_PAGE_SQL)
        .bind(agent_id)
        .bind(from)
        .bind(TIMELINE_PAGE_ROWS)
        .fetch_all(pool)
        .await?;

    let next = match rows.last() {
        Some(last) => last.timestep.checked_add(1),
        None => return Ok(None),
    };
    Ok(Some((rows, next)))
}
