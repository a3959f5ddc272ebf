//! Error types for the telemetry layer.
//!
//! All failures are reported synchronously through [`TelemetryError`]. The
//! layer never retries: a rejected write is surfaced to the simulation loop,
//! which decides whether to retry, skip logging, or abort the run.
//!
//! Database errors raised by constraint checks are classified into the typed
//! variants by [`Constraint::of`]; everything else stays a
//! [`TelemetryError::Storage`].

use freerange_types::{AgentId, EntityKind, EnvironmentId, PayloadError, SimulationId, TimestepId};

/// Message raised by the `environment_timestep` ordering trigger.
pub(crate) const ORDERING_TRIGGER_MESSAGE: &str = "timestep ordering violation";

/// Errors that can occur in the telemetry layer.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// The storage engine is unavailable or rejected the operation.
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// Applying the schema failed.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A foreign key target does not exist.
    #[error("{kind} {id} does not exist")]
    Reference {
        /// The kind of the missing entity.
        kind: EntityKind,
        /// The identifier that was looked up.
        id: i64,
    },

    /// A timestep ordinal is not strictly greater than the last recorded one.
    #[error(
        "timestep {attempted} for environment {environment} is not after the last recorded timestep ({last:?})"
    )]
    OrderingViolation {
        /// The environment being advanced.
        environment: EnvironmentId,
        /// The ordinal that was rejected.
        attempted: u64,
        /// The last ordinal recorded for the environment, if any.
        last: Option<u64>,
    },

    /// A log already exists for this timestep (and agent, for agent logs).
    #[error("duplicate log for timestep {timestep} (agent {agent:?})")]
    DuplicateLog {
        /// The timestep that was already logged.
        timestep: TimestepId,
        /// The agent, for agent logs.
        agent: Option<AgentId>,
    },

    /// The simulation already has an environment at this index.
    #[error("simulation {simulation} already has an environment at index {index}")]
    DuplicateEnvironment {
        /// The owning simulation.
        simulation: SimulationId,
        /// The index that is already taken.
        index: u32,
    },

    /// An agent log names an agent from a different environment than its timestep.
    #[error("agent {agent} does not belong to the environment of timestep {timestep}")]
    AgentOutsideEnvironment {
        /// The agent being logged.
        agent: AgentId,
        /// The timestep being logged.
        timestep: TimestepId,
    },

    /// A query root does not exist.
    #[error("{kind} {id} not found")]
    NotFound {
        /// The kind of the missing root.
        kind: EntityKind,
        /// The identifier that was looked up.
        id: i64,
    },

    /// A payload failed validation or could not be decoded.
    #[error("invalid payload in {field}: {source}")]
    InvalidPayload {
        /// The column the payload belongs to.
        field: &'static str,
        /// The underlying payload error.
        source: PayloadError,
    },

    /// A reward is NaN or infinite.
    #[error("reward must be finite, got {0}")]
    NonFiniteReward(f64),

    /// A timestep ordinal does not fit the storage integer range.
    #[error("timestep ordinal {0} exceeds the storage range")]
    OrdinalOutOfRange(u64),
}

impl TelemetryError {
    /// Whether this error reports an already-logged timestep or agent.
    pub const fn is_duplicate_log(&self) -> bool {
        matches!(self, Self::DuplicateLog { .. })
    }

    /// Whether this error reports a missing foreign key target.
    pub const fn is_reference(&self) -> bool {
        matches!(self, Self::Reference { .. })
    }

    /// Whether this error reports an out-of-order timestep.
    pub const fn is_ordering_violation(&self) -> bool {
        matches!(self, Self::OrderingViolation { .. })
    }
}

/// The constraint family a database error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Constraint {
    /// A `UNIQUE` constraint.
    Unique,
    /// A `REFERENCES` constraint.
    ForeignKey,
    /// The timestep ordering trigger.
    Ordering,
}

impl Constraint {
    /// Classify a [`sqlx::Error`], returning `None` for non-constraint failures.
    pub(crate) fn of(err: &sqlx::Error) -> Option<Self> {
        let sqlx::Error::Database(db) = err else {
            return None;
        };
        if db.message().contains(ORDERING_TRIGGER_MESSAGE) {
            Some(Self::Ordering)
        } else if db.is_unique_violation() {
            Some(Self::Unique)
        } else if db.is_foreign_key_violation() {
            Some(Self::ForeignKey)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_database_errors_are_unclassified() {
        assert_eq!(Constraint::of(&sqlx::Error::RowNotFound), None);
        assert_eq!(Constraint::of(&sqlx::Error::PoolTimedOut), None);
    }

    #[test]
    fn reference_error_display() {
        let err = TelemetryError::Reference {
            kind: EntityKind::Environment,
            id: 9,
        };
        assert_eq!(err.to_string(), "environment 9 does not exist");
        assert!(err.is_reference());
    }

    #[test]
    fn ordering_violation_display() {
        let err = TelemetryError::OrderingViolation {
            environment: EnvironmentId(1),
            attempted: 0,
            last: Some(0),
        };
        let msg = err.to_string();
        assert!(msg.contains("timestep 0"));
        assert!(msg.contains("environment 1"));
        assert!(err.is_ordering_violation());
    }

    #[test]
    fn storage_error_from_sqlx() {
        let err = TelemetryError::from(sqlx::Error::PoolClosed);
        assert!(matches!(err, TelemetryError::Storage(_)));
        assert!(!err.is_duplicate_log());
    }
}
