//! Enumeration types shared by the telemetry layer.

use serde::{Deserialize, Serialize};

/// The kinds of persisted entity that receive surrogate identifiers.
///
/// Identifier sequences are scoped per kind: an agent and a timestep may both
/// carry id 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// A top-level simulation run.
    Simulation,
    /// A world instance within a simulation.
    Environment,
    /// An actor within an environment.
    Agent,
    /// One step of one environment.
    Timestep,
    /// An environment-wide snapshot at one step.
    EnvironmentLog,
    /// A per-agent snapshot at one step.
    AgentLog,
}

impl EntityKind {
    /// Every entity kind, in ownership order.
    pub const ALL: [Self; 6] = [
        Self::Simulation,
        Self::Environment,
        Self::Agent,
        Self::Timestep,
        Self::EnvironmentLog,
        Self::AgentLog,
    ];

    /// The stable name of this kind, as stored in the `id_sequence` table.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Simulation => "simulation",
            Self::Environment => "environment",
            Self::Agent => "agent",
            Self::Timestep => "environment_timestep",
            Self::EnvironmentLog => "environment_log",
            Self::AgentLog => "agent_log",
        }
    }
}

impl core::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_are_unique() {
        let mut names: Vec<&str> = EntityKind::ALL.into_iter().map(EntityKind::as_str).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), EntityKind::ALL.len());
    }

    #[test]
    fn timestep_maps_to_table_name() {
        assert_eq!(EntityKind::Timestep.to_string(), "environment_timestep");
    }
}
