//! Type-safe surrogate identifiers.
//!
//! Every persisted entity has a strongly-typed ID so that a timestep id can
//! never be passed where an agent id is expected. Identifiers are positive
//! integers handed out by the telemetry layer's identity allocator, strictly
//! increasing per entity kind and starting at 1.

use serde::{Deserialize, Serialize};

/// Generates a newtype wrapper around an `i64` surrogate key with standard derives.
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            /// Return the inner storage key.
            pub const fn into_inner(self) -> i64 {
                self.0
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id! {
    /// Identifier of one full simulation run.
    SimulationId
}

define_id! {
    /// Identifier of one simulated world instance within a simulation.
    EnvironmentId
}

define_id! {
    /// Identifier of one actor within an environment.
    AgentId
}

define_id! {
    /// Identifier of one discrete step of one environment.
    TimestepId
}

define_id! {
    /// Identifier of an environment-wide snapshot row.
    EnvironmentLogId
}

define_id! {
    /// Identifier of a per-agent snapshot row.
    AgentLogId
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_display_matches_inner() {
        let id = TimestepId(42);
        assert_eq!(id.to_string(), "42");
        assert_eq!(id.into_inner(), 42);
    }

    #[test]
    fn id_serializes_transparently() {
        let json = serde_json::to_string(&AgentId(7)).ok();
        assert_eq!(json.as_deref(), Some("7"));
        let restored: Result<AgentId, _> = serde_json::from_str("7");
        assert_eq!(restored.ok(), Some(AgentId(7)));
    }

    #[test]
    fn conversions_roundtrip() {
        let raw: i64 = SimulationId::from(3).into();
        assert_eq!(raw, 3);
    }
}
