//! Strongly-typed identifiers.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a fresh random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wraps an existing UUID.
            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            /// Returns the underlying UUID.
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Identifies one simulation run.
    RunId
);
uuid_id!(
    /// Identifies one simulated participant within a run.
    AgentInstanceId
);
uuid_id!(
    /// Identifies a personality/model profile an instance is spawned from.
    ProfileId
);
uuid_id!(
    /// Identifies the participant identity backing an agent instance.
    ParticipantId
);
uuid_id!(
    /// Identifies the community whose requests and notes a run works on.
    CommunityId
);
uuid_id!(
    /// Identifies a stored orchestrator configuration.
    ConfigId
);
uuid_id!(RequestId);
uuid_id!(NoteId);
