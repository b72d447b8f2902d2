//! Durable agent checkpoint model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A durable snapshot of an agent's intermediate state.
///
/// Versions are strictly increasing per task; resuming from the latest
/// checkpoint is indistinguishable from fresh execution up to side effects
/// already committed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub task_id: Uuid,
    /// Monotonically increasing per task, starting at 1.
    pub version: u64,
    /// Opaque payload; the runtime stores the agent's serialized state.
    pub payload: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(task_id: Uuid, version: u64, payload: Vec<u8>) -> Self {
        Self {
            task_id,
            version,
            payload,
            created_at: Utc::now(),
        }
    }

    /// Deserialize the payload as the runtime's JSON state envelope.
    pub fn state(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }

    /// Build a checkpoint from a JSON state envelope.
    pub fn from_state(task_id: Uuid, version: u64, state: &serde_json::Value) -> Result<Self, serde_json::Error> {
        Ok(Self::new(task_id, version, serde_json::to_vec(state)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_state_round_trip() {
        let task_id = Uuid::new_v4();
        let state = json!({"cursor": 42, "leads": ["a@example.com"]});
        let cp = Checkpoint::from_state(task_id, 3, &state).unwrap();
        assert_eq!(cp.version, 3);
        assert_eq!(cp.state().unwrap(), state);
    }
}
