//! Single-flight deduplication for tool invocations.
//!
//! Concurrent identical requests (same run, tool, op, params hash) share
//! one underlying invocation: the first caller becomes the leader, later
//! callers wait on the published result. Successful results stay cached
//! in-process for the run's lifetime (publish-once, read-many); the
//! durable copy lives in the state store's invocation table.

use std::collections::HashMap;
use tokio::sync::{broadcast, Mutex};
use uuid::Uuid;

use crate::domain::models::InvocationKey;
use crate::domain::ports::ToolFailure;

/// Shared outcome of a deduplicated invocation.
pub type FlightResult = Result<serde_json::Value, ToolFailure>;

enum Slot {
    InFlight(broadcast::Sender<FlightResult>),
    Ready(serde_json::Value),
}

/// Role assigned to a caller entering the flight for a key.
pub enum Entry {
    /// This caller executes the invocation and must call
    /// [`SingleFlight::publish`] exactly once.
    Leader,
    /// The result is already cached.
    Ready(serde_json::Value),
    /// An identical invocation is in flight; await the receiver.
    Wait(broadcast::Receiver<FlightResult>),
}

/// In-process single-flight map, keyed by invocation cache key.
pub struct SingleFlight {
    slots: Mutex<HashMap<InvocationKey, Slot>>,
}

impl Default for SingleFlight {
    fn default() -> Self {
        Self::new()
    }
}

impl SingleFlight {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Enter the flight for `key`.
    pub async fn begin(&self, key: &InvocationKey) -> Entry {
        let mut slots = self.slots.lock().await;
        match slots.get(key) {
            Some(Slot::Ready(value)) => Entry::Ready(value.clone()),
            Some(Slot::InFlight(tx)) => Entry::Wait(tx.subscribe()),
            None => {
                let (tx, _) = broadcast::channel(16);
                slots.insert(key.clone(), Slot::InFlight(tx));
                Entry::Leader
            }
        }
    }

    /// Publish the leader's result to all waiters.
    ///
    /// Successes replace the slot with a cache entry; failures clear the
    /// slot so a later identical request can try again.
    pub async fn publish(&self, key: &InvocationKey, result: FlightResult) {
        let mut slots = self.slots.lock().await;
        let Some(slot) = slots.remove(key) else {
            return;
        };
        if let Slot::InFlight(tx) = slot {
            let _ = tx.send(result.clone());
        }
        if let Ok(value) = result {
            slots.insert(key.clone(), Slot::Ready(value));
        }
    }

    /// Pre-seed the cache, e.g. from the durable store on resume.
    pub async fn seed(&self, key: &InvocationKey, value: serde_json::Value) {
        let mut slots = self.slots.lock().await;
        slots.entry(key.clone()).or_insert(Slot::Ready(value));
    }

    /// Drop all entries belonging to a finished run.
    pub async fn purge_run(&self, run_id: Uuid) {
        let mut slots = self.slots.lock().await;
        slots.retain(|key, _| key.run_id != run_id);
    }

    /// Number of live entries (cached + in flight), for tests/monitoring.
    pub async fn len(&self) -> usize {
        self.slots.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(run_id: Uuid, q: &str) -> InvocationKey {
        InvocationKey::new(run_id, "serp", "web_search", &json!({ "q": q }))
    }

    #[tokio::test]
    async fn test_leader_then_cached() {
        let flight = SingleFlight::new();
        let run = Uuid::new_v4();
        let k = key(run, "saas");

        assert!(matches!(flight.begin(&k).await, Entry::Leader));
        flight.publish(&k, Ok(json!(["r1", "r2"]))).await;

        match flight.begin(&k).await {
            Entry::Ready(value) => assert_eq!(value, json!(["r1", "r2"])),
            _ => panic!("expected cached entry"),
        }
    }

    #[tokio::test]
    async fn test_concurrent_waiters_share_result() {
        let flight = std::sync::Arc::new(SingleFlight::new());
        let run = Uuid::new_v4();
        let k = key(run, "saas");

        assert!(matches!(flight.begin(&k).await, Entry::Leader));

        let Entry::Wait(mut rx) = flight.begin(&k).await else {
            panic!("expected waiter");
        };

        let publisher = std::sync::Arc::clone(&flight);
        let pk = k.clone();
        let handle = tokio::spawn(async move {
            publisher.publish(&pk, Ok(json!("shared"))).await;
        });

        let result = rx.recv().await.unwrap();
        assert_eq!(result.unwrap(), json!("shared"));
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_failure_not_cached() {
        let flight = SingleFlight::new();
        let run = Uuid::new_v4();
        let k = key(run, "saas");

        assert!(matches!(flight.begin(&k).await, Entry::Leader));
        flight
            .publish(
                &k,
                Err(ToolFailure::new(
                    crate::domain::errors::ErrorClass::Transient,
                    "connection reset",
                )),
            )
            .await;

        // Next identical request leads again instead of hitting a cache.
        assert!(matches!(flight.begin(&k).await, Entry::Leader));
    }

    #[tokio::test]
    async fn test_purge_run_scoping() {
        let flight = SingleFlight::new();
        let run_a = Uuid::new_v4();
        let run_b = Uuid::new_v4();

        let ka = key(run_a, "x");
        let kb = key(run_b, "x");
        flight.seed(&ka, json!(1)).await;
        flight.seed(&kb, json!(2)).await;
        assert_eq!(flight.len().await, 2);

        flight.purge_run(run_a).await;
        assert_eq!(flight.len().await, 1);
        assert!(matches!(flight.begin(&kb).await, Entry::Ready(_)));
    }

    #[tokio::test]
    async fn test_seed_does_not_clobber() {
        let flight = SingleFlight::new();
        let run = Uuid::new_v4();
        let k = key(run, "saas");

        flight.seed(&k, json!("first")).await;
        flight.seed(&k, json!("second")).await;
        match flight.begin(&k).await {
            Entry::Ready(value) => assert_eq!(value, json!("first")),
            _ => panic!("expected cached entry"),
        }
    }
}
