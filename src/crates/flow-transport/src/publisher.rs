//! Publisher bridge: fans batches of encoded frames out to subscribers via
//! a broadcast channel, mirroring how the rest of this workspace exposes
//! server-sent events to many readers without blocking the producer.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::encode::encode_batch;
use crate::error::Result;
use crate::frames::Topic;
use flow_store::AllDeltas;

/// One publish event: a topic tag plus its encoded payload. `Shutdown` is
/// sent with an empty payload as the one-shot sentinel.
#[derive(Debug, Clone)]
pub struct PublishEvent {
    pub topic: &'static str,
    pub payload: Arc<Vec<u8>>,
}

#[derive(Clone)]
pub struct PublisherBridge {
    tx: broadcast::Sender<PublishEvent>,
}

impl PublisherBridge {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PublishEvent> {
        self.tx.subscribe()
    }

    /// Encodes one delta batch and fans out every resulting frame.
    /// Subscriber lag (a slow reader falling behind the ring buffer) is
    /// not this bridge's problem to solve — `tokio::sync::broadcast`
    /// already reports it to the lagging receiver via `RecvError::Lagged`.
    pub fn publish_batch(&self, deltas: &AllDeltas) -> Result<()> {
        for (topic, payload) in encode_batch(deltas)? {
            self.send_frame(frame_topic(&topic), payload);
        }
        Ok(())
    }

    pub fn publish_shutdown(&self) {
        self.send_frame(Topic::Shutdown.as_str(), Vec::new());
    }

    fn send_frame(&self, topic: &'static str, payload: Vec<u8>) {
        let event = PublishEvent {
            topic,
            payload: Arc::new(payload),
        };
        // No subscribers is a normal, not an error: nothing is lost since
        // there was nobody to lose it to.
        let _ = self.tx.send(event);
    }
}

impl Default for PublisherBridge {
    fn default() -> Self {
        Self::new(256)
    }
}

fn frame_topic(raw_topic_bytes: &[u8]) -> &'static str {
    match raw_topic_bytes {
        b"workflow" => Topic::Workflow.as_str(),
        b"tasks" => Topic::Tasks.as_str(),
        b"task_proxies" => Topic::TaskProxies.as_str(),
        b"families" => Topic::Families.as_str(),
        b"family_proxies" => Topic::FamilyProxies.as_str(),
        b"jobs" => Topic::Jobs.as_str(),
        b"edges" => Topic::Edges.as_str(),
        _ => Topic::All.as_str(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow_store::DataStore;
    use graph_window::GraphDefs;
    use graph_window::NodeKey;

    struct Linear;
    impl GraphDefs for Linear {
        fn children(&self, node: &NodeKey) -> Vec<NodeKey> {
            match node.name.as_str() {
                "a" => vec![NodeKey::new(&node.cycle_point, "b")],
                _ => Vec::new(),
            }
        }
        fn parents(&self, node: &NodeKey) -> Vec<NodeKey> {
            match node.name.as_str() {
                "b" => vec![NodeKey::new(&node.cycle_point, "a")],
                _ => Vec::new(),
            }
        }
        fn def_exists(&self, _name: &str) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn subscriber_receives_every_topic_in_a_batch() {
        let bridge = PublisherBridge::new(16);
        let mut rx = bridge.subscribe();

        let mut store = DataStore::new("alice", "flow");
        store.initiate(vec![], vec![], 1, false);
        let deltas = store.update(&Linear, &[], 0.0).unwrap();
        bridge.publish_batch(&deltas).unwrap();

        let mut seen = Vec::new();
        for _ in 0..8 {
            seen.push(rx.recv().await.unwrap().topic);
        }
        assert!(seen.contains(&"workflow"));
        assert!(seen.contains(&"all"));
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_error() {
        let bridge = PublisherBridge::new(4);
        let mut store = DataStore::new("alice", "flow");
        store.initiate(vec![], vec![], 1, false);
        let deltas = store.update(&Linear, &[], 0.0).unwrap();
        bridge.publish_batch(&deltas).unwrap();
    }

    #[tokio::test]
    async fn shutdown_is_a_one_shot_sentinel_topic() {
        let bridge = PublisherBridge::new(4);
        let mut rx = bridge.subscribe();
        bridge.publish_shutdown();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.topic, "shutdown");
        assert!(event.payload.is_empty());
    }
}
