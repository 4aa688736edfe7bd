//! Binary encoding of delta batches into the topic-tagged frames the
//! publish/subscribe channel carries.

use flow_store::{AllDeltas, Edge, FamilyDef, FamilyProxy, FramedDelta, FramedWorkflowDelta, Job, TaskDef, TaskProxy};
use serde::Serialize;

use crate::error::Result;
use crate::frames::Topic;

/// One `(topic_bytes, payload_bytes)` pair as the pub/sub channel sends it.
pub type Frame = (Vec<u8>, Vec<u8>);

fn encode_one<T: Serialize>(topic: Topic, value: &T) -> Result<Frame> {
    let payload = bincode::serialize(value)?;
    Ok((topic.as_bytes().to_vec(), payload))
}

/// Splits one batch into its per-topic frames plus the `all` aggregate
/// frame, which carries the whole `AllDeltas` so a subscriber to `all`
/// never has to reassemble it from the individual topics.
pub fn encode_batch(deltas: &AllDeltas) -> Result<Vec<Frame>> {
    let mut frames = Vec::with_capacity(8);
    frames.push(encode_one(Topic::Workflow, &deltas.workflow)?);
    frames.push(encode_one(Topic::Tasks, &deltas.tasks)?);
    frames.push(encode_one(Topic::TaskProxies, &deltas.task_proxies)?);
    frames.push(encode_one(Topic::Families, &deltas.families)?);
    frames.push(encode_one(Topic::FamilyProxies, &deltas.family_proxies)?);
    frames.push(encode_one(Topic::Jobs, &deltas.jobs)?);
    frames.push(encode_one(Topic::Edges, &deltas.edges)?);
    frames.push(encode_one(Topic::All, deltas)?);
    Ok(frames)
}

pub fn decode_workflow(bytes: &[u8]) -> Result<FramedWorkflowDelta> {
    Ok(bincode::deserialize(bytes)?)
}

pub fn decode_tasks(bytes: &[u8]) -> Result<FramedDelta<TaskDef>> {
    Ok(bincode::deserialize(bytes)?)
}

pub fn decode_task_proxies(bytes: &[u8]) -> Result<FramedDelta<TaskProxy>> {
    Ok(bincode::deserialize(bytes)?)
}

pub fn decode_families(bytes: &[u8]) -> Result<FramedDelta<FamilyDef>> {
    Ok(bincode::deserialize(bytes)?)
}

pub fn decode_family_proxies(bytes: &[u8]) -> Result<FramedDelta<FamilyProxy>> {
    Ok(bincode::deserialize(bytes)?)
}

pub fn decode_jobs(bytes: &[u8]) -> Result<FramedDelta<Job>> {
    Ok(bincode::deserialize(bytes)?)
}

pub fn decode_edges(bytes: &[u8]) -> Result<FramedDelta<Edge>> {
    Ok(bincode::deserialize(bytes)?)
}

pub fn decode_all(bytes: &[u8]) -> Result<AllDeltas> {
    Ok(bincode::deserialize(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow_store::{DataStore, TaskDef};
    use graph_window::{GraphDefs, NodeKey};

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

    fn taskdef(name: &str) -> TaskDef {
        TaskDef {
            id: format!("alice|flow|$namespace|{name}"),
            name: name.to_string(),
            depth: 0,
            namespace: vec![name.to_string()],
            first_parent: None,
            parents: vec![],
            mean_elapsed_time: 0.0,
            title: String::new(),
            description: String::new(),
            url: String::new(),
            user_metadata: serde_json::Value::Null,
            runtime: Default::default(),
            proxies: vec![],
        }
    }

    #[test]
    fn round_trips_a_real_batch_through_bincode() {
        let mut store = DataStore::new("alice", "flow");
        store.initiate(vec![taskdef("a"), taskdef("b")], vec![], 1, false);
        let origin = NodeKey::new("1", "a");
        store.add_active(&origin);
        store.increment_window(&origin, false, &Linear);
        let deltas = store.update(&Linear, &[origin], 0.0).unwrap();

        let frames = encode_batch(&deltas).unwrap();
        assert_eq!(frames.len(), 8);

        let (topic_bytes, payload) = &frames[1];
        assert_eq!(topic_bytes, Topic::Tasks.as_bytes());
        let decoded = decode_tasks(payload).unwrap();
        assert_eq!(decoded.delta.added.len(), deltas.tasks.delta.added.len());
    }
}
