//! Delta buffer: per-entity-type `added`/`updated`/`pruned` buffers and the
//! merge contract that applies a batch to the store.

use std::collections::{HashMap, HashSet};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::StoreError;

/// A single entity type's buffered changes for one tick.
///
/// `updated` holds only the fields that actually changed, tracked as a JSON
/// object so "which fields are present" is exactly the object's key set —
/// deltas stay minimal rather than re-shipping whole records on every
/// small change.
#[derive(Debug, Clone, Serialize, serde::Deserialize)]
#[serde(bound = "T: Serialize + DeserializeOwned")]
pub struct Delta<T> {
    pub added: HashMap<String, T>,
    pub updated: HashMap<String, Map<String, Value>>,
    pub pruned: HashSet<String>,
}

impl<T> Default for Delta<T> {
    fn default() -> Self {
        Self {
            added: HashMap::new(),
            updated: HashMap::new(),
            pruned: HashSet::new(),
        }
    }
}

impl<T: Clone> Delta<T> {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.pruned.is_empty()
    }

    pub fn clear(&mut self) {
        self.added.clear();
        self.updated.clear();
        self.pruned.clear();
    }

    pub fn buffer_added(&mut self, id: impl Into<String>, value: T) {
        self.added.insert(id.into(), value);
    }

    pub fn buffer_pruned(&mut self, id: impl Into<String>) {
        self.pruned.insert(id.into());
    }

    /// Merge `patch` into any existing buffered update for `id`, so that a
    /// second `delta_*` call in the same tick accumulates fields instead of
    /// clobbering the first.
    pub fn buffer_updated(&mut self, id: impl Into<String>, patch: Map<String, Value>) {
        let id = id.into();
        self.updated.entry(id).or_default().extend(patch);
    }
}

/// Fields that must be cleared (replaced wholesale, never unioned) before a
/// partial update is merged.
pub fn clear_before_merge_fields(entity: &str) -> &'static [&'static str] {
    match entity {
        "family_proxy" => &["state_totals", "states", "child_tasks", "child_families"],
        "job" => &["messages"],
        "task_proxy" => &["prerequisites", "flow_nums", "edges", "jobs"],
        "workflow" => &["latest_state_tasks", "state_totals", "states"],
        _ => &[],
    }
}

/// Apply one entity type's buffered batch to `store`. Repeated fields
/// concatenate on merge unless named in [`clear_before_merge_fields`], in
/// which case they are replaced wholesale.
///
/// Returns the ids that were actually touched (added or updated), so the
/// caller can cascade roll-ups.
pub fn apply_delta<T>(
    store: &mut HashMap<String, T>,
    delta: &Delta<T>,
    entity: &str,
) -> Result<Vec<String>, StoreError>
where
    T: Serialize + DeserializeOwned + Clone,
{
    let mut touched = Vec::new();
    let clear_fields = clear_before_merge_fields(entity);

    for (id, value) in &delta.added {
        store.insert(id.clone(), value.clone());
        touched.push(id.clone());
    }

    for (id, patch) in &delta.updated {
        let Some(existing) = store.get(id) else {
            tracing::debug!(entity, id, "dropping update for missing id (drift)");
            continue;
        };
        let mut existing_json = serde_json::to_value(existing)
            .map_err(|e| StoreError::Merge(format!("{entity} serialize: {e}")))?;
        merge_json_object(&mut existing_json, patch, clear_fields);
        let merged: T = serde_json::from_value(existing_json)
            .map_err(|e| StoreError::Merge(format!("{entity} deserialize: {e}")))?;
        store.insert(id.clone(), merged);
        touched.push(id.clone());
    }

    // Prunes are applied by the caller, which owns relationship teardown
    // (unlinking the pruned id from its parent's child lists) — this
    // function only performs the insert/update half.
    Ok(touched)
}

/// Merge a flat JSON patch into an existing JSON object in place.
///
/// Array-valued fields are concatenated (`existing ++ new`) unless the
/// field name appears in `clear_fields`, in which case the new value
/// replaces the old wholesale. Every other field type always replaces.
fn merge_json_object(existing: &mut Value, patch: &Map<String, Value>, clear_fields: &[&str]) {
    let Value::Object(obj) = existing else {
        return;
    };
    for (key, new_val) in patch {
        if clear_fields.contains(&key.as_str()) {
            obj.insert(key.clone(), new_val.clone());
            continue;
        }
        match (obj.get(key), new_val) {
            (Some(Value::Array(old)), Value::Array(new)) => {
                let mut merged = old.clone();
                merged.extend(new.clone());
                obj.insert(key.clone(), Value::Array(merged));
            }
            _ => {
                obj.insert(key.clone(), new_val.clone());
            }
        }
    }
}

/// 32-bit Adler checksum over the sorted stable-id strings of a repeated
/// entity type, used to let a subscriber detect drift between its replica
/// and the store's live set without re-transmitting every id.
pub fn adler32_of_sorted_ids<'a>(ids: impl Iterator<Item = &'a str>) -> u32 {
    let mut sorted: Vec<&str> = ids.collect();
    sorted.sort_unstable();
    let mut a: u32 = 1;
    let mut b: u32 = 0;
    const MOD_ADLER: u32 = 65521;
    for id in sorted {
        for byte in id.as_bytes() {
            a = (a + *byte as u32) % MOD_ADLER;
            b = (b + a) % MOD_ADLER;
        }
        // Separator byte so "ab","c" and "a","bc" don't collide.
        a = (a + b'\n' as u32) % MOD_ADLER;
        b = (b + a) % MOD_ADLER;
    }
    (b << 16) | a
}
