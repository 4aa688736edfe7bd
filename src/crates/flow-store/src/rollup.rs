//! Family roll-up: recursive state / is-held / is-queued / is-runahead
//! aggregation over family trees.

use std::collections::{HashMap, HashSet};

use crate::entities::{FamilyProxy, TaskProxy, TaskState};

/// Given the multiset of child states, return the first state present that
/// appears in `priority`, or `None` if the multiset is empty or matches
/// nothing in the list.
pub fn group_state(
    state_totals: &HashMap<TaskState, u64>,
    priority: &[TaskState],
) -> Option<TaskState> {
    priority
        .iter()
        .copied()
        .find(|s| state_totals.get(s).copied().unwrap_or(0) > 0)
}

/// Priority list to use for group-state extraction, selected by whether the
/// workflow has stopped.
pub fn priority_for(workflow_stopped: bool) -> &'static [TaskState] {
    if workflow_stopped {
        &TaskState::STOPPED_PRIORITY
    } else {
        &TaskState::ORDINARY_PRIORITY
    }
}

/// Recompute one family proxy's aggregates from its direct children, given
/// the (possibly just-updated) child task proxies and child family proxies.
/// Does not recurse — callers must walk leaf families first so each
/// parent's children already carry up-to-date aggregates by the time it is
/// recomputed.
pub fn recompute_family(
    family: &mut FamilyProxy,
    child_tasks: &[&TaskProxy],
    child_families: &[&FamilyProxy],
    workflow_stopped: bool,
) {
    let mut state_totals: HashMap<TaskState, u64> = HashMap::new();
    let mut is_held_total = 0u64;
    let mut is_queued_total = 0u64;
    let mut is_runahead_total = 0u64;
    let mut min_depth: Option<u32> = None;

    for t in child_tasks {
        *state_totals.entry(t.state).or_insert(0) += 1;
        is_held_total += t.is_held as u64;
        is_queued_total += t.is_queued as u64;
        is_runahead_total += t.is_runahead as u64;
        min_depth = Some(min_depth.map_or(t.graph_depth, |d| d.min(t.graph_depth)));
    }
    for f in child_families {
        for (state, count) in &f.state_totals {
            *state_totals.entry(*state).or_insert(0) += count;
        }
        is_held_total += f.is_held_total;
        is_queued_total += f.is_queued_total;
        is_runahead_total += f.is_runahead_total;
        min_depth = Some(min_depth.map_or(f.graph_depth, |d| d.min(f.graph_depth)));
    }

    family.state_totals = state_totals;
    family.is_held_total = is_held_total;
    family.is_queued_total = is_queued_total;
    family.is_runahead_total = is_runahead_total;
    family.graph_depth = min_depth.unwrap_or(0);
    family.state = group_state(&family.state_totals, priority_for(workflow_stopped));
}

/// Workflow-level state totals: sum over all `root` family proxies across
/// cycle points, plus any "lone task" that has no family.
pub fn workflow_state_totals(
    root_family_proxies: &[&FamilyProxy],
    lone_tasks: &[&TaskProxy],
) -> HashMap<TaskState, u64> {
    let mut totals = HashMap::new();
    for f in root_family_proxies {
        for (state, count) in &f.state_totals {
            *totals.entry(*state).or_insert(0) += count;
        }
    }
    for t in lone_tasks {
        *totals.entry(t.state).or_insert(0) += 1;
    }
    totals
}

/// Families that need re-aggregation this tick: first-parents of tasks
/// whose state changed, plus their ancestors up to (and including) `root`.
/// Returns family ids in leaf-to-root order suitable for sequential
/// recomputation: sorted by distance-to-root, deepest first, so a parent is
/// never recomputed before a child also present in the same dirty set.
pub fn ancestors_to_refresh(
    changed_first_parents: impl IntoIterator<Item = String>,
    first_parent_of: impl Fn(&str) -> Option<String>,
) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut collected = Vec::new();
    let mut frontier: Vec<String> = changed_first_parents.into_iter().collect();
    while let Some(id) = frontier.pop() {
        if !seen.insert(id.clone()) {
            continue;
        }
        collected.push(id.clone());
        if let Some(parent) = first_parent_of(&id) {
            frontier.push(parent);
        }
    }

    let distance_to_root = |id: &str| -> u32 {
        let mut dist = 0u32;
        let mut cur = first_parent_of(id);
        while let Some(parent) = cur {
            dist += 1;
            cur = first_parent_of(&parent);
        }
        dist
    };
    let distances: HashMap<String, u32> =
        collected.iter().map(|id| (id.clone(), distance_to_root(id))).collect();
    collected.sort_by(|a, b| distances[b].cmp(&distances[a]));
    collected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::Runtime;

    fn task(state: TaskState, held: bool, depth: u32) -> TaskProxy {
        TaskProxy {
            id: "t".into(),
            cycle_point: "1".into(),
            definition_id: "d".into(),
            ancestors: vec![],
            first_parent: None,
            namespace: vec![],
            state,
            is_held: held,
            is_queued: false,
            is_runahead: false,
            graph_depth: depth,
            flow_nums: vec![],
            prerequisites: vec![],
            outputs: Default::default(),
            external_triggers: Default::default(),
            xtriggers: Default::default(),
            job_submit_count: 0,
            jobs: vec![],
            edges: vec![],
            runtime: Runtime::default(),
        }
    }

    fn family() -> FamilyProxy {
        FamilyProxy {
            id: "f".into(),
            cycle_point: "1".into(),
            definition_id: "A".into(),
            ancestors: vec![],
            first_parent: None,
            child_tasks: vec![],
            child_families: vec![],
            state: None,
            state_totals: HashMap::new(),
            is_held_total: 0,
            is_queued_total: 0,
            is_runahead_total: 0,
            graph_depth: 0,
        }
    }

    #[test]
    fn family_state_tracks_its_least_advanced_child() {
        // foo=running, bar=waiting -> group state running.
        let foo = task(TaskState::Running, false, 0);
        let bar = task(TaskState::Waiting, false, 1);
        let mut fam = family();
        recompute_family(&mut fam, &[&foo, &bar], &[], false);
        assert_eq!(fam.state, Some(TaskState::Running));
        assert_eq!(fam.graph_depth, 0);

        // foo finishes.
        let foo_done = task(TaskState::Succeeded, false, 0);
        recompute_family(&mut fam, &[&foo_done, &bar], &[], false);
        assert_eq!(fam.state, Some(TaskState::Waiting));

        // both succeeded.
        let bar_done = task(TaskState::Succeeded, false, 1);
        recompute_family(&mut fam, &[&foo_done, &bar_done], &[], false);
        assert_eq!(fam.state, Some(TaskState::Succeeded));
        assert_eq!(fam.state_totals[&TaskState::Succeeded], 2);
    }

    #[test]
    fn stopped_priority_moves_succeeded_above_waiting() {
        let succeeded = task(TaskState::Succeeded, false, 0);
        let waiting = task(TaskState::Waiting, false, 0);
        let mut fam = family();
        recompute_family(&mut fam, &[&succeeded, &waiting], &[], false);
        assert_eq!(fam.state, Some(TaskState::Waiting));
        recompute_family(&mut fam, &[&succeeded, &waiting], &[], true);
        assert_eq!(fam.state, Some(TaskState::Succeeded));
    }

    #[test]
    fn graph_depth_is_min_of_children() {
        let a = task(TaskState::Waiting, false, 3);
        let b = task(TaskState::Waiting, false, 1);
        let mut fam = family();
        recompute_family(&mut fam, &[&a, &b], &[], false);
        assert_eq!(fam.graph_depth, 1);
    }

    #[test]
    fn empty_family_has_no_group_state() {
        let mut fam = family();
        recompute_family(&mut fam, &[], &[], false);
        assert_eq!(fam.state, None);
    }

    #[test]
    fn ancestor_refresh_order_is_leaf_to_root() {
        let parents: HashMap<&str, &str> = [("A", "B"), ("B", "root")].into_iter().collect();
        let ids = ancestors_to_refresh(["A".to_string()], |id| {
            parents.get(id).map(|p| p.to_string())
        });
        assert_eq!(ids, vec!["A".to_string(), "B".to_string(), "root".to_string()]);
    }

    #[test]
    fn both_a_family_and_its_grandparent_dirty_still_refresh_child_first() {
        // A -> B -> root; both A and B changed in the same tick, seeded in
        // the frontier order that used to pop B (and root) before A ever
        // got visited, reading A's stale totals into B's recompute.
        let parents: HashMap<&str, &str> = [("A", "B"), ("B", "root")].into_iter().collect();
        let ids = ancestors_to_refresh(["A".to_string(), "B".to_string()], |id| {
            parents.get(id).map(|p| p.to_string())
        });
        let pos_a = ids.iter().position(|id| id == "A").unwrap();
        let pos_b = ids.iter().position(|id| id == "B").unwrap();
        let pos_root = ids.iter().position(|id| id == "root").unwrap();
        assert!(pos_a < pos_b, "A must refresh before its parent B: {ids:?}");
        assert!(pos_b < pos_root, "B must refresh before root: {ids:?}");
    }
}
