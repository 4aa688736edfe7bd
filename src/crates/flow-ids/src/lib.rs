//! Canonical identifiers for the cycling workflow scheduler.
//!
//! A workflow runs under a **user** and a **workflow name**. An [`Tokens`]
//! is the tuple `(user, workflow, cycle, task, job)` described in the data
//! model; trailing components may be absent. Three identifier spaces share
//! the same canonical string shape by overloading the `cycle` slot:
//!
//! - **Live**: `cycle` is a cycle-point string, `task` a task name, `job` a
//!   submit-number string.
//! - **Definition**: `cycle` is the literal `$namespace|<name>`.
//! - **Edge**: `cycle` is the literal `$edge|<leftRelId>|<rightRelId>`.
//!
//! Canonical form: `user|workflow|cycle/task/job`, with trailing empty
//! components (and their separators) dropped. Parsing is the exact inverse
//! of formatting for any string this crate produces.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const NAMESPACE_SIGIL: &str = "$namespace|";
const EDGE_SIGIL: &str = "$edge|";

/// Errors produced while parsing a canonical identifier string.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokensError {
    #[error("identifier is missing the user/workflow separator: {0:?}")]
    MissingWorkflowSeparator(String),

    #[error("identifier has an empty user component: {0:?}")]
    EmptyUser(String),

    #[error("identifier has an empty workflow component: {0:?}")]
    EmptyWorkflow(String),

    #[error("relative id has too many '/'-separated components: {0:?}")]
    TooManyRelativeComponents(String),
}

/// Which of the three identifier spaces a [`Tokens`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdSpace {
    /// `cycle` is a real cycle point, `task`/`job` are live components.
    Live,
    /// `cycle` carries `$namespace|<name>`.
    Definition,
    /// `cycle` carries `$edge|<left>|<right>`.
    Edge,
}

/// A parsed, canonical identifier: `(user, workflow, cycle, task, job)`.
///
/// Trailing components are `None` rather than empty strings; an empty
/// string is never a valid component value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tokens {
    pub user: String,
    pub workflow: String,
    pub cycle: Option<String>,
    pub task: Option<String>,
    pub job: Option<String>,
}

impl Tokens {
    /// Build the workflow-level identifier (no cycle/task/job).
    pub fn workflow(user: impl Into<String>, workflow: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            workflow: workflow.into(),
            cycle: None,
            task: None,
            job: None,
        }
    }

    /// Build a live task-proxy identifier for `cycle/task`.
    pub fn task_proxy(
        user: impl Into<String>,
        workflow: impl Into<String>,
        cycle: impl Into<String>,
        task: impl Into<String>,
    ) -> Self {
        Self {
            user: user.into(),
            workflow: workflow.into(),
            cycle: Some(cycle.into()),
            task: Some(task.into()),
            job: None,
        }
    }

    /// Build a job identifier for `cycle/task/job`.
    pub fn job(
        user: impl Into<String>,
        workflow: impl Into<String>,
        cycle: impl Into<String>,
        task: impl Into<String>,
        job: impl Into<String>,
    ) -> Self {
        Self {
            user: user.into(),
            workflow: workflow.into(),
            cycle: Some(cycle.into()),
            task: Some(task.into()),
            job: Some(job.into()),
        }
    }

    /// Build a family-proxy identifier: same shape as a task proxy, the
    /// `task` slot holding the family name.
    pub fn family_proxy(
        user: impl Into<String>,
        workflow: impl Into<String>,
        cycle: impl Into<String>,
        family: impl Into<String>,
    ) -> Self {
        Self::task_proxy(user, workflow, cycle, family)
    }

    /// Build a definition identifier: `cycle` carries the `$namespace|`
    /// sigil, `name` is the task or family name.
    pub fn definition(
        user: impl Into<String>,
        workflow: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            user: user.into(),
            workflow: workflow.into(),
            cycle: Some(format!("{NAMESPACE_SIGIL}{}", name.into())),
            task: None,
            job: None,
        }
    }

    /// Build an edge identifier from the two endpoint relative ids
    /// (`cycle/task` strings).
    pub fn edge(
        user: impl Into<String>,
        workflow: impl Into<String>,
        left_rel_id: impl Into<String>,
        right_rel_id: impl Into<String>,
    ) -> Self {
        Self {
            user: user.into(),
            workflow: workflow.into(),
            cycle: Some(format!(
                "{EDGE_SIGIL}{}|{}",
                left_rel_id.into(),
                right_rel_id.into()
            )),
            task: None,
            job: None,
        }
    }

    /// Which identifier space this token belongs to, inferred from the
    /// `cycle` slot's sigil (or its absence, for `Live`).
    pub fn space(&self) -> IdSpace {
        match &self.cycle {
            Some(c) if c.starts_with(NAMESPACE_SIGIL) => IdSpace::Definition,
            Some(c) if c.starts_with(EDGE_SIGIL) => IdSpace::Edge,
            _ => IdSpace::Live,
        }
    }

    /// The definition name, if this is a `Definition` token.
    pub fn definition_name(&self) -> Option<&str> {
        match &self.cycle {
            Some(c) => c.strip_prefix(NAMESPACE_SIGIL),
            None => None,
        }
    }

    /// The `(left, right)` relative ids, if this is an `Edge` token.
    pub fn edge_endpoints(&self) -> Option<(&str, &str)> {
        let rest = self.cycle.as_deref()?.strip_prefix(EDGE_SIGIL)?;
        rest.split_once('|')
    }

    /// The `cycle/task/job` portion, without the leading `user|workflow|`.
    /// This is the id's meaning *within* a single workflow, used as a map
    /// key inside the data store.
    pub fn relative_id(&self) -> String {
        let mut parts = Vec::new();
        if let Some(c) = &self.cycle {
            parts.push(c.clone());
            if let Some(t) = &self.task {
                parts.push(t.clone());
                if let Some(j) = &self.job {
                    parts.push(j.clone());
                }
            }
        }
        parts.join("/")
    }

    /// Build a full `Tokens` from a workflow id plus a relative id string
    /// previously produced by [`Tokens::relative_id`].
    ///
    /// Definition and edge identifiers carry their whole structured value
    /// (sigil and all, including any `/` inside an edge's endpoint ids) in
    /// the `cycle` slot alone, with `task`/`job` always `None` — so those
    /// two spaces are recognized by their sigil before any `/`-splitting
    /// happens, rather than being split like a live `cycle/task/job` id.
    pub fn with_relative_id(
        user: impl Into<String>,
        workflow: impl Into<String>,
        relative_id: &str,
    ) -> Result<Self, TokensError> {
        if relative_id.starts_with(NAMESPACE_SIGIL) || relative_id.starts_with(EDGE_SIGIL) {
            return Ok(Self {
                user: user.into(),
                workflow: workflow.into(),
                cycle: Some(relative_id.to_string()),
                task: None,
                job: None,
            });
        }

        let mut components = relative_id.splitn(4, '/');
        let cycle = components.next().filter(|s| !s.is_empty()).map(String::from);
        let task = components.next().filter(|s| !s.is_empty()).map(String::from);
        let job = components.next().filter(|s| !s.is_empty()).map(String::from);
        if components.next().is_some() {
            return Err(TokensError::TooManyRelativeComponents(relative_id.to_string()));
        }
        Ok(Self {
            user: user.into(),
            workflow: workflow.into(),
            cycle,
            task,
            job,
        })
    }
}

impl fmt::Display for Tokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.user, self.workflow)?;
        let rel = self.relative_id();
        if !rel.is_empty() {
            write!(f, "|{rel}")?;
        }
        Ok(())
    }
}

impl FromStr for Tokens {
    type Err = TokensError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut top = s.splitn(3, '|');
        let user = top
            .next()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| TokensError::EmptyUser(s.to_string()))?;
        let workflow = top
            .next()
            .ok_or_else(|| TokensError::MissingWorkflowSeparator(s.to_string()))?;
        if workflow.is_empty() {
            return Err(TokensError::EmptyWorkflow(s.to_string()));
        }
        let relative = top.next().unwrap_or("");
        Self::with_relative_id(user, workflow, relative)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_live_task_proxy() {
        let t = Tokens::task_proxy("alice", "pipeline", "20200505T00Z", "foo");
        let s = t.to_string();
        assert_eq!(s, "alice|pipeline|20200505T00Z/foo");
        assert_eq!(s.parse::<Tokens>().unwrap(), t);
        assert_eq!(t.space(), IdSpace::Live);
    }

    #[test]
    fn roundtrips_job() {
        let t = Tokens::job("alice", "pipeline", "1", "foo", "03");
        let s = t.to_string();
        assert_eq!(s, "alice|pipeline|1/foo/03");
        assert_eq!(s.parse::<Tokens>().unwrap(), t);
    }

    #[test]
    fn roundtrips_workflow_only() {
        let t = Tokens::workflow("alice", "pipeline");
        assert_eq!(t.to_string(), "alice|pipeline");
        assert_eq!("alice|pipeline".parse::<Tokens>().unwrap(), t);
    }

    #[test]
    fn definition_space_extracts_name() {
        let t = Tokens::definition("alice", "pipeline", "foo");
        assert_eq!(t.to_string(), "alice|pipeline|$namespace|foo");
        assert_eq!(t.space(), IdSpace::Definition);
        assert_eq!(t.definition_name(), Some("foo"));
        let parsed: Tokens = t.to_string().parse().unwrap();
        assert_eq!(parsed, t);
    }

    #[test]
    fn edge_space_extracts_endpoints() {
        let t = Tokens::edge("alice", "pipeline", "1/a", "1/b");
        assert_eq!(t.space(), IdSpace::Edge);
        assert_eq!(t.edge_endpoints(), Some(("1/a", "1/b")));
        let parsed: Tokens = t.to_string().parse().unwrap();
        assert_eq!(parsed, t);
    }

    #[test]
    fn rejects_missing_workflow() {
        assert_eq!(
            "alice".parse::<Tokens>(),
            Err(TokensError::MissingWorkflowSeparator("alice".to_string()))
        );
    }

    #[test]
    fn rejects_empty_user() {
        assert_eq!(
            "|pipeline".parse::<Tokens>(),
            Err(TokensError::EmptyUser("|pipeline".to_string()))
        );
    }

    #[test]
    fn rejects_too_many_relative_components() {
        let err = Tokens::with_relative_id("alice", "pipeline", "1/a/01/extra").unwrap_err();
        assert_eq!(
            err,
            TokensError::TooManyRelativeComponents("1/a/01/extra".to_string())
        );
    }

    #[test]
    fn family_proxy_shares_task_proxy_shape() {
        let fam = Tokens::family_proxy("alice", "pipeline", "1", "A");
        let task = Tokens::task_proxy("alice", "pipeline", "1", "A");
        assert_eq!(fam, task);
    }
}
