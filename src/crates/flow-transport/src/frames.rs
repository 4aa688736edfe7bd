//! Request/reply frame shapes exchanged over the command channel.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const PROTOCOL_VERSION: &str = "1.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub command: String,
    #[serde(default)]
    pub args: Map<String, Value>,
    pub user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
}

/// A reply is either a success payload or a client-visible error, tagged
/// so a receiver can match without probing field presence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
    Ok {
        data: Value,
        user: String,
        cylc_version: String,
    },
    Err {
        error: ResponseError,
        user: String,
        cylc_version: String,
    },
}

impl Response {
    pub fn ok(data: Value, user: impl Into<String>) -> Self {
        Response::Ok {
            data,
            user: user.into(),
            cylc_version: PROTOCOL_VERSION.to_string(),
        }
    }

    pub fn err(message: impl Into<String>, user: impl Into<String>) -> Self {
        Response::Err {
            error: ResponseError {
                message: message.into(),
                traceback: None,
            },
            user: user.into(),
            cylc_version: PROTOCOL_VERSION.to_string(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Response::Ok { .. })
    }
}

/// Publish/subscribe topic names. `All` carries the union of every other
/// topic's payload in one frame; `Shutdown` is a one-shot sentinel with no
/// payload body beyond its topic tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Workflow,
    Tasks,
    TaskProxies,
    Families,
    FamilyProxies,
    Jobs,
    Edges,
    All,
    Shutdown,
}

impl Topic {
    pub fn as_bytes(&self) -> &'static [u8] {
        self.as_str().as_bytes()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Workflow => "workflow",
            Topic::Tasks => "tasks",
            Topic::TaskProxies => "task_proxies",
            Topic::Families => "families",
            Topic::FamilyProxies => "family_proxies",
            Topic::Jobs => "jobs",
            Topic::Edges => "edges",
            Topic::All => "all",
            Topic::Shutdown => "shutdown",
        }
    }
}
