use serde::Serialize;
use std::fmt;

pub const SYSTEM_ACTOR_ID: &str = "ingest";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorKind {
    System,
}

/// Who is performing a write. Ingestion always runs as the system actor; there
/// is no user session inside the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Actor {
    pub kind: ActorKind,
    pub id: String,
}

impl Actor {
    pub fn system() -> Self {
        Self {
            kind: ActorKind::System,
            id: SYSTEM_ACTOR_ID.to_string(),
        }
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ActorKind::System => write!(f, "system:{}", self.id),
        }
    }
}

/// Passed explicitly through the coordinator into every extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestContext {
    pub actor: Actor,
    pub workspace: String,
}

impl IngestContext {
    pub fn system(workspace: impl Into<String>) -> Self {
        Self {
            actor: Actor::system(),
            workspace: workspace.into(),
        }
    }
}
