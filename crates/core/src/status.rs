use crate::error::PipelineError;
use crate::models::{Document, StageKind, StatusChange};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Pending,
    Loaded,
    Chunked,
    Embedded,
    Indexed,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusEvent {
    Parsed,
    StageCompleted(StageKind),
    StageFailed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot complete {stage} from status {from}: {missing} has not run")]
pub struct TransitionError {
    pub from: DocumentStatus,
    pub stage: StageKind,
    pub missing: &'static str,
}

impl From<TransitionError> for PipelineError {
    fn from(error: TransitionError) -> Self {
        PipelineError::PreconditionFailed {
            stage: error.stage.as_str(),
            missing: error.missing,
        }
    }
}

impl DocumentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Loaded => "loaded",
            DocumentStatus::Chunked => "chunked",
            DocumentStatus::Embedded => "embedded",
            DocumentStatus::Indexed => "indexed",
            DocumentStatus::Error => "error",
        }
    }

    /// Position on the forward path. `Error` sits outside it.
    fn rank(self) -> Option<u8> {
        match self {
            DocumentStatus::Pending => Some(0),
            DocumentStatus::Loaded => Some(1),
            DocumentStatus::Chunked => Some(2),
            DocumentStatus::Embedded => Some(3),
            DocumentStatus::Indexed => Some(4),
            DocumentStatus::Error => None,
        }
    }

    pub fn completed_by(kind: StageKind) -> Self {
        match kind {
            StageKind::Chunk => DocumentStatus::Chunked,
            StageKind::Embedding => DocumentStatus::Embedded,
            StageKind::Store => DocumentStatus::Indexed,
        }
    }

    /// Next status after `event`. Completions never move a document backwards,
    /// and `Error` accepts any completion so failed stages can be retried.
    pub fn apply(self, event: StatusEvent) -> Result<DocumentStatus, TransitionError> {
        match event {
            StatusEvent::StageFailed => Ok(DocumentStatus::Error),
            StatusEvent::Parsed => Ok(self.advance_to(DocumentStatus::Loaded)),
            StatusEvent::StageCompleted(kind) => {
                let target = DocumentStatus::completed_by(kind);
                let (Some(current), Some(wanted)) = (self.rank(), target.rank()) else {
                    return Ok(target);
                };
                if current + 1 < wanted {
                    return Err(TransitionError {
                        from: self,
                        stage: kind,
                        missing: kind.antecedent_label(),
                    });
                }
                Ok(self.advance_to(target))
            }
        }
    }

    fn advance_to(self, target: DocumentStatus) -> DocumentStatus {
        match (self.rank(), target.rank()) {
            (Some(current), Some(wanted)) if current >= wanted => self,
            _ => target,
        }
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Document {
    /// Applies `event` and records the change in the status history.
    pub fn apply_event(
        &mut self,
        event: StatusEvent,
        at: DateTime<Utc>,
    ) -> Result<DocumentStatus, TransitionError> {
        let next = self.status.apply(event)?;
        if next != self.status {
            self.status_history.push(StatusChange {
                from: self.status,
                to: next,
                at,
            });
            self.status = next;
        }
        self.updated_at = at;
        Ok(next)
    }
}
