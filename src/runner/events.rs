//! Run progress as a stream of events, and the snapshot a consumer folds them into.
use serde::Serialize;
use std::collections::BTreeMap;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::error::ErrorKind;
use crate::task::TaskResult;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    Started { total: usize },
    TaskUpdated { result: TaskResult },
    Progress { completed: usize, total: usize },
    Aborted { kind: ErrorKind, message: String },
    Finished { completed: usize, total: usize },
}

/// Sending half of a run's event stream. A dropped receiver means the run was
/// abandoned; sends are then silently discarded.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<UnboundedSender<RunEvent>>,
}

impl EventSink {
    pub fn channel() -> (EventSink, UnboundedReceiver<RunEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (EventSink { tx: Some(tx) }, rx)
    }

    pub fn discard() -> EventSink {
        EventSink { tx: None }
    }

    pub fn emit(&self, event: RunEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSnapshot {
    pub total: usize,
    pub completed: usize,
    pub results: BTreeMap<u32, TaskResult>,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub finished: bool,
}

impl RunSnapshot {
    pub fn apply(&mut self, event: &RunEvent) {
        match event {
            RunEvent::Started { total } => {
                self.total = *total;
            }
            RunEvent::TaskUpdated { result } => {
                self.results.insert(result.task_id, result.clone());
            }
            RunEvent::Progress { completed, total } => {
                self.completed = self.completed.max(*completed);
                self.total = *total;
            }
            RunEvent::Aborted { kind, message } => {
                self.results.clear();
                self.error = Some(message.clone());
                self.error_kind = Some(*kind);
                self.finished = true;
            }
            RunEvent::Finished { completed, total } => {
                self.completed = *completed;
                self.total = *total;
                self.finished = true;
            }
        }
    }

    pub fn fold<'a>(events: impl IntoIterator<Item = &'a RunEvent>) -> Self {
        let mut snapshot = RunSnapshot::default();
        for event in events {
            snapshot.apply(event);
        }
        snapshot
    }
}
