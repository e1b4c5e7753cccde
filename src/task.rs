//! Units of generation work and their per-task outcome records.
use serde::Serialize;

use crate::error::{ClassifiedError, ErrorKind};
use crate::image::ImageArtifact;

/// One unit of generation work. Immutable once built; consumed once by a runner.
#[derive(Debug, Clone)]
pub struct TaskDescriptor {
    pub id: u32,
    pub images: Vec<ImageArtifact>,
    pub prompt: String,
}

impl TaskDescriptor {
    pub fn new(id: u32, images: Vec<ImageArtifact>, prompt: impl Into<String>) -> Self {
        TaskDescriptor { id, images, prompt: prompt.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Success,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Failed)
    }
}

/// Outcome record for one task. Moves `pending -> running -> success|failed`
/// and is never touched again after a terminal state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskResult {
    pub task_id: u32,
    pub status: TaskStatus,
    pub output: Option<ImageArtifact>,
    pub error_kind: Option<ErrorKind>,
    pub error_message: Option<String>,
}

impl TaskResult {
    pub fn pending(task_id: u32) -> Self {
        TaskResult {
            task_id,
            status: TaskStatus::Pending,
            output: None,
            error_kind: None,
            error_message: None,
        }
    }

    pub fn start(&mut self) {
        if self.status == TaskStatus::Pending {
            self.status = TaskStatus::Running;
        }
    }

    pub fn succeed(&mut self, output: ImageArtifact) {
        if self.status.is_terminal() {
            return;
        }
        self.status = TaskStatus::Success;
        self.output = Some(output);
    }

    pub fn fail(&mut self, error: ClassifiedError) {
        if self.status.is_terminal() {
            return;
        }
        self.status = TaskStatus::Failed;
        self.error_kind = Some(error.kind);
        self.error_message = Some(error.message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_results_are_never_revisited() {
        let mut result = TaskResult::pending(3);
        result.start();
        assert_eq!(result.status, TaskStatus::Running);
        result.succeed(ImageArtifact::new("image/png", vec![1]));
        result.fail(ClassifiedError::new(ErrorKind::Unknown, "late failure"));
        result.start();
        assert_eq!(result.status, TaskStatus::Success);
        assert!(result.error_kind.is_none());
        assert_eq!(result.output.as_ref().map(|o| o.data.clone()), Some(vec![1]));
    }
}
