//! Unit tests for the task status graph

use chrono::{Duration, Utc};
use gen_orchestrator::domain::{GenerationTask, TaskMetadata, TaskStatus};
use gen_orchestrator::AppError;

const ALL: [TaskStatus; 7] = [
    TaskStatus::ProcessingPrompt,
    TaskStatus::Pending,
    TaskStatus::Generating,
    TaskStatus::RemovingBackground,
    TaskStatus::Completed,
    TaskStatus::Failed,
    TaskStatus::Timeout,
];

fn rank(status: TaskStatus) -> usize {
    match status {
        TaskStatus::ProcessingPrompt => 0,
        TaskStatus::Pending => 1,
        TaskStatus::Generating => 2,
        TaskStatus::RemovingBackground => 3,
        TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Timeout => 4,
    }
}

fn task() -> GenerationTask {
    let metadata = TaskMetadata {
        seed: 42,
        size: "512*512".to_string(),
        output_format: "png".to_string(),
        style_preset_id: None,
        remove_background: true,
        original_prompt: "cat wizard".to_string(),
        processed_prompt: None,
        original_image_url: None,
        extra: Default::default(),
    };
    GenerationTask::new(1, "cat wizard".to_string(), metadata, Utc::now() + Duration::hours(24))
}

#[test]
fn test_edges_only_move_forward() {
    for from in ALL {
        for to in ALL {
            if from.can_advance_to(to) {
                assert!(rank(to) > rank(from), "{from:?} -> {to:?} regresses");
            }
        }
    }
}

#[test]
fn test_terminals_have_no_exits() {
    for from in ALL.into_iter().filter(TaskStatus::is_terminal) {
        assert!(ALL.iter().all(|to| !from.can_advance_to(*to)));
    }
}

#[test]
fn test_failure_reachable_from_working_stages_only() {
    for from in [
        TaskStatus::ProcessingPrompt,
        TaskStatus::Generating,
        TaskStatus::RemovingBackground,
    ] {
        assert!(from.can_advance_to(TaskStatus::Failed));
        assert!(from.can_advance_to(TaskStatus::Timeout));
    }
    assert!(!TaskStatus::Pending.can_advance_to(TaskStatus::Failed));
}

#[test]
fn test_happy_path_without_background_removal() {
    let mut task = task();
    for next in [TaskStatus::Pending, TaskStatus::Generating, TaskStatus::Completed] {
        task.advance(next).unwrap();
    }
    assert_eq!(task.status, TaskStatus::Completed);
}

#[test]
fn test_advance_rejects_regression() {
    let mut task = task();
    task.advance(TaskStatus::Pending).unwrap();
    task.advance(TaskStatus::Generating).unwrap();

    let err = task.advance(TaskStatus::Pending).unwrap_err();
    assert!(matches!(
        err,
        AppError::InvalidTransition {
            from: TaskStatus::Generating,
            to: TaskStatus::Pending
        }
    ));
    assert_eq!(task.status, TaskStatus::Generating);
}

#[test]
fn test_status_wire_names() {
    assert_eq!(
        serde_json::to_value(TaskStatus::RemovingBackground).unwrap(),
        "REMOVING_BACKGROUND"
    );
    assert_eq!(TaskStatus::ProcessingPrompt.as_str(), "PROCESSING_PROMPT");
}
