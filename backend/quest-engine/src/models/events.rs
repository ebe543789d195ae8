use serde::{Deserialize, Serialize};

use super::{
    course::CourseStatus,
    quest::{QuestAttempt, QuestStatus},
    AttemptId, CourseId, QuestId, StudentId,
};

/// State transitions observed at the entity-layer boundary.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TriggerEvent {
    AttemptSubmitted {
        attempt_id: AttemptId,
        student_id: StudentId,
    },
    QuestExpired {
        quest_id: QuestId,
    },
    CourseExpired {
        course_id: CourseId,
    },
    /// A submitted attempt was saved again and has no stored feedback.
    FeedbackMissing {
        attempt_id: AttemptId,
    },
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("attempt {attempt_id} is already submitted and cannot be reopened")]
    Unsubmit { attempt_id: AttemptId },
    #[error("attempt snapshots differ: before={before}, after={after}")]
    MismatchedAttempt { before: AttemptId, after: AttemptId },
}

/// Diffs two snapshots of the same attempt. Only false -> true emits an event;
/// true -> false is rejected.
pub fn attempt_submission(
    before: &QuestAttempt,
    after: &QuestAttempt,
) -> Result<Option<TriggerEvent>, TransitionError> {
    if before.id != after.id {
        return Err(TransitionError::MismatchedAttempt {
            before: before.id,
            after: after.id,
        });
    }

    match (before.submitted, after.submitted) {
        (false, true) => Ok(Some(TriggerEvent::AttemptSubmitted {
            attempt_id: after.id,
            student_id: after.student_id,
        })),
        (true, false) => Err(TransitionError::Unsubmit {
            attempt_id: after.id,
        }),
        _ => Ok(None),
    }
}

pub fn quest_expiry(
    quest_id: QuestId,
    before: QuestStatus,
    after: QuestStatus,
) -> Option<TriggerEvent> {
    (before == QuestStatus::Active && after == QuestStatus::Expired)
        .then_some(TriggerEvent::QuestExpired { quest_id })
}

pub fn course_expiry(
    course_id: CourseId,
    before: CourseStatus,
    after: CourseStatus,
) -> Option<TriggerEvent> {
    (before == CourseStatus::Active && after == CourseStatus::Expired)
        .then_some(TriggerEvent::CourseExpired { course_id })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submission_fires_once_on_false_to_true() {
        let before = QuestAttempt::new(7, 3, 1);
        let mut after = before.clone();
        after.submitted = true;

        assert_eq!(
            attempt_submission(&before, &after),
            Ok(Some(TriggerEvent::AttemptSubmitted {
                attempt_id: 7,
                student_id: 3
            }))
        );
        // re-saving a submitted attempt is not a transition
        assert_eq!(attempt_submission(&after, &after), Ok(None));
        assert_eq!(attempt_submission(&before, &before), Ok(None));
    }

    #[test]
    fn unsubmitting_is_rejected() {
        let mut before = QuestAttempt::new(7, 3, 1);
        before.submitted = true;
        let after = QuestAttempt::new(7, 3, 1);

        assert_eq!(
            attempt_submission(&before, &after),
            Err(TransitionError::Unsubmit { attempt_id: 7 })
        );
    }

    #[test]
    fn snapshots_must_describe_one_attempt() {
        let before = QuestAttempt::new(1, 3, 1);
        let after = QuestAttempt::new(2, 3, 1);
        assert!(matches!(
            attempt_submission(&before, &after),
            Err(TransitionError::MismatchedAttempt { .. })
        ));
    }

    #[test]
    fn expiry_only_from_active() {
        assert_eq!(
            quest_expiry(4, QuestStatus::Active, QuestStatus::Expired),
            Some(TriggerEvent::QuestExpired { quest_id: 4 })
        );
        assert_eq!(quest_expiry(4, QuestStatus::Expired, QuestStatus::Expired), None);
        assert_eq!(quest_expiry(4, QuestStatus::Expired, QuestStatus::Active), None);

        assert_eq!(
            course_expiry(2, CourseStatus::Active, CourseStatus::Expired),
            Some(TriggerEvent::CourseExpired { course_id: 2 })
        );
        assert_eq!(course_expiry(2, CourseStatus::Active, CourseStatus::Active), None);
    }
}
