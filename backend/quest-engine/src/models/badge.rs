use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{
    bson_datetime_as_chrono, AttemptId, EnrollmentId, QuestId, StudentId,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BadgeKind {
    FirstAttempt,
    Perfectionist,
    Speedster,
    Expert,
    Completionist,
    FullAttendance,
    HalfAttendance,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BadgeScope {
    Quest,
    Course,
}

impl BadgeKind {
    pub const ALL: [BadgeKind; 7] = [
        BadgeKind::FirstAttempt,
        BadgeKind::Perfectionist,
        BadgeKind::Speedster,
        BadgeKind::Expert,
        BadgeKind::Completionist,
        BadgeKind::FullAttendance,
        BadgeKind::HalfAttendance,
    ];

    /// Storage key, identical to the serde representation.
    pub fn key(&self) -> &'static str {
        match self {
            BadgeKind::FirstAttempt => "first_attempt",
            BadgeKind::Perfectionist => "perfectionist",
            BadgeKind::Speedster => "speedster",
            BadgeKind::Expert => "expert",
            BadgeKind::Completionist => "completionist",
            BadgeKind::FullAttendance => "full_attendance",
            BadgeKind::HalfAttendance => "half_attendance",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            BadgeKind::FirstAttempt => "First Attempt",
            BadgeKind::Perfectionist => "Perfectionist",
            BadgeKind::Speedster => "Speedster",
            BadgeKind::Expert => "Expert",
            BadgeKind::Completionist => "Completionist",
            BadgeKind::FullAttendance => "Full Attendance",
            BadgeKind::HalfAttendance => "Half Attendance",
        }
    }

    pub fn scope(&self) -> BadgeScope {
        match self {
            BadgeKind::Completionist | BadgeKind::FullAttendance | BadgeKind::HalfAttendance => {
                BadgeScope::Course
            }
            _ => BadgeScope::Quest,
        }
    }

    pub fn condition(&self) -> &'static str {
        match self {
            BadgeKind::FirstAttempt => "Submitted a first quest attempt",
            BadgeKind::Perfectionist => "Achieved full marks on a quest",
            BadgeKind::Speedster => "Fastest completion among the top three scores of a quest",
            BadgeKind::Expert => "Highest score on a quest",
            BadgeKind::Completionist => "Submitted every quest of a course group",
            BadgeKind::FullAttendance => "Submitted attempts for at least 70% of tutorials",
            BadgeKind::HalfAttendance => "Submitted attempts for at least 50% of tutorials",
        }
    }
}

/// Catalog entry the content layer maintains; awards for a badge missing from
/// the catalog are refused.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BadgeDefinition {
    #[serde(rename = "_id")]
    pub kind: BadgeKind,
    pub name: String,
    pub scope: BadgeScope,
    pub condition: String,
}

impl From<BadgeKind> for BadgeDefinition {
    fn from(kind: BadgeKind) -> Self {
        Self {
            kind,
            name: kind.name().to_string(),
            scope: kind.scope(),
            condition: kind.condition().to_string(),
        }
    }
}

/// What a quest badge is unique over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AwardUniqueness {
    PerAttempt,
    /// One award per student across all quests (First Attempt).
    PerStudent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestBadgeAward {
    /// Idempotency key, unique in storage.
    #[serde(rename = "_id")]
    pub award_key: String,
    pub badge: BadgeKind,
    pub quest_attempt_id: AttemptId,
    pub student_id: StudentId,
    pub quest_id: QuestId,
    #[serde(with = "bson_datetime_as_chrono")]
    pub awarded_at: DateTime<Utc>,
}

impl QuestBadgeAward {
    pub fn new(
        badge: BadgeKind,
        uniqueness: AwardUniqueness,
        quest_attempt_id: AttemptId,
        student_id: StudentId,
        quest_id: QuestId,
    ) -> Self {
        let award_key = match uniqueness {
            AwardUniqueness::PerAttempt => format!("{}:attempt:{}", badge.key(), quest_attempt_id),
            AwardUniqueness::PerStudent => format!("{}:student:{}", badge.key(), student_id),
        };
        Self {
            award_key,
            badge,
            quest_attempt_id,
            student_id,
            quest_id,
            awarded_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourseBadgeAward {
    #[serde(rename = "_id")]
    pub award_key: String,
    pub badge: BadgeKind,
    pub enrollment_id: EnrollmentId,
    pub student_id: StudentId,
    #[serde(with = "bson_datetime_as_chrono")]
    pub awarded_at: DateTime<Utc>,
}

impl CourseBadgeAward {
    pub fn new(badge: BadgeKind, enrollment_id: EnrollmentId, student_id: StudentId) -> Self {
        Self {
            award_key: format!("{}:enrollment:{}", badge.key(), enrollment_id),
            badge,
            enrollment_id,
            student_id,
            awarded_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AwardOutcome {
    Awarded,
    AlreadyAwarded,
    /// The badge is not in the catalog.
    BadgeMissing,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_matches_serde_representation() {
        for kind in BadgeKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.key()));
        }
    }

    #[test]
    fn first_attempt_keys_collapse_per_student() {
        let a = QuestBadgeAward::new(BadgeKind::FirstAttempt, AwardUniqueness::PerStudent, 1, 9, 3);
        let b = QuestBadgeAward::new(BadgeKind::FirstAttempt, AwardUniqueness::PerStudent, 2, 9, 4);
        assert_eq!(a.award_key, b.award_key);

        let c = QuestBadgeAward::new(BadgeKind::Expert, AwardUniqueness::PerAttempt, 1, 9, 3);
        let d = QuestBadgeAward::new(BadgeKind::Expert, AwardUniqueness::PerAttempt, 2, 9, 3);
        assert_ne!(c.award_key, d.award_key);
    }

    #[test]
    fn attendance_badges_are_course_scoped() {
        assert_eq!(BadgeKind::FullAttendance.scope(), BadgeScope::Course);
        assert_eq!(BadgeKind::Speedster.scope(), BadgeScope::Quest);
    }
}
