use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{
    bson_datetime_as_chrono_option, CourseGroupId, CourseId, EnrollmentId, StudentId,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Student {
    #[serde(rename = "_id")]
    pub id: StudentId,
    pub username: String,
    /// Lifetime point total, only ever moved by the points ledger.
    #[serde(default)]
    pub total_points: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum CourseStatus {
    #[default]
    Active,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Course {
    #[serde(rename = "_id")]
    pub id: CourseId,
    pub name: String,
    #[serde(default)]
    pub status: CourseStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourseGroup {
    #[serde(rename = "_id")]
    pub id: CourseGroupId,
    pub course_id: CourseId,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enrollment {
    #[serde(rename = "_id")]
    pub id: EnrollmentId,
    pub student_id: StudentId,
    pub course_group_id: CourseGroupId,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "bson_datetime_as_chrono_option"
    )]
    pub completed_on: Option<DateTime<Utc>>,
}
