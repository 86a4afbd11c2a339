use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::LearningType;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Course {
    pub id: Uuid,
    /// Null for platform-provided courses.
    pub organization_id: Option<Uuid>,
    pub name: String,
    pub description: Option<String>,
    pub is_public: bool,
    pub learning_type: LearningType,
    pub thumbnail: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Self-paced attempt of a course, outside any campaign.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserCourse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub course_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub is_started: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub is_completed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
