use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::{ContentKind, LearningType};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Content {
    pub id: Uuid,
    pub organization_id: Option<Uuid>,
    pub title: String,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<ContentKind>,
    pub learning_type: Option<LearningType>,
    pub instructor_name: Option<String>,
    pub is_public: bool,
    pub duration_secs: Option<i64>,
    pub thumbnail: Option<String>,
    // Uploaded media metadata; the object store itself is external.
    pub file_name: Option<String>,
    pub file_path: Option<String>,
    pub file_size_mb: f64,
    pub file_type: Option<String>,
    pub is_uploaded: bool,
    pub uploaded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
