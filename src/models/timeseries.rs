use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// Append-only daily snapshots backing the dashboard trend charts.

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserSecurityScorePoint {
    pub id: Uuid,
    pub user_id: Uuid,
    pub security_score: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserCompletedCoursesPoint {
    pub id: Uuid,
    pub user_id: Uuid,
    pub courses_completed: i32,
    pub created_at: DateTime<Utc>,
}
