use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::{EmployeeStatus, Role};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_digest: Option<String>,
    pub role: Role,
    pub is_active: bool,
    pub is_email_verified: bool,
    pub last_login: Option<DateTime<Utc>>,
    /// One-time token for activation / password reset flows.
    #[serde(skip_serializing)]
    pub token: Option<String>,
    /// Scheduler id of the pending token-rotation job.
    #[serde(skip_serializing)]
    pub token_task_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct OrganizationProfile {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub url: Option<String>,
    pub cut_off_score: f64,
    pub security_score: Option<f64>,
    /// Employees receive an email with every new campaign they are enrolled in
    pub campaign_email_notification: bool,
    /// Employees receive an email every time they complete a campaign
    pub campaign_completion_notification: bool,
    /// Employees receive reminder emails before the campaign deadline
    pub reminder_notification: bool,
    pub phishing_report_email: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct EmployeeProfile {
    pub id: Uuid,
    pub employee_id: Uuid,
    pub organization_id: Uuid,
    pub department_id: Option<Uuid>,
    pub staff_id: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub security_score: Option<f64>,
    pub status: EmployeeStatus,
    pub deactivated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Department {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub security_score: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AuthorizedDomain {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub email: Option<String>,
    pub domain: String,
    pub verified_on: Option<DateTime<Utc>>,
    #[serde(skip_serializing)]
    pub verification_token: Option<String>,
    #[serde(skip_serializing)]
    pub verification_task_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DeliverabilityTest {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub email: Option<String>,
    pub verified_on: Option<DateTime<Utc>>,
    #[serde(skip_serializing)]
    pub verification_token: Option<String>,
    #[serde(skip_serializing)]
    pub verification_task_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
