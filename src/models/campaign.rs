use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

use super::{CampaignKind, CampaignStatus};

/// The four creation-wizard milestones. Step N is only reachable once
/// step N-1 has completed; step 4 submits the campaign.
pub const WIZARD_FINAL_STEP: i32 = 4;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Campaign {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub kind: CampaignKind,
    pub status: CampaignStatus,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub last_step_completed: i32,
    pub automatically_enroll_employees: bool,
    /// Scheduler ids for the pending launch jobs, revoked on cancel.
    #[serde(skip_serializing)]
    pub background_task_ids: Json<Vec<Uuid>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    pub fn is_phishing(&self) -> bool {
        self.kind == CampaignKind::Phishing
    }

    /// Wizard steps are editable only before the campaign leaves the draft /
    /// scheduled stage.
    pub fn is_editable(&self) -> bool {
        !matches!(
            self.status,
            CampaignStatus::Active | CampaignStatus::Completed | CampaignStatus::Cancelled
        )
    }

    /// Human-readable time left until the end date, e.g. "3 days left".
    pub fn expiry(&self, now: DateTime<Utc>) -> String {
        let Some(end_date) = self.end_date else {
            return "No end date set".to_string();
        };
        let remaining = end_date - now;
        if remaining.num_seconds() <= 0 {
            return "Ended".to_string();
        }
        let text = if remaining.num_days() >= 1 {
            let days = remaining.num_days();
            format!("{} day{}", days, if days == 1 { "" } else { "s" })
        } else if remaining.num_hours() >= 1 {
            let hours = remaining.num_hours();
            format!("{} hour{}", hours, if hours == 1 { "" } else { "s" })
        } else {
            let minutes = remaining.num_minutes().max(1);
            format!("{} minute{}", minutes, if minutes == 1 { "" } else { "s" })
        };
        format!("{} left", text)
    }
}

/// completed / total counters shown on campaign cards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignActivity {
    pub completed: i64,
    pub total: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CourseCampaign {
    pub id: Uuid,
    pub campaign_id: Uuid,
    #[serde(skip_serializing)]
    pub reminder_task_ids: Json<Vec<Uuid>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct EmployeeCourseCampaign {
    pub id: Uuid,
    pub employee_id: Uuid,
    pub course_campaign_id: Uuid,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub is_started: bool,
    pub is_completed: bool,
    pub is_expired: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn campaign(status: CampaignStatus, end: Option<DateTime<Utc>>) -> Campaign {
        let now = Utc::now();
        Campaign {
            id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            name: "Q3 onboarding".to_string(),
            description: None,
            kind: CampaignKind::General,
            status,
            start_date: None,
            end_date: end,
            last_step_completed: 0,
            automatically_enroll_employees: false,
            background_task_ids: Json(vec![]),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn editability_follows_status() {
        assert!(campaign(CampaignStatus::Draft, None).is_editable());
        assert!(campaign(CampaignStatus::Scheduled, None).is_editable());
        assert!(!campaign(CampaignStatus::Active, None).is_editable());
        assert!(!campaign(CampaignStatus::Cancelled, None).is_editable());
    }

    #[test]
    fn expiry_wording() {
        let now = Utc::now();
        assert_eq!(campaign(CampaignStatus::Draft, None).expiry(now), "No end date set");
        let c = campaign(CampaignStatus::Active, Some(now + Duration::days(3)));
        assert_eq!(c.expiry(now), "3 days left");
        let c = campaign(CampaignStatus::Active, Some(now - Duration::hours(1)));
        assert_eq!(c.expiry(now), "Ended");
    }
}
