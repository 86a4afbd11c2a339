use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

use super::{EmailDeliveryType, PhishingAction};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PhishingTemplate {
    pub id: Uuid,
    /// Null for vendor-provided templates.
    pub organization_id: Option<Uuid>,
    pub name: String,
    pub description: Option<String>,
    pub vendor: Option<String>,
    pub is_public: bool,
    pub email_subject: Option<String>,
    pub email_sender: Option<String>,
    pub email_sender_name: Option<String>,
    pub email_domain: Option<String>,
    pub email_html_content: Option<String>,
    pub email_css_styles: Option<String>,
    pub landing_page_html_content: Option<String>,
    pub landing_page_css_styles: Option<String>,
    // Transport profile forwarded to the mail relay for this sender.
    #[serde(skip_serializing)]
    pub email_host: Option<String>,
    #[serde(skip_serializing)]
    pub email_port: Option<i32>,
    #[serde(skip_serializing)]
    pub email_username: Option<String>,
    #[serde(skip_serializing)]
    pub email_password: Option<String>,
    pub email_use_tls: bool,
    pub email_use_ssl: bool,
    /// Context keys filled with generated values when the email is rendered.
    pub dynamic_context_keys: Json<Vec<String>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PhishingTemplate {
    /// Email HTML with the template's stylesheet inlined into the head.
    pub fn email_body(&self) -> String {
        let html = self.email_html_content.clone().unwrap_or_default();
        let css = self.email_css_styles.as_deref().unwrap_or("");
        if css.is_empty() || !html.contains("</title>") {
            return html;
        }
        html.replace(
            "</title>",
            &format!("</title>\n<style>\n{}\n</style>", css),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PhishingCampaign {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub email_delivery_type: EmailDeliveryType,
    pub email_delivery_date: Option<DateTime<Utc>>,
    pub email_delivery_start_date: Option<DateTime<Utc>>,
    pub email_delivery_end_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-employee funnel state: sent → opened → clicked → compromised/reported.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct EmployeePhishingCampaign {
    pub id: Uuid,
    pub employee_id: Uuid,
    pub phishing_campaign_id: Uuid,
    pub phishing_template_id: Option<Uuid>,
    pub email_sent_at: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
    pub clicked_at: Option<DateTime<Utc>>,
    pub compromised_at: Option<DateTime<Utc>>,
    pub reported_at: Option<DateTime<Utc>>,
    pub is_email_sent: bool,
    pub is_opened: bool,
    pub is_clicked: bool,
    pub is_compromised: bool,
    pub is_reported: bool,
    /// Highest-risk action taken so far.
    pub action: PhishingAction,
    pub security_score: Option<f64>,
    #[serde(skip_serializing)]
    pub background_task_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_body_inlines_styles() {
        let now = Utc::now();
        let template = PhishingTemplate {
            id: Uuid::new_v4(),
            organization_id: None,
            name: "Payroll update".to_string(),
            description: None,
            vendor: None,
            is_public: true,
            email_subject: Some("Action required".to_string()),
            email_sender: Some("it@payro11.example".to_string()),
            email_sender_name: None,
            email_domain: Some("payro11.example".to_string()),
            email_html_content: Some("<html><head><title>Hi</title></head></html>".to_string()),
            email_css_styles: Some("body { color: red; }".to_string()),
            landing_page_html_content: None,
            landing_page_css_styles: None,
            email_host: None,
            email_port: None,
            email_username: None,
            email_password: None,
            email_use_tls: false,
            email_use_ssl: false,
            dynamic_context_keys: Json(vec![]),
            created_at: now,
            updated_at: now,
        };
        let body = template.email_body();
        assert!(body.contains("<style>"));
        assert!(body.contains("color: red"));
    }
}
