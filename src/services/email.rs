use serde::Serialize;
use std::collections::HashMap;
use std::sync::OnceLock;
use thiserror::Error;
use tracing::info;

use crate::config;

#[derive(Debug, Error)]
pub enum EmailError {
    #[error("relay request failed: {0}")]
    Relay(#[from] reqwest::Error),

    #[error("relay rejected message: {0}")]
    Rejected(String),
}

/// Per-sender transport profile forwarded to the relay; used by phishing
/// templates that send from their own (spoofed-looking) domains.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TransportProfile {
    pub host: Option<String>,
    pub port: Option<i32>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub use_tls: bool,
    pub use_ssl: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutgoingEmail {
    pub to: Vec<String>,
    pub subject: String,
    pub html_body: String,
    pub from_email: Option<String>,
    pub headers: HashMap<String, String>,
    pub transport: Option<TransportProfile>,
}

impl OutgoingEmail {
    pub fn new(to: impl Into<String>, subject: impl Into<String>, html_body: String) -> Self {
        Self {
            to: vec![to.into()],
            subject: subject.into(),
            html_body,
            from_email: None,
            headers: HashMap::new(),
            transport: None,
        }
    }
}

/// Outbound mail client. SMTP delivery itself is delegated to an HTTP relay
/// service; with no relay configured messages are logged instead, which is
/// what development and the test suite run with.
pub enum Mailer {
    Relay { client: reqwest::Client, endpoint: String, token: String },
    Log,
}

impl Mailer {
    pub fn global() -> &'static Mailer {
        static INSTANCE: OnceLock<Mailer> = OnceLock::new();
        INSTANCE.get_or_init(|| {
            let email = &config::config().email;
            if email.relay_url.is_empty() {
                Mailer::Log
            } else {
                Mailer::Relay {
                    client: reqwest::Client::new(),
                    endpoint: email.relay_url.clone(),
                    token: email.relay_token.clone(),
                }
            }
        })
    }

    pub async fn send(&self, email: OutgoingEmail) -> Result<(), EmailError> {
        match self {
            Mailer::Relay { client, endpoint, token } => {
                let response = client
                    .post(endpoint)
                    .bearer_auth(token)
                    .json(&email)
                    .send()
                    .await?;
                if !response.status().is_success() {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    return Err(EmailError::Rejected(format!("{}: {}", status, body)));
                }
                Ok(())
            }
            Mailer::Log => {
                info!(to = ?email.to, subject = %email.subject, "email (log-only delivery)");
                Ok(())
            }
        }
    }
}

fn frontend_url() -> &'static str {
    &config::config().email.frontend_url
}

// Transactional bodies. Plain HTML built inline; layout/styling lives with
// the frontend-hosted templates the links point into.

pub fn organization_activation(token: &str) -> (String, String) {
    (
        "Activate your organization account".to_string(),
        format!(
            "<p>Welcome! Confirm your email to finish setting up your organization.</p>\
             <p><a href=\"{}activate/{}\">Activate account</a></p>",
            frontend_url(),
            token
        ),
    )
}

pub fn employee_invite(token: &str) -> (String, String) {
    (
        "You have been invited to security training".to_string(),
        format!(
            "<p>Your organization has enrolled you in security-awareness training.</p>\
             <p><a href=\"{}employee/{}/complete-registration\">Complete your registration</a></p>",
            frontend_url(),
            token
        ),
    )
}

pub fn password_reset(token: &str) -> (String, String) {
    (
        "Reset your password".to_string(),
        format!(
            "<p>Click the link below to choose a new password.</p>\
             <p><a href=\"{}reset-password/{}\">Reset password</a></p>",
            frontend_url(),
            token
        ),
    )
}

pub fn password_changed() -> (String, String) {
    (
        "Your password was changed".to_string(),
        "<p>Your password was just changed. If this wasn't you, reset it immediately.</p>"
            .to_string(),
    )
}

pub fn campaign_enrolled(
    campaign_name: &str,
    campaign_kind: &str,
    first_name: &str,
    start_date: &str,
    end_date: &str,
) -> (String, String) {
    (
        "You've been added to a learning campaign!".to_string(),
        format!(
            "<p>Hi {first_name},</p>\
             <p>You have been enrolled in the {campaign_kind} campaign <b>{campaign_name}</b>.</p>\
             <p>It runs from {start_date} to {end_date}.</p>",
        ),
    )
}

pub fn campaign_started(campaign_name: &str, first_name: &str, campaign_id: uuid::Uuid) -> (String, String) {
    (
        format!("Campaign - {} has started!", campaign_name),
        format!(
            "<p>Hi {first_name},</p>\
             <p>The campaign <b>{campaign_name}</b> is now open.</p>\
             <p><a href=\"{}employee/dashboard/campaign/{}\">Go to your campaign</a></p>",
            frontend_url(),
            campaign_id,
        ),
    )
}

pub fn campaign_reminder(campaign_name: &str, first_name: &str, campaign_id: uuid::Uuid) -> (String, String) {
    (
        "Tick Tock! You have a Campaign to Complete!".to_string(),
        format!(
            "<p>Hi {first_name},</p>\
             <p>The deadline for <b>{campaign_name}</b> is approaching.</p>\
             <p><a href=\"{}employee/dashboard/campaign/{}\">Pick up where you left off</a></p>",
            frontend_url(),
            campaign_id,
        ),
    )
}

pub fn campaign_completed(campaign_name: &str, first_name: &str) -> (String, String) {
    (
        "Congratulations on Completing Your Campaign!".to_string(),
        format!(
            "<p>Well done {first_name}, you completed <b>{campaign_name}</b>.</p>",
        ),
    )
}

pub fn domain_verification(token: &str) -> (String, String) {
    (
        "Verify your domain".to_string(),
        format!(
            "<p>Click on the link to verify your domain.</p>\
             <p><a href=\"{}domain-verification/{}\">Verify domain</a></p>",
            frontend_url(),
            token
        ),
    )
}

pub fn deliverability_test(token: &str) -> (String, String) {
    (
        "Confirm the email was delivered to you".to_string(),
        format!(
            "<p>Click on this link to confirm you received this email.</p>\
             <p><a href=\"{}deliverability-test/{}\">Confirm delivery</a></p>",
            frontend_url(),
            token
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bodies_embed_tokens_and_links() {
        let (subject, body) = employee_invite("abc123");
        assert!(subject.contains("invited"));
        assert!(body.contains("abc123"));
        assert!(body.contains("complete-registration"));
    }

    #[tokio::test]
    async fn log_mailer_accepts_messages() {
        let email = OutgoingEmail::new("e@example.com", "subject", "<p>hi</p>".to_string());
        assert!(Mailer::Log.send(email).await.is_ok());
    }
}
