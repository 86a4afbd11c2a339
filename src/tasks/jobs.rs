use backon::{ExponentialBuilder, Retryable};
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::auth;
use crate::config;
use crate::database;
use crate::models::{EmployeePhishingCampaign, PhishingAction, PhishingTemplate};
use crate::services::email::{Mailer, OutgoingEmail, TransportProfile};
use crate::services::{email, lifecycle, metrics, scoring};
use crate::tasks::TaskScheduler;

/// Launch a campaign at its start date.
pub fn schedule_start_campaign(campaign_id: Uuid, eta: DateTime<Utc>) -> Uuid {
    TaskScheduler::schedule_at(eta, async move {
        let pool = match database::pool().await {
            Ok(pool) => pool,
            Err(e) => return error!("start job: no database: {}", e),
        };
        if let Err(e) = lifecycle::start_campaign(&pool, campaign_id).await {
            error!(%campaign_id, "start job failed: {}", e);
        }
    })
}

/// Remind every employee who has not finished the campaign yet.
pub fn schedule_campaign_reminder(campaign_id: Uuid, eta: DateTime<Utc>) -> Uuid {
    TaskScheduler::schedule_at(eta, async move {
        let pool = match database::pool().await {
            Ok(pool) => pool,
            Err(e) => return error!("reminder job: no database: {}", e),
        };

        let campaign = match lifecycle::get_campaign(&pool, campaign_id).await {
            Ok(Some(campaign)) => campaign,
            Ok(None) => return,
            Err(e) => return error!(%campaign_id, "reminder job: {}", e),
        };

        let pending = sqlx::query_as::<_, lifecycle::EnrolledEmployee>(
            "SELECT ecc.employee_id, u.email, ep.first_name \
             FROM employee_course_campaigns ecc \
             JOIN course_campaigns cc ON cc.id = ecc.course_campaign_id \
             JOIN users u ON u.id = ecc.employee_id \
             JOIN employee_profiles ep ON ep.employee_id = ecc.employee_id \
             WHERE cc.campaign_id = $1 AND ecc.is_completed = FALSE",
        )
        .bind(campaign_id)
        .fetch_all(&pool)
        .await;

        let pending = match pending {
            Ok(rows) => rows,
            Err(e) => return error!(%campaign_id, "reminder job: {}", e),
        };

        for employee in pending {
            let (subject, body) = email::campaign_reminder(
                &campaign.name,
                employee.first_name.as_deref().unwrap_or(""),
                campaign.id,
            );
            if let Err(e) = Mailer::global()
                .send(OutgoingEmail::new(&employee.email, subject, body))
                .await
            {
                warn!(employee = %employee.email, "reminder email failed: {}", e);
            }
        }
    })
}

/// Send the simulated phishing email for one employee record. Retries with
/// exponential backoff up to 5 attempts before giving up.
pub fn schedule_phishing_send(record_id: Uuid, eta: DateTime<Utc>) -> Uuid {
    TaskScheduler::schedule_at(eta, async move {
        let pool = match database::pool().await {
            Ok(pool) => pool,
            Err(e) => return error!("phishing send: no database: {}", e),
        };

        let send = || async {
            let record = sqlx::query_as::<_, EmployeePhishingCampaign>(
                "SELECT * FROM employee_phishing_campaigns WHERE id = $1",
            )
            .bind(record_id)
            .fetch_optional(&pool)
            .await
            .map_err(|e| anyhow::anyhow!(e))?;

            let Some(record) = record else {
                // Record deleted while queued; nothing to send.
                return Ok(());
            };

            let to_email: String = sqlx::query_scalar("SELECT email FROM users WHERE id = $1")
                .bind(record.employee_id)
                .fetch_one(&pool)
                .await
                .map_err(|e| anyhow::anyhow!(e))?;

            let template = assigned_template(&pool, &record).await?;
            let email = build_phishing_email(&template, &to_email, record.id);
            Mailer::global().send(email).await.map_err(|e| anyhow::anyhow!(e))?;

            scoring::record_phishing_action(&pool, record.id, PhishingAction::NoAction)
                .await
                .map_err(|e| anyhow::anyhow!(e))?;
            scoring::rollup_employee_security_score(&pool, record.employee_id)
                .await
                .map_err(|e| anyhow::anyhow!(e))?;
            info!(record = %record.id, "phishing email sent");
            Ok::<(), anyhow::Error>(())
        };

        let result = send
            .retry(
                ExponentialBuilder::default()
                    .with_min_delay(Duration::from_secs(1))
                    .with_max_times(5),
            )
            .await;

        if let Err(e) = result {
            error!(%record_id, "phishing send exhausted retries: {}", e);
        }
    })
}

/// Resolve the record's template; assign a random one from the campaign set
/// when unset or no longer part of the campaign.
async fn assigned_template(
    pool: &sqlx::PgPool,
    record: &EmployeePhishingCampaign,
) -> anyhow::Result<PhishingTemplate> {
    if let Some(template_id) = record.phishing_template_id {
        let template = sqlx::query_as::<_, PhishingTemplate>(
            "SELECT t.* FROM phishing_templates t \
             JOIN phishing_campaign_templates pct ON pct.phishing_template_id = t.id \
             WHERE t.id = $1 AND pct.phishing_campaign_id = $2",
        )
        .bind(template_id)
        .bind(record.phishing_campaign_id)
        .fetch_optional(pool)
        .await?;
        if let Some(template) = template {
            return Ok(template);
        }
    }

    let templates = sqlx::query_as::<_, PhishingTemplate>(
        "SELECT t.* FROM phishing_templates t \
         JOIN phishing_campaign_templates pct ON pct.phishing_template_id = t.id \
         WHERE pct.phishing_campaign_id = $1",
    )
    .bind(record.phishing_campaign_id)
    .fetch_all(pool)
    .await?;

    let template = templates
        .choose(&mut rand::thread_rng())
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("phishing campaign {} has no templates", record.phishing_campaign_id))?;

    sqlx::query(
        "UPDATE employee_phishing_campaigns SET phishing_template_id = $1, updated_at = NOW() \
         WHERE id = $2",
    )
    .bind(template.id)
    .bind(record.id)
    .execute(pool)
    .await?;

    Ok(template)
}

const FIRST_NAMES: &[&str] = &[
    "Alex", "Jordan", "Morgan", "Casey", "Riley", "Taylor", "Avery", "Quinn",
];
const LAST_NAMES: &[&str] = &[
    "Reed", "Hayes", "Brooks", "Walsh", "Doyle", "Lane", "Frost", "Mercer",
];

fn generated_name() -> String {
    let mut rng = rand::thread_rng();
    format!(
        "{} {}",
        FIRST_NAMES[rng.gen_range(0..FIRST_NAMES.len())],
        LAST_NAMES[rng.gen_range(0..LAST_NAMES.len())]
    )
}

/// Render the template body, filling its dynamic context keys with generated
/// values, and attach the tracking header + transport profile.
pub fn build_phishing_email(
    template: &PhishingTemplate,
    to_email: &str,
    record_id: Uuid,
) -> OutgoingEmail {
    let mut body = template.email_body();
    let mut from_email = template.email_sender.clone();

    let name = generated_name();
    for key in template.dynamic_context_keys.0.iter() {
        match key.as_str() {
            "email_sender_name" => {
                if let Some(sender) = &template.email_sender {
                    from_email = Some(format!("{} <{}>", name, sender));
                }
            }
            "name" => {
                body = body
                    .replace("{{ name }}", &name)
                    .replace("{{name}}", &name);
            }
            _ => {}
        }
    }

    let mut headers = HashMap::new();
    headers.insert(
        config::config().email.phishing_tracking_header.clone(),
        record_id.to_string(),
    );

    OutgoingEmail {
        to: vec![to_email.to_string()],
        subject: template.email_subject.clone().unwrap_or_default(),
        html_body: body,
        from_email,
        headers,
        transport: Some(TransportProfile {
            host: template.email_host.clone(),
            port: template.email_port,
            username: template.email_username.clone(),
            password: template.email_password.clone(),
            use_tls: template.email_use_tls,
            use_ssl: template.email_use_ssl,
        }),
    }
}

/// Which row a one-time token rotation applies to.
#[derive(Debug, Clone, Copy)]
pub enum TokenTarget {
    User,
    AuthorizedDomain,
    DeliverabilityTest,
}

impl TokenTarget {
    fn table_column(&self) -> (&'static str, &'static str) {
        match self {
            TokenTarget::User => ("users", "token"),
            TokenTarget::AuthorizedDomain => ("authorized_domains", "verification_token"),
            TokenTarget::DeliverabilityTest => ("deliverability_tests", "verification_token"),
        }
    }
}

/// Invalidate a one-time token after its lifetime by overwriting it with a
/// fresh random value.
pub fn schedule_token_rotation(target: TokenTarget, row_id: Uuid, eta: DateTime<Utc>) -> Uuid {
    TaskScheduler::schedule_at(eta, async move {
        let pool = match database::pool().await {
            Ok(pool) => pool,
            Err(e) => return error!("token rotation: no database: {}", e),
        };
        let (table, column) = target.table_column();
        let sql = format!(
            "UPDATE {table} SET {column} = $1, updated_at = NOW() WHERE id = $2",
        );
        if let Err(e) = sqlx::query(&sql)
            .bind(auth::one_time_token())
            .bind(row_id)
            .execute(&pool)
            .await
        {
            error!(%row_id, table, "token rotation failed: {}", e);
        }
    })
}

/// Append security-score and completed-course snapshots once a day.
pub fn spawn_daily_snapshot_loop() {
    tokio::spawn(async {
        let mut interval = tokio::time::interval(Duration::from_secs(86_400));
        interval.tick().await; // first tick fires immediately; skip it
        loop {
            interval.tick().await;
            match database::pool().await {
                Ok(pool) => {
                    if let Err(e) = metrics::store_daily_snapshots(&pool).await {
                        error!("daily snapshot failed: {}", e);
                    }
                }
                Err(e) => error!("daily snapshot: no database: {}", e),
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sqlx::types::Json;

    fn template(keys: Vec<&str>) -> PhishingTemplate {
        let now = Utc::now();
        PhishingTemplate {
            id: Uuid::new_v4(),
            organization_id: None,
            name: "IT reset".to_string(),
            description: None,
            vendor: None,
            is_public: true,
            email_subject: Some("Password expiring".to_string()),
            email_sender: Some("helpdesk@corp-it.example".to_string()),
            email_sender_name: None,
            email_domain: Some("corp-it.example".to_string()),
            email_html_content: Some(
                "<html><head><title>t</title></head><body>Hi {{ name }}</body></html>".to_string(),
            ),
            email_css_styles: None,
            landing_page_html_content: None,
            landing_page_css_styles: None,
            email_host: Some("mail.corp-it.example".to_string()),
            email_port: Some(587),
            email_username: None,
            email_password: None,
            email_use_tls: true,
            email_use_ssl: false,
            dynamic_context_keys: Json(keys.into_iter().map(String::from).collect()),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn phishing_email_fills_dynamic_name() {
        let record_id = Uuid::new_v4();
        let email = build_phishing_email(&template(vec!["name"]), "e@example.com", record_id);
        assert!(!email.html_body.contains("{{ name }}"));
        assert_eq!(email.from_email.as_deref(), Some("helpdesk@corp-it.example"));
        assert_eq!(
            email.headers.get("X-Rampart-Record"),
            Some(&record_id.to_string())
        );
        assert!(email.transport.as_ref().unwrap().use_tls);
    }

    #[test]
    fn phishing_email_randomizes_sender_name() {
        let email = build_phishing_email(
            &template(vec!["email_sender_name"]),
            "e@example.com",
            Uuid::new_v4(),
        );
        let from = email.from_email.unwrap();
        assert!(from.ends_with("<helpdesk@corp-it.example>"));
        assert_ne!(from, "helpdesk@corp-it.example");
    }
}
