use chrono::{Duration, Utc};
use rand::Rng;
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::database::DatabaseError;
use crate::models::{Campaign, CourseCampaign, EmailDeliveryType, PhishingCampaign};
use crate::services::email::{self, Mailer, OutgoingEmail};
use crate::tasks::jobs;
use crate::tasks::TaskScheduler;
use crate::config;

pub async fn get_campaign(pool: &PgPool, campaign_id: Uuid) -> Result<Option<Campaign>, DatabaseError> {
    let campaign = sqlx::query_as::<_, Campaign>("SELECT * FROM campaigns WHERE id = $1")
        .bind(campaign_id)
        .fetch_optional(pool)
        .await?;
    Ok(campaign)
}

pub async fn get_course_campaign(
    pool: &PgPool,
    campaign_id: Uuid,
) -> Result<Option<CourseCampaign>, DatabaseError> {
    let row = sqlx::query_as::<_, CourseCampaign>(
        "SELECT * FROM course_campaigns WHERE campaign_id = $1",
    )
    .bind(campaign_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn get_phishing_campaign(
    pool: &PgPool,
    campaign_id: Uuid,
) -> Result<Option<PhishingCampaign>, DatabaseError> {
    let row = sqlx::query_as::<_, PhishingCampaign>(
        "SELECT * FROM phishing_campaigns WHERE campaign_id = $1",
    )
    .bind(campaign_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Enrolled employees with the bits needed for notification emails.
#[derive(Debug, sqlx::FromRow)]
pub struct EnrolledEmployee {
    pub employee_id: Uuid,
    pub email: String,
    pub first_name: Option<String>,
}

async fn course_campaign_employees(
    pool: &PgPool,
    course_campaign_id: Uuid,
) -> Result<Vec<EnrolledEmployee>, DatabaseError> {
    let rows = sqlx::query_as::<_, EnrolledEmployee>(
        "SELECT ecc.employee_id, u.email, ep.first_name \
         FROM employee_course_campaigns ecc \
         JOIN users u ON u.id = ecc.employee_id \
         JOIN employee_profiles ep ON ep.employee_id = ecc.employee_id \
         WHERE ecc.course_campaign_id = $1",
    )
    .bind(course_campaign_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Replace the enrolled-employee set of a campaign (wizard step 2). Rows for
/// employees no longer in the set are dropped, existing rows are kept so an
/// in-flight funnel/progress state survives re-editing the step.
pub async fn set_campaign_employees(
    pool: &PgPool,
    campaign: &Campaign,
    employee_ids: &[Uuid],
) -> Result<(), DatabaseError> {
    if campaign.is_phishing() {
        let phishing = get_phishing_campaign(pool, campaign.id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound("Phishing campaign not found".to_string()))?;

        sqlx::query(
            "DELETE FROM employee_phishing_campaigns \
             WHERE phishing_campaign_id = $1 AND employee_id <> ALL($2)",
        )
        .bind(phishing.id)
        .bind(employee_ids)
        .execute(pool)
        .await?;

        sqlx::query(
            "INSERT INTO employee_phishing_campaigns (id, employee_id, phishing_campaign_id) \
             SELECT gen_random_uuid(), e.id, $1 FROM UNNEST($2::uuid[]) AS e(id) \
             ON CONFLICT (employee_id, phishing_campaign_id) DO NOTHING",
        )
        .bind(phishing.id)
        .bind(employee_ids)
        .execute(pool)
        .await?;
    } else {
        let course_campaign = get_course_campaign(pool, campaign.id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound("Course campaign not found".to_string()))?;

        sqlx::query(
            "DELETE FROM employee_course_campaigns \
             WHERE course_campaign_id = $1 AND employee_id <> ALL($2)",
        )
        .bind(course_campaign.id)
        .bind(employee_ids)
        .execute(pool)
        .await?;

        sqlx::query(
            "INSERT INTO employee_course_campaigns (id, employee_id, course_campaign_id) \
             SELECT gen_random_uuid(), e.id, $1 FROM UNNEST($2::uuid[]) AS e(id) \
             ON CONFLICT (employee_id, course_campaign_id) DO NOTHING",
        )
        .bind(course_campaign.id)
        .bind(employee_ids)
        .execute(pool)
        .await?;
    }
    Ok(())
}

/// Derive the campaign window from the phishing delivery plan. Immediate
/// delivery pins both delivery and start dates to now.
pub async fn update_phishing_campaign_dates(
    pool: &PgPool,
    campaign_id: Uuid,
) -> Result<(), DatabaseError> {
    let Some(phishing) = get_phishing_campaign(pool, campaign_id).await? else {
        return Err(DatabaseError::NotFound("Phishing campaign not found".to_string()));
    };

    match phishing.email_delivery_type {
        EmailDeliveryType::Immediately => {
            let now = Utc::now();
            sqlx::query(
                "UPDATE phishing_campaigns \
                 SET email_delivery_date = $1, email_delivery_start_date = $1, updated_at = NOW() \
                 WHERE id = $2",
            )
            .bind(now)
            .bind(phishing.id)
            .execute(pool)
            .await?;
            sqlx::query("UPDATE campaigns SET start_date = $1, updated_at = NOW() WHERE id = $2")
                .bind(now)
                .bind(campaign_id)
                .execute(pool)
                .await?;
        }
        EmailDeliveryType::Scheduled => {
            sqlx::query(
                "UPDATE campaigns SET start_date = $1, end_date = NULL, updated_at = NOW() \
                 WHERE id = $2",
            )
            .bind(phishing.email_delivery_date)
            .bind(campaign_id)
            .execute(pool)
            .await?;
        }
        EmailDeliveryType::ScheduledRange => {
            sqlx::query(
                "UPDATE campaigns SET start_date = $1, end_date = $2, updated_at = NOW() \
                 WHERE id = $3",
            )
            .bind(phishing.email_delivery_start_date)
            .bind(phishing.email_delivery_end_date)
            .bind(campaign_id)
            .execute(pool)
            .await?;
        }
    }
    Ok(())
}

async fn store_campaign_task_ids(
    pool: &PgPool,
    campaign_id: Uuid,
    task_ids: &[Uuid],
) -> Result<(), DatabaseError> {
    sqlx::query("UPDATE campaigns SET background_task_ids = $1, updated_at = NOW() WHERE id = $2")
        .bind(Json(task_ids.to_vec()))
        .bind(campaign_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Kick off the campaign after wizard step 4: schedule the launch and the
/// per-employee work according to the campaign kind.
pub async fn initiate_campaign(pool: &PgPool, campaign_id: Uuid) -> Result<(), DatabaseError> {
    let Some(campaign) = get_campaign(pool, campaign_id).await? else {
        warn!(%campaign_id, "initiate: campaign vanished");
        return Ok(());
    };

    if campaign.is_phishing() {
        update_phishing_campaign_dates(pool, campaign.id).await?;
        initiate_phishing_campaign(pool, &campaign).await
    } else {
        initiate_course_campaign(pool, &campaign).await
    }
}

async fn initiate_course_campaign(pool: &PgPool, campaign: &Campaign) -> Result<(), DatabaseError> {
    let Some(course_campaign) = get_course_campaign(pool, campaign.id).await? else {
        return Err(DatabaseError::NotFound("Course campaign not found".to_string()));
    };

    let toggles: (bool, bool) = sqlx::query_as(
        "SELECT campaign_email_notification, reminder_notification \
         FROM organization_profiles WHERE organization_id = $1",
    )
    .bind(campaign.organization_id)
    .fetch_one(pool)
    .await?;
    let (email_notification, reminder_notification) = toggles;

    let employees = course_campaign_employees(pool, course_campaign.id).await?;
    if email_notification {
        let start = campaign
            .start_date
            .map(|d| d.format("%B %d, %Y, %H:%M").to_string())
            .unwrap_or_default();
        let end = campaign
            .end_date
            .map(|d| d.format("%B %d, %Y, %H:%M").to_string())
            .unwrap_or_default();
        for employee in &employees {
            let (subject, body) = email::campaign_enrolled(
                &campaign.name,
                campaign.kind.as_str(),
                employee.first_name.as_deref().unwrap_or(""),
                &start,
                &end,
            );
            if let Err(e) = Mailer::global()
                .send(OutgoingEmail::new(&employee.email, subject, body))
                .await
            {
                warn!(employee = %employee.email, "enrollment email failed: {}", e);
            }
        }
    }

    // Reschedule the launch job from scratch
    TaskScheduler::revoke_all(&campaign.background_task_ids.0);
    let start_at = campaign.start_date.unwrap_or_else(Utc::now);
    let start_task = jobs::schedule_start_campaign(campaign.id, start_at);
    store_campaign_task_ids(pool, campaign.id, &[start_task]).await?;

    // Reminder emails before the deadline
    TaskScheduler::revoke_all(&course_campaign.reminder_task_ids.0);
    let mut reminder_ids = Vec::new();
    if reminder_notification {
        if let Some(end_date) = campaign.end_date {
            let now = Utc::now();
            for offset in &config::config().campaigns.reminder_offsets_secs {
                let reminder_at = end_date - Duration::seconds(*offset as i64);
                if reminder_at > now {
                    reminder_ids.push(jobs::schedule_campaign_reminder(campaign.id, reminder_at));
                }
            }
        }
    }
    sqlx::query("UPDATE course_campaigns SET reminder_task_ids = $1, updated_at = NOW() WHERE id = $2")
        .bind(Json(reminder_ids))
        .bind(course_campaign.id)
        .execute(pool)
        .await?;

    info!(campaign = %campaign.id, "course campaign initiated");
    Ok(())
}

async fn initiate_phishing_campaign(pool: &PgPool, campaign: &Campaign) -> Result<(), DatabaseError> {
    let Some(phishing) = get_phishing_campaign(pool, campaign.id).await? else {
        return Err(DatabaseError::NotFound("Phishing campaign not found".to_string()));
    };

    let record_ids: Vec<Uuid> = sqlx::query_scalar(
        "SELECT id FROM employee_phishing_campaigns WHERE phishing_campaign_id = $1",
    )
    .bind(phishing.id)
    .fetch_all(pool)
    .await?;

    match phishing.email_delivery_type {
        EmailDeliveryType::Immediately => {
            start_campaign(pool, campaign.id).await?;
            // Staggered sends so the whole company does not get the same
            // email in the same second.
            let mut eta = Utc::now() + Duration::minutes(rand::thread_rng().gen_range(1..=5));
            for record_id in record_ids {
                eta += Duration::minutes(rand::thread_rng().gen_range(1..=5));
                let task_id = jobs::schedule_phishing_send(record_id, eta);
                store_record_task_id(pool, record_id, task_id).await?;
            }
        }
        EmailDeliveryType::Scheduled => {
            let delivery_at = phishing.email_delivery_date.unwrap_or_else(Utc::now);
            let start_task = jobs::schedule_start_campaign(campaign.id, delivery_at);
            store_campaign_task_ids(pool, campaign.id, &[start_task]).await?;
            for record_id in record_ids {
                let task_id = jobs::schedule_phishing_send(record_id, delivery_at);
                store_record_task_id(pool, record_id, task_id).await?;
            }
        }
        EmailDeliveryType::ScheduledRange => {
            let window_start = phishing.email_delivery_start_date.unwrap_or_else(Utc::now);
            let window_end = phishing.email_delivery_end_date.unwrap_or(window_start);
            let window_secs = (window_end - window_start).num_seconds().max(0);

            let start_task = jobs::schedule_start_campaign(campaign.id, window_start);
            store_campaign_task_ids(pool, campaign.id, &[start_task]).await?;

            for record_id in record_ids {
                let jitter = if window_secs > 0 {
                    rand::thread_rng().gen_range(0..=window_secs)
                } else {
                    0
                };
                let task_id =
                    jobs::schedule_phishing_send(record_id, window_start + Duration::seconds(jitter));
                store_record_task_id(pool, record_id, task_id).await?;
            }
        }
    }

    info!(campaign = %campaign.id, "phishing campaign initiated");
    Ok(())
}

async fn store_record_task_id(
    pool: &PgPool,
    record_id: Uuid,
    task_id: Uuid,
) -> Result<(), DatabaseError> {
    sqlx::query(
        "UPDATE employee_phishing_campaigns SET background_task_id = $1, updated_at = NOW() \
         WHERE id = $2",
    )
    .bind(task_id)
    .bind(record_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Flip the campaign to active; course campaigns notify every enrolled
/// employee. Runs as the scheduled launch job.
pub async fn start_campaign(pool: &PgPool, campaign_id: Uuid) -> Result<(), DatabaseError> {
    let Some(campaign) = get_campaign(pool, campaign_id).await? else {
        warn!(%campaign_id, "start: campaign vanished");
        return Ok(());
    };

    sqlx::query("UPDATE campaigns SET status = 'active', updated_at = NOW() WHERE id = $1")
        .bind(campaign.id)
        .execute(pool)
        .await?;

    if !campaign.is_phishing() {
        if let Some(course_campaign) = get_course_campaign(pool, campaign.id).await? {
            for employee in course_campaign_employees(pool, course_campaign.id).await? {
                let (subject, body) = email::campaign_started(
                    &campaign.name,
                    employee.first_name.as_deref().unwrap_or(""),
                    campaign.id,
                );
                if let Err(e) = Mailer::global()
                    .send(OutgoingEmail::new(&employee.email, subject, body))
                    .await
                {
                    warn!(employee = %employee.email, "start email failed: {}", e);
                }
            }
        }
    }

    info!(campaign = %campaign.id, "campaign started");
    Ok(())
}

/// Revoke every pending job tied to the campaign and mark it cancelled.
pub async fn cancel_campaign(pool: &PgPool, campaign_id: Uuid) -> Result<(), DatabaseError> {
    let Some(campaign) = get_campaign(pool, campaign_id).await? else {
        return Err(DatabaseError::NotFound("Campaign not found".to_string()));
    };

    TaskScheduler::revoke_all(&campaign.background_task_ids.0);
    store_campaign_task_ids(pool, campaign.id, &[]).await?;

    if campaign.is_phishing() {
        if let Some(phishing) = get_phishing_campaign(pool, campaign.id).await? {
            let task_ids: Vec<Option<Uuid>> = sqlx::query_scalar(
                "SELECT background_task_id FROM employee_phishing_campaigns \
                 WHERE phishing_campaign_id = $1",
            )
            .bind(phishing.id)
            .fetch_all(pool)
            .await?;
            TaskScheduler::revoke_all(&task_ids.into_iter().flatten().collect::<Vec<_>>());
        }
    } else if let Some(course_campaign) = get_course_campaign(pool, campaign.id).await? {
        TaskScheduler::revoke_all(&course_campaign.reminder_task_ids.0);
        sqlx::query(
            "UPDATE course_campaigns SET reminder_task_ids = '[]', updated_at = NOW() WHERE id = $1",
        )
        .bind(course_campaign.id)
        .execute(pool)
        .await?;
    }

    sqlx::query("UPDATE campaigns SET status = 'cancelled', updated_at = NOW() WHERE id = $1")
        .bind(campaign.id)
        .execute(pool)
        .await?;

    info!(campaign = %campaign.id, "campaign cancelled");
    Ok(())
}

/// Delete a campaign; pending jobs are revoked first.
pub async fn delete_campaign(pool: &PgPool, campaign_id: Uuid) -> Result<(), DatabaseError> {
    cancel_campaign(pool, campaign_id).await?;
    sqlx::query("DELETE FROM campaigns WHERE id = $1")
        .bind(campaign_id)
        .execute(pool)
        .await?;
    Ok(())
}
