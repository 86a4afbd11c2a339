use chrono::{Duration, Utc};
use serde::Deserialize;
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

use crate::auth;
use crate::config;
use crate::database::DatabaseError;
use crate::models::{EmployeeStatus, Role};
use crate::services::email::{self, Mailer, OutgoingEmail};
use crate::tasks::jobs::{self, TokenTarget};
use crate::tasks::TaskScheduler;

/// Rotate a user's one-time token: revoke the previous expiry job, store a
/// fresh token and schedule its invalidation.
pub async fn set_user_token(pool: &PgPool, user_id: Uuid) -> Result<String, DatabaseError> {
    let previous_task: Option<Option<Uuid>> =
        sqlx::query_scalar("SELECT token_task_id FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(pool)
            .await?;
    if let Some(Some(task_id)) = previous_task {
        TaskScheduler::revoke(task_id);
    }

    let token = auth::one_time_token();
    let expiry_secs = config::config().security.user_token_expiry_secs;
    let task_id = jobs::schedule_token_rotation(
        TokenTarget::User,
        user_id,
        Utc::now() + Duration::seconds(expiry_secs as i64),
    );

    sqlx::query("UPDATE users SET token = $1, token_task_id = $2, updated_at = NOW() WHERE id = $3")
        .bind(&token)
        .bind(task_id)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(token)
}

pub struct NewEmployee {
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub department_id: Option<Uuid>,
    pub staff_id: Option<String>,
}

/// Create the employee user + profile, send the invite and auto-enroll the
/// newcomer into the organization's open self-enrolling campaigns.
pub async fn create_employee(
    pool: &PgPool,
    organization_id: Uuid,
    new: NewEmployee,
) -> Result<Uuid, DatabaseError> {
    let employee_id: Uuid = sqlx::query_scalar(
        "INSERT INTO users (id, email, role, is_active) \
         VALUES (gen_random_uuid(), $1, $2, TRUE) RETURNING id",
    )
    .bind(new.email.to_lowercase())
    .bind(Role::Employee.as_str())
    .fetch_one(pool)
    .await?;

    sqlx::query(
        "INSERT INTO employee_profiles \
           (id, employee_id, organization_id, department_id, staff_id, first_name, last_name, status) \
         VALUES (gen_random_uuid(), $1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(employee_id)
    .bind(organization_id)
    .bind(new.department_id)
    .bind(new.staff_id)
    .bind(new.first_name)
    .bind(new.last_name)
    .bind(EmployeeStatus::Pending.as_str())
    .execute(pool)
    .await?;

    let token = set_user_token(pool, employee_id).await?;
    let (subject, body) = email::employee_invite(&token);
    if let Err(e) = Mailer::global()
        .send(OutgoingEmail::new(&new.email, subject, body))
        .await
    {
        warn!(email = %new.email, "invite email failed: {}", e);
    }

    auto_enroll_new_employee(pool, organization_id, employee_id).await?;
    Ok(employee_id)
}

/// New employees join every open course campaign that opted into automatic
/// enrollment; they are notified of enrollment and, when the campaign is
/// already running, of its start.
pub async fn auto_enroll_new_employee(
    pool: &PgPool,
    organization_id: Uuid,
    employee_id: Uuid,
) -> Result<(), DatabaseError> {
    let campaigns: Vec<(Uuid, Uuid, String, String)> = sqlx::query_as(
        "SELECT c.id, cc.id, c.name, c.status FROM campaigns c \
         JOIN course_campaigns cc ON cc.campaign_id = c.id \
         WHERE c.organization_id = $1 AND c.kind <> 'phishing' \
           AND c.automatically_enroll_employees = TRUE \
           AND c.status NOT IN ('completed', 'cancelled')",
    )
    .bind(organization_id)
    .fetch_all(pool)
    .await?;

    if campaigns.is_empty() {
        return Ok(());
    }

    let employee: Option<(String, Option<String>)> = sqlx::query_as(
        "SELECT u.email, ep.first_name FROM users u \
         JOIN employee_profiles ep ON ep.employee_id = u.id WHERE u.id = $1",
    )
    .bind(employee_id)
    .fetch_optional(pool)
    .await?;
    let Some((employee_email, first_name)) = employee else {
        return Ok(());
    };

    for (campaign_id, course_campaign_id, campaign_name, status) in campaigns {
        sqlx::query(
            "INSERT INTO employee_course_campaigns (id, employee_id, course_campaign_id) \
             VALUES (gen_random_uuid(), $1, $2) \
             ON CONFLICT (employee_id, course_campaign_id) DO NOTHING",
        )
        .bind(employee_id)
        .bind(course_campaign_id)
        .execute(pool)
        .await?;

        let (subject, body) = email::campaign_started(
            &campaign_name,
            first_name.as_deref().unwrap_or(""),
            campaign_id,
        );
        if status == "active" {
            if let Err(e) = Mailer::global()
                .send(OutgoingEmail::new(&employee_email, subject, body))
                .await
            {
                warn!(email = %employee_email, "auto-enroll email failed: {}", e);
            }
        }
    }
    Ok(())
}

/// One parsed row of a bulk employee import. File parsing happens upstream;
/// the API accepts the rows as JSON.
#[derive(Debug, Clone, Deserialize)]
pub struct ImportRecord {
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub department: Option<String>,
}

pub struct ImportOutcome {
    pub new_employee_ids: Vec<Uuid>,
}

/// Bulk import: departments are created on first sight (by lowercased name),
/// existing employees get their profile refreshed, new ones are created and
/// invited. Only the newly created employees are reported back.
pub async fn import_employees(
    pool: &PgPool,
    organization_id: Uuid,
    records: Vec<ImportRecord>,
) -> Result<ImportOutcome, DatabaseError> {
    let mut new_employee_ids = Vec::new();

    for record in records {
        let department_id = match &record.department {
            Some(name) if !name.trim().is_empty() => {
                Some(find_or_create_department(pool, organization_id, name).await?)
            }
            _ => None,
        };

        let existing: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM users WHERE email = $1 AND role = 'employee'")
                .bind(record.email.to_lowercase())
                .fetch_optional(pool)
                .await?;

        match existing {
            Some(employee_id) => {
                sqlx::query(
                    "UPDATE employee_profiles \
                     SET first_name = COALESCE($1, first_name), \
                         last_name = COALESCE($2, last_name), \
                         department_id = COALESCE($3, department_id), \
                         updated_at = NOW() \
                     WHERE employee_id = $4",
                )
                .bind(&record.first_name)
                .bind(&record.last_name)
                .bind(department_id)
                .bind(employee_id)
                .execute(pool)
                .await?;
            }
            None => {
                let employee_id = create_employee(
                    pool,
                    organization_id,
                    NewEmployee {
                        email: record.email,
                        first_name: record.first_name,
                        last_name: record.last_name,
                        department_id,
                        staff_id: None,
                    },
                )
                .await?;
                new_employee_ids.push(employee_id);
            }
        }
    }

    Ok(ImportOutcome { new_employee_ids })
}

pub async fn find_or_create_department(
    pool: &PgPool,
    organization_id: Uuid,
    name: &str,
) -> Result<Uuid, DatabaseError> {
    let name = name.trim().to_lowercase();
    let existing: Option<Uuid> =
        sqlx::query_scalar("SELECT id FROM departments WHERE organization_id = $1 AND name = $2")
            .bind(organization_id)
            .bind(&name)
            .fetch_optional(pool)
            .await?;
    if let Some(id) = existing {
        return Ok(id);
    }
    let id: Uuid = sqlx::query_scalar(
        "INSERT INTO departments (id, organization_id, name) \
         VALUES (gen_random_uuid(), $1, $2) RETURNING id",
    )
    .bind(organization_id)
    .bind(&name)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

pub async fn deactivate_employee(pool: &PgPool, employee_id: Uuid) -> Result<(), DatabaseError> {
    sqlx::query("UPDATE users SET is_active = FALSE, updated_at = NOW() WHERE id = $1")
        .bind(employee_id)
        .execute(pool)
        .await?;
    sqlx::query(
        "UPDATE employee_profiles \
         SET status = 'deactivated', deactivated_at = NOW(), updated_at = NOW() \
         WHERE employee_id = $1",
    )
    .bind(employee_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn activate_employee(pool: &PgPool, employee_id: Uuid) -> Result<(), DatabaseError> {
    sqlx::query("UPDATE users SET is_active = TRUE, updated_at = NOW() WHERE id = $1")
        .bind(employee_id)
        .execute(pool)
        .await?;
    sqlx::query(
        "UPDATE employee_profiles \
         SET status = 'active', deactivated_at = NULL, updated_at = NOW() \
         WHERE employee_id = $1",
    )
    .bind(employee_id)
    .execute(pool)
    .await?;
    Ok(())
}
