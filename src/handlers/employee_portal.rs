use axum::extract::{Path, Query};
use axum::response::IntoResponse;
use axum::{Extension, Json};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use crate::auth::hash_password;
use crate::database;
use crate::error::ApiError;
use crate::middleware::AuthUser;
use crate::models::{ActivityKind, CampaignStatus, Course, LearningType, User};
use crate::services::email::{self, Mailer, OutgoingEmail};
use crate::services::{learning, lifecycle};
use crate::tasks::TaskScheduler;

use super::{ok, ok_message};

/// GET /api/employee/profile
pub async fn profile(
    Extension(auth_user): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let employee_id = auth_user.require_employee()?;
    let pool = database::pool().await?;

    let profile: crate::models::EmployeeProfile =
        sqlx::query_as("SELECT * FROM employee_profiles WHERE employee_id = $1")
            .bind(employee_id)
            .fetch_one(&pool)
            .await?;
    let (email, last_login): (String, Option<DateTime<Utc>>) =
        sqlx::query_as("SELECT email, last_login FROM users WHERE id = $1")
            .bind(employee_id)
            .fetch_one(&pool)
            .await?;
    let department: Option<String> = match profile.department_id {
        Some(department_id) => {
            sqlx::query_scalar("SELECT name FROM departments WHERE id = $1")
                .bind(department_id)
                .fetch_optional(&pool)
                .await?
        }
        None => None,
    };

    Ok(ok(json!({
        "id": employee_id,
        "email": email,
        "last_login": last_login,
        "first_name": profile.first_name,
        "last_name": profile.last_name,
        "status": profile.status,
        "security_score": profile.security_score,
        "department": department,
    })))
}

// --- invited-employee registration ------------------------------------------

async fn employee_by_token(pool: &sqlx::PgPool, token: &str) -> Result<User, ApiError> {
    let user: Option<User> =
        sqlx::query_as("SELECT * FROM users WHERE token = $1 AND role = 'employee'")
            .bind(token)
            .fetch_optional(pool)
            .await?;
    user.ok_or_else(|| ApiError::not_found("Record not found"))
}

/// GET /api/employee/:token/complete-registration
pub async fn registration_details(Path(token): Path<String>) -> Result<impl IntoResponse, ApiError> {
    let pool = database::pool().await?;
    let user = employee_by_token(&pool, &token).await?;
    let names: (Option<String>, Option<String>) =
        sqlx::query_as("SELECT first_name, last_name FROM employee_profiles WHERE employee_id = $1")
            .bind(user.id)
            .fetch_one(&pool)
            .await?;
    Ok(ok(json!({
        "email": user.email,
        "first_name": names.0,
        "last_name": names.1,
    })))
}

#[derive(Debug, Deserialize)]
pub struct CompleteRegistrationRequest {
    pub password: String,
    pub confirm_password: String,
}

/// PATCH /api/employee/:token/complete-registration
pub async fn complete_registration(
    Path(token): Path<String>,
    Json(payload): Json<CompleteRegistrationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if payload.password.len() < 8 {
        return Err(ApiError::field_error(
            "password",
            "Password must be at least 8 characters",
        ));
    }
    if payload.password != payload.confirm_password {
        return Err(ApiError::bad_request("Passwords do not match"));
    }

    let pool = database::pool().await?;
    let user = employee_by_token(&pool, &token).await?;
    if let Some(task_id) = user.token_task_id {
        TaskScheduler::revoke(task_id);
    }

    sqlx::query(
        "UPDATE users SET password_digest = $1, is_email_verified = TRUE, is_active = TRUE, \
         token = NULL, token_task_id = NULL, updated_at = NOW() WHERE id = $2",
    )
    .bind(hash_password(&payload.password))
    .bind(user.id)
    .execute(&pool)
    .await?;
    sqlx::query(
        "UPDATE employee_profiles SET status = 'active', updated_at = NOW() WHERE employee_id = $1",
    )
    .bind(user.id)
    .execute(&pool)
    .await?;

    Ok(ok_message("Registration completed"))
}

// --- dashboard ---------------------------------------------------------------

/// GET /api/employee/dashboard
pub async fn dashboard(
    Extension(auth_user): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let employee_id = auth_user.require_employee()?;
    let pool = database::pool().await?;

    let (security_score, organization_id): (Option<f64>, Uuid) = sqlx::query_as(
        "SELECT security_score, organization_id FROM employee_profiles WHERE employee_id = $1",
    )
    .bind(employee_id)
    .fetch_one(&pool)
    .await?;

    // Average progress over the campaigns the employee has started
    let started: Vec<Uuid> = sqlx::query_scalar(
        "SELECT course_campaign_id FROM employee_course_campaigns \
         WHERE employee_id = $1 AND is_started = TRUE",
    )
    .bind(employee_id)
    .fetch_all(&pool)
    .await?;
    let progress_rate = if started.is_empty() {
        0
    } else {
        let mut sum = 0i64;
        for course_campaign_id in &started {
            sum += learning::employee_campaign_progress(&pool, employee_id, *course_campaign_id)
                .await? as i64;
        }
        (sum / started.len() as i64) as i32
    };

    let active_count: i64 = sqlx::query_scalar(
        "SELECT COUNT(DISTINCT c.id) FROM campaigns c \
         JOIN course_campaigns cc ON cc.campaign_id = c.id \
         JOIN employee_course_campaigns ecc ON ecc.course_campaign_id = cc.id \
         WHERE ecc.employee_id = $1 AND c.organization_id = $2 \
           AND ((ecc.is_started AND NOT ecc.is_completed) OR c.status = 'active')",
    )
    .bind(employee_id)
    .bind(organization_id)
    .fetch_one(&pool)
    .await?;

    let completed_count: i64 = sqlx::query_scalar(
        "SELECT COUNT(DISTINCT c.id) FROM campaigns c \
         JOIN course_campaigns cc ON cc.campaign_id = c.id \
         JOIN employee_course_campaigns ecc ON ecc.course_campaign_id = cc.id \
         WHERE ecc.employee_id = $1 AND c.organization_id = $2 \
           AND ((ecc.is_started AND ecc.is_completed) OR c.status = 'completed')",
    )
    .bind(employee_id)
    .bind(organization_id)
    .fetch_one(&pool)
    .await?;

    let phishing_reported_count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM employee_phishing_campaigns \
         WHERE employee_id = $1 AND is_reported = TRUE",
    )
    .bind(employee_id)
    .fetch_one(&pool)
    .await?;

    let leaderboard: Vec<(Uuid, Option<String>, Option<String>, Option<f64>)> = sqlx::query_as(
        "SELECT employee_id, first_name, last_name, security_score \
         FROM employee_profiles WHERE organization_id = $1 \
         ORDER BY security_score DESC NULLS LAST LIMIT 10",
    )
    .bind(organization_id)
    .fetch_all(&pool)
    .await?;

    let ongoing: Option<(Uuid, String)> = sqlx::query_as(
        "SELECT c.id, c.name FROM campaigns c \
         JOIN course_campaigns cc ON cc.campaign_id = c.id \
         JOIN employee_course_campaigns ecc ON ecc.course_campaign_id = cc.id \
         WHERE ecc.employee_id = $1 AND c.status = 'active' \
           AND ecc.is_started = TRUE AND ecc.is_completed = FALSE \
         ORDER BY ecc.started_at LIMIT 1",
    )
    .bind(employee_id)
    .fetch_optional(&pool)
    .await?;

    Ok(ok(json!({
        "security_score": security_score,
        "progress_rate": progress_rate,
        "active_campaigns_count": active_count,
        "completed_campaigns_count": completed_count,
        "phishing_reported_count": phishing_reported_count,
        "employees_leaderboard": leaderboard.into_iter().map(|(id, first, last, score)| json!({
            "id": id, "first_name": first, "last_name": last, "security_score": score,
        })).collect::<Vec<_>>(),
        "ongoing_campaign": ongoing.map(|(id, name)| json!({ "id": id, "name": name })),
        "security_score_timeseries_last_7_days": score_timeseries(&pool, employee_id, 7).await?,
        "security_score_timeseries_last_30_days": score_timeseries(&pool, employee_id, 30).await?,
        "courses_completed_timeseries_last_7_days": courses_timeseries(&pool, employee_id, 7).await?,
        "courses_completed_timeseries_last_30_days": courses_timeseries(&pool, employee_id, 30).await?,
    })))
}

async fn score_timeseries(
    pool: &sqlx::PgPool,
    user_id: Uuid,
    days: i64,
) -> Result<Vec<serde_json::Value>, ApiError> {
    let points: Vec<crate::models::timeseries::UserSecurityScorePoint> = sqlx::query_as(
        "SELECT * FROM user_security_score_timeseries \
         WHERE user_id = $1 AND created_at >= $2 ORDER BY created_at",
    )
    .bind(user_id)
    .bind(Utc::now() - Duration::days(days))
    .fetch_all(pool)
    .await?;
    Ok(points
        .into_iter()
        .map(|p| json!({ "security_score": p.security_score, "created_at": p.created_at }))
        .collect())
}

async fn courses_timeseries(
    pool: &sqlx::PgPool,
    user_id: Uuid,
    days: i64,
) -> Result<Vec<serde_json::Value>, ApiError> {
    let points: Vec<crate::models::timeseries::UserCompletedCoursesPoint> = sqlx::query_as(
        "SELECT * FROM user_completed_courses_timeseries \
         WHERE user_id = $1 AND created_at >= $2 ORDER BY created_at",
    )
    .bind(user_id)
    .bind(Utc::now() - Duration::days(days))
    .fetch_all(pool)
    .await?;
    Ok(points
        .into_iter()
        .map(|p| json!({ "courses_completed": p.courses_completed, "created_at": p.created_at }))
        .collect())
}

// --- learning resources ------------------------------------------------------

/// GET /api/employee/dashboard/learning-resources - course cards for the
/// employee home: new / ongoing / completed / recommended, overall and per
/// learning type, two cards each.
pub async fn learning_resources(
    Extension(auth_user): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let employee_id = auth_user.require_employee()?;
    let pool = database::pool().await?;
    let organization_id: Uuid =
        sqlx::query_scalar("SELECT organization_id FROM employee_profiles WHERE employee_id = $1")
            .bind(employee_id)
            .fetch_one(&pool)
            .await?;

    let mut payload = json!({});
    for (section, learning_type) in [
        ("all", None),
        ("general", Some(LearningType::General)),
        ("specialized", Some(LearningType::Specialized)),
    ] {
        payload[section] = json!({
            "new": course_cards(&pool, employee_id, organization_id, learning_type, Shelf::New).await?,
            "ongoing": course_cards(&pool, employee_id, organization_id, learning_type, Shelf::Ongoing).await?,
            "completed": course_cards(&pool, employee_id, organization_id, learning_type, Shelf::Completed).await?,
            "recommended": course_cards(&pool, employee_id, organization_id, learning_type, Shelf::Recommended).await?,
        });
    }
    Ok(ok(payload))
}

#[derive(Clone, Copy)]
enum Shelf {
    New,
    Ongoing,
    Completed,
    Recommended,
}

impl Shelf {
    fn button_text(&self) -> &'static str {
        match self {
            Shelf::New | Shelf::Recommended => "begin",
            Shelf::Ongoing => "continue",
            Shelf::Completed => "retake",
        }
    }

    fn card_type(&self) -> &'static str {
        match self {
            Shelf::New => "new",
            Shelf::Ongoing => "in-progress",
            Shelf::Completed => "completed",
            Shelf::Recommended => "recommended",
        }
    }
}

async fn course_cards(
    pool: &sqlx::PgPool,
    employee_id: Uuid,
    organization_id: Uuid,
    learning_type: Option<LearningType>,
    shelf: Shelf,
) -> Result<Vec<serde_json::Value>, ApiError> {
    let shelf_clause = match shelf {
        Shelf::New => {
            "AND c.created_at >= NOW() - INTERVAL '30 days' \
             AND NOT EXISTS (SELECT 1 FROM user_courses uc WHERE uc.course_id = c.id AND uc.user_id = $1) \
             ORDER BY c.created_at DESC"
        }
        Shelf::Ongoing => {
            "AND EXISTS (SELECT 1 FROM user_courses uc WHERE uc.course_id = c.id AND uc.user_id = $1 \
                         AND uc.is_started AND NOT uc.is_completed) \
             ORDER BY c.created_at DESC"
        }
        Shelf::Completed => {
            "AND EXISTS (SELECT 1 FROM user_courses uc WHERE uc.course_id = c.id AND uc.user_id = $1 \
                         AND uc.is_completed) \
             ORDER BY c.created_at DESC"
        }
        Shelf::Recommended => {
            "AND NOT EXISTS (SELECT 1 FROM user_courses uc WHERE uc.course_id = c.id AND uc.user_id = $1) \
             ORDER BY random()"
        }
    };

    let sql = format!(
        "SELECT c.* FROM courses c \
         WHERE (c.organization_id = $2 OR c.is_public = TRUE) \
           AND ($3::text IS NULL OR c.learning_type = $3) \
           {shelf_clause} LIMIT 2",
    );
    let courses: Vec<Course> = sqlx::query_as(&sql)
        .bind(employee_id)
        .bind(organization_id)
        .bind(learning_type.map(|t| t.as_str()))
        .fetch_all(pool)
        .await?;

    Ok(courses
        .into_iter()
        .map(|course| {
            json!({
                "id": course.id,
                "name": course.name,
                "description": course.description,
                "learning_type": course.learning_type,
                "thumbnail": course.thumbnail,
                "button_text": shelf.button_text(),
                "course_card_type": shelf.card_type(),
            })
        })
        .collect())
}

// --- employee campaign flow --------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct EmployeeCampaignListQuery {
    pub status: Option<CampaignStatus>,
}

/// GET /api/employee/campaigns
pub async fn campaign_list(
    Extension(auth_user): Extension<AuthUser>,
    Query(query): Query<EmployeeCampaignListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let employee_id = auth_user.require_employee()?;
    let pool = database::pool().await?;

    let status_clause = match query.status {
        Some(CampaignStatus::Active) => {
            "AND ((ecc.is_started AND NOT ecc.is_completed) OR c.status = 'active')"
        }
        Some(CampaignStatus::Scheduled) => "AND c.status = 'scheduled'",
        Some(CampaignStatus::Completed) => {
            "AND ((ecc.is_started AND ecc.is_completed) OR c.status = 'completed')"
        }
        _ => "",
    };
    let sql = format!(
        "SELECT c.id, cc.id, c.name, c.kind, c.status, c.start_date, c.end_date \
         FROM campaigns c \
         JOIN course_campaigns cc ON cc.campaign_id = c.id \
         JOIN employee_course_campaigns ecc ON ecc.course_campaign_id = cc.id \
         WHERE ecc.employee_id = $1 {status_clause} ORDER BY c.created_at DESC",
    );
    let rows: Vec<(Uuid, Uuid, String, String, String, Option<DateTime<Utc>>, Option<DateTime<Utc>>)> =
        sqlx::query_as(&sql).bind(employee_id).fetch_all(&pool).await?;

    let now = Utc::now();
    let mut out = Vec::new();
    for (campaign_id, course_campaign_id, name, kind, status, start_date, end_date) in rows {
        let progress =
            learning::employee_campaign_progress(&pool, employee_id, course_campaign_id).await?;
        let expiry = match end_date {
            Some(end) if end > now => {
                let days = (end - now).num_days();
                format!("{} day{} left", days.max(0), if days == 1 { "" } else { "s" })
            }
            Some(_) => "Ended".to_string(),
            None => "No end date set".to_string(),
        };
        out.push(json!({
            "id": campaign_id,
            "name": name,
            "type": kind,
            "status": status,
            "progress": progress,
            "expiry": expiry,
            "start_date": start_date,
        }));
    }
    Ok(ok(json!(out)))
}

/// GET /api/employee/campaigns/count
pub async fn campaign_count(
    Extension(auth_user): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let employee_id = auth_user.require_employee()?;
    let pool = database::pool().await?;

    let (active, completed, scheduled): (i64, i64, i64) = sqlx::query_as(
        "SELECT \
           COUNT(*) FILTER (WHERE (ecc.is_started AND NOT ecc.is_completed) OR c.status = 'active'), \
           COUNT(*) FILTER (WHERE (ecc.is_started AND ecc.is_completed) OR c.status = 'completed'), \
           COUNT(*) FILTER (WHERE c.status = 'scheduled') \
         FROM campaigns c \
         JOIN course_campaigns cc ON cc.campaign_id = c.id \
         JOIN employee_course_campaigns ecc ON ecc.course_campaign_id = cc.id \
         WHERE ecc.employee_id = $1",
    )
    .bind(employee_id)
    .fetch_one(&pool)
    .await?;

    Ok(ok(json!({ "active": active, "completed": completed, "scheduled": scheduled })))
}

/// The employee's record within an active campaign, or 404.
async fn fetch_enrollment(
    pool: &sqlx::PgPool,
    employee_id: Uuid,
    campaign_id: Uuid,
) -> Result<(crate::models::Campaign, crate::models::CourseCampaign, crate::models::EmployeeCourseCampaign), ApiError> {
    let campaign = lifecycle::get_campaign(pool, campaign_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Campaign not found"))?;
    let course_campaign = lifecycle::get_course_campaign(pool, campaign_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Campaign not found"))?;
    let record: Option<crate::models::EmployeeCourseCampaign> = sqlx::query_as(
        "SELECT * FROM employee_course_campaigns \
         WHERE employee_id = $1 AND course_campaign_id = $2",
    )
    .bind(employee_id)
    .bind(course_campaign.id)
    .fetch_optional(pool)
    .await?;
    let record = record.ok_or_else(|| ApiError::not_found("Campaign not found"))?;
    Ok((campaign, course_campaign, record))
}

/// GET /api/employee/campaigns/:id
pub async fn campaign_detail(
    Extension(auth_user): Extension<AuthUser>,
    Path(campaign_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let employee_id = auth_user.require_employee()?;
    let pool = database::pool().await?;
    let (campaign, course_campaign, record) =
        fetch_enrollment(&pool, employee_id, campaign_id).await?;
    if campaign.status != CampaignStatus::Active {
        return Err(ApiError::not_found("Campaign not found"));
    }

    let courses: Vec<Course> = sqlx::query_as(
        "SELECT c.* FROM courses c \
         JOIN course_campaign_courses ccc ON ccc.course_id = c.id \
         WHERE ccc.course_campaign_id = $1",
    )
    .bind(course_campaign.id)
    .fetch_all(&pool)
    .await?;

    let total_courses = courses.len() as i64;
    let completed_courses: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM employee_campaign_courses \
         WHERE employee_id = $1 AND course_campaign_id = $2 AND is_completed = TRUE",
    )
    .bind(employee_id)
    .bind(course_campaign.id)
    .fetch_one(&pool)
    .await?;

    let mut total_questions = 0i64;
    for course in &courses {
        total_questions += learning::course_questions_count(&pool, course.id).await?;
    }
    let answered: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM answered_campaign_questions \
         WHERE employee_id = $1 AND course_campaign_id = $2",
    )
    .bind(employee_id)
    .bind(course_campaign.id)
    .fetch_one(&pool)
    .await?;

    Ok(ok(json!({
        "id": campaign.id,
        "name": campaign.name,
        "description": campaign.description,
        "type": campaign.kind,
        "start_date": campaign.start_date,
        "employee_has_started_campaign": record.is_started,
        "employee_has_completed_campaign": record.is_completed,
        "course_campaign": {
            "courses": courses,
            "progress": learning::employee_campaign_progress(&pool, employee_id, course_campaign.id).await?,
            "remaining_courses": total_courses - completed_courses,
            "questions_left": total_questions - answered,
        },
    })))
}

/// PATCH /api/employee/campaigns/:id/start - begin the campaign within its
/// window; materializes the per-course rows.
pub async fn start_campaign(
    Extension(auth_user): Extension<AuthUser>,
    Path(campaign_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let employee_id = auth_user.require_employee()?;
    let pool = database::pool().await?;
    let (campaign, course_campaign, record) =
        fetch_enrollment(&pool, employee_id, campaign_id).await?;

    let now = Utc::now();
    if campaign.start_date.map(|d| d > now).unwrap_or(false) {
        return Err(ApiError::bad_request("Campaign has not started yet"));
    }
    if campaign.end_date.map(|d| d < now).unwrap_or(false) {
        return Err(ApiError::bad_request("Campaign has ended"));
    }
    if record.is_started {
        return Err(ApiError::bad_request("Campaign already started"));
    }

    sqlx::query(
        "UPDATE employee_course_campaigns \
         SET is_started = TRUE, started_at = NOW(), updated_at = NOW() WHERE id = $1",
    )
    .bind(record.id)
    .execute(&pool)
    .await?;

    sqlx::query(
        "INSERT INTO employee_campaign_courses (id, employee_id, course_campaign_id, course_id) \
         SELECT gen_random_uuid(), $1, $2, course_id \
         FROM course_campaign_courses WHERE course_campaign_id = $2 \
         ON CONFLICT (employee_id, course_campaign_id, course_id) DO NOTHING",
    )
    .bind(employee_id)
    .bind(course_campaign.id)
    .execute(&pool)
    .await?;

    learning::perform_activity(&pool, employee_id, ActivityKind::CourseCampaignStarted).await?;
    Ok(ok_message("Campaign started successfully"))
}

#[derive(Debug, Deserialize)]
pub struct CampaignAnswerRequest {
    pub answer_ids: Vec<Uuid>,
}

/// PATCH /api/employee/campaigns/:id/courses/:course_id/contents/:content_id/questions/:question_id/answer
pub async fn answer_campaign_question(
    Extension(auth_user): Extension<AuthUser>,
    Path((campaign_id, course_id, content_id, question_id)): Path<(Uuid, Uuid, Uuid, Uuid)>,
    Json(payload): Json<CampaignAnswerRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let employee_id = auth_user.require_employee()?;
    let pool = database::pool().await?;
    let (campaign, course_campaign, record) =
        fetch_enrollment(&pool, employee_id, campaign_id).await?;
    ensure_campaign_course(&pool, &campaign, &record, course_campaign.id, course_id, content_id)
        .await?;

    let (question, all_options, chosen) =
        super::courses::load_question_options(&pool, content_id, question_id, &payload.answer_ids)
            .await?;

    let is_correct = learning::answer_campaign_question(
        &pool,
        employee_id,
        course_campaign.id,
        course_id,
        content_id,
        &question,
        &all_options,
        &chosen,
    )
    .await?;
    Ok(ok(json!({ "is_correct": is_correct })))
}

/// PATCH /api/employee/campaigns/:id/courses/:course_id/contents/:content_id/complete
pub async fn complete_campaign_content(
    Extension(auth_user): Extension<AuthUser>,
    Path((campaign_id, course_id, content_id)): Path<(Uuid, Uuid, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
    let employee_id = auth_user.require_employee()?;
    let pool = database::pool().await?;
    let (campaign, course_campaign, record) =
        fetch_enrollment(&pool, employee_id, campaign_id).await?;
    ensure_campaign_course(&pool, &campaign, &record, course_campaign.id, course_id, content_id)
        .await?;

    learning::complete_campaign_content(&pool, employee_id, course_campaign.id, course_id, content_id)
        .await?;

    if learning::campaign_course_progress(&pool, employee_id, course_campaign.id, course_id).await?
        >= 100
    {
        sqlx::query(
            "UPDATE employee_campaign_courses \
             SET is_completed = TRUE, completed_at = NOW(), updated_at = NOW() \
             WHERE employee_id = $1 AND course_campaign_id = $2 AND course_id = $3",
        )
        .bind(employee_id)
        .bind(course_campaign.id)
        .bind(course_id)
        .execute(&pool)
        .await?;
    }
    Ok(ok_message("Content completed"))
}

/// PATCH /api/employee/campaigns/:id/complete - requires every course done.
pub async fn complete_campaign(
    Extension(auth_user): Extension<AuthUser>,
    Path(campaign_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let employee_id = auth_user.require_employee()?;
    let pool = database::pool().await?;
    let (campaign, course_campaign, record) =
        fetch_enrollment(&pool, employee_id, campaign_id).await?;
    if !record.is_started {
        return Err(ApiError::bad_request("Campaign has not been started"));
    }
    if record.is_completed {
        return Err(ApiError::bad_request("Campaign already completed"));
    }

    let unfinished: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM employee_campaign_courses \
         WHERE employee_id = $1 AND course_campaign_id = $2 AND is_completed = FALSE",
    )
    .bind(employee_id)
    .bind(course_campaign.id)
    .fetch_one(&pool)
    .await?;
    if unfinished > 0 {
        return Err(ApiError::bad_request("Complete all courses to complete the campaign"));
    }

    sqlx::query(
        "UPDATE employee_course_campaigns \
         SET is_completed = TRUE, completed_at = NOW(), updated_at = NOW() WHERE id = $1",
    )
    .bind(record.id)
    .execute(&pool)
    .await?;
    learning::perform_activity(&pool, employee_id, ActivityKind::CourseCampaignCompleted).await?;

    let completion_notification: bool = sqlx::query_scalar(
        "SELECT campaign_completion_notification FROM organization_profiles \
         WHERE organization_id = $1",
    )
    .bind(campaign.organization_id)
    .fetch_one(&pool)
    .await?;
    if completion_notification {
        let employee: (String, Option<String>) = sqlx::query_as(
            "SELECT u.email, ep.first_name FROM users u \
             JOIN employee_profiles ep ON ep.employee_id = u.id WHERE u.id = $1",
        )
        .bind(employee_id)
        .fetch_one(&pool)
        .await?;
        let (subject, body) =
            email::campaign_completed(&campaign.name, employee.1.as_deref().unwrap_or(""));
        if let Err(e) = Mailer::global()
            .send(OutgoingEmail::new(&employee.0, subject, body))
            .await
        {
            warn!(email = %employee.0, "completion email failed: {}", e);
        }
    }

    Ok(ok_message("Campaign completed"))
}

/// Guards for the campaign-scoped learning endpoints: campaign active,
/// record started, course part of the campaign, content part of the course.
async fn ensure_campaign_course(
    pool: &sqlx::PgPool,
    campaign: &crate::models::Campaign,
    record: &crate::models::EmployeeCourseCampaign,
    course_campaign_id: Uuid,
    course_id: Uuid,
    content_id: Uuid,
) -> Result<(), ApiError> {
    if campaign.status != CampaignStatus::Active {
        return Err(ApiError::not_found("Campaign not found"));
    }
    if !record.is_started {
        return Err(ApiError::bad_request("Campaign has not been started"));
    }
    let course_in_campaign: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM course_campaign_courses \
         WHERE course_campaign_id = $1 AND course_id = $2)",
    )
    .bind(course_campaign_id)
    .bind(course_id)
    .fetch_one(pool)
    .await?;
    if !course_in_campaign {
        return Err(ApiError::not_found("Course not found"));
    }
    let content_in_course: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM course_contents WHERE course_id = $1 AND content_id = $2)",
    )
    .bind(course_id)
    .bind(content_id)
    .fetch_one(pool)
    .await?;
    if !content_in_course {
        return Err(ApiError::not_found("Content not found"));
    }
    Ok(())
}
