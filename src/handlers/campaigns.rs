use axum::extract::{Path, Query};
use axum::response::IntoResponse;
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::database;
use crate::error::ApiError;
use crate::middleware::AuthUser;
use crate::models::campaign::WIZARD_FINAL_STEP;
use crate::models::{Campaign, CampaignKind, CampaignStatus, EmailDeliveryType};
use crate::services::{lifecycle, metrics};
use crate::tasks::TaskScheduler;

use super::{ok, ok_message, Pagination};

// --- wizard step 1: course campaigns ----------------------------------------

#[derive(Debug, Deserialize)]
pub struct CourseCampaignStep1Request {
    pub name: String,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub kind: CampaignKind,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub automatically_enroll_employees: bool,
}

fn validate_course_dates(
    start_date: Option<DateTime<Utc>>,
    end_date: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<(), ApiError> {
    if let (Some(start), Some(end)) = (start_date, end_date) {
        if start > end {
            return Err(ApiError::bad_request("Invalid date range"));
        }
        if start < now {
            return Err(ApiError::bad_request("Invalid start date"));
        }
    }
    Ok(())
}

async fn campaign_name_taken(
    pool: &sqlx::PgPool,
    organization_id: Uuid,
    name: &str,
    exclude: Option<Uuid>,
) -> Result<bool, ApiError> {
    let taken: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM campaigns \
         WHERE organization_id = $1 AND name = $2 AND ($3::uuid IS NULL OR id <> $3))",
    )
    .bind(organization_id)
    .bind(name)
    .bind(exclude)
    .fetch_one(pool)
    .await?;
    Ok(taken)
}

/// POST /api/campaigns/create/course - wizard step 1 for learning campaigns
pub async fn create_course_step1(
    Extension(auth_user): Extension<AuthUser>,
    Json(payload): Json<CourseCampaignStep1Request>,
) -> Result<impl IntoResponse, ApiError> {
    let organization_id = auth_user.require_organization()?;
    if payload.kind == CampaignKind::Phishing {
        return Err(ApiError::bad_request("Invalid campaign type"));
    }
    validate_course_dates(payload.start_date, payload.end_date, Utc::now())?;

    let pool = database::pool().await?;
    if campaign_name_taken(&pool, organization_id, &payload.name, None).await? {
        return Err(ApiError::bad_request("This campaign name already exists"));
    }

    let campaign_id: Uuid = sqlx::query_scalar(
        "INSERT INTO campaigns \
           (id, organization_id, name, description, kind, status, start_date, end_date, \
            last_step_completed, automatically_enroll_employees) \
         VALUES (gen_random_uuid(), $1, $2, $3, $4, 'draft', $5, $6, 1, $7) RETURNING id",
    )
    .bind(organization_id)
    .bind(&payload.name)
    .bind(&payload.description)
    .bind(payload.kind.as_str())
    .bind(payload.start_date)
    .bind(payload.end_date)
    .bind(payload.automatically_enroll_employees)
    .fetch_one(&pool)
    .await?;

    sqlx::query("INSERT INTO course_campaigns (id, campaign_id) VALUES (gen_random_uuid(), $1)")
        .bind(campaign_id)
        .execute(&pool)
        .await?;

    campaign_json(&pool, campaign_id).await.map(ok)
}

#[derive(Debug, Deserialize)]
pub struct CourseCampaignStep1UpdateRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub automatically_enroll_employees: Option<bool>,
}

/// PATCH /api/campaigns/course-campaigns/:id/edit/1
pub async fn update_course_step1(
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CourseCampaignStep1UpdateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let organization_id = auth_user.require_organization()?;
    let pool = database::pool().await?;
    let campaign = fetch_editable_campaign(&pool, id, organization_id).await?;
    if campaign.is_phishing() {
        return Err(ApiError::bad_request("Invalid campaign type"));
    }
    validate_course_dates(payload.start_date, payload.end_date, Utc::now())?;
    if let Some(name) = &payload.name {
        if campaign_name_taken(&pool, organization_id, name, Some(campaign.id)).await? {
            return Err(ApiError::bad_request("This campaign name already exists"));
        }
    }

    sqlx::query(
        "UPDATE campaigns SET \
           name = COALESCE($1, name), \
           description = COALESCE($2, description), \
           start_date = COALESCE($3, start_date), \
           end_date = COALESCE($4, end_date), \
           automatically_enroll_employees = COALESCE($5, automatically_enroll_employees), \
           updated_at = NOW() \
         WHERE id = $6",
    )
    .bind(payload.name)
    .bind(payload.description)
    .bind(payload.start_date)
    .bind(payload.end_date)
    .bind(payload.automatically_enroll_employees)
    .bind(campaign.id)
    .execute(&pool)
    .await?;

    campaign_json(&pool, campaign.id).await.map(ok)
}

// --- wizard step 1: phishing campaigns --------------------------------------

#[derive(Debug, Deserialize)]
pub struct DeliveryPlan {
    pub email_delivery_type: EmailDeliveryType,
    pub email_delivery_date: Option<DateTime<Utc>>,
    pub email_delivery_start_date: Option<DateTime<Utc>>,
    pub email_delivery_end_date: Option<DateTime<Utc>>,
}

/// Normalize a delivery plan: each mode clears the dates the others use and
/// rejects past or inverted windows.
pub fn validate_delivery_plan(plan: &DeliveryPlan, now: DateTime<Utc>) -> Result<DeliveryPlan, ApiError> {
    match plan.email_delivery_type {
        EmailDeliveryType::Immediately => Ok(DeliveryPlan {
            email_delivery_type: EmailDeliveryType::Immediately,
            email_delivery_date: None,
            email_delivery_start_date: None,
            email_delivery_end_date: None,
        }),
        EmailDeliveryType::Scheduled => {
            let Some(date) = plan.email_delivery_date else {
                return Err(ApiError::bad_request(
                    "Email delivery date is required for scheduled delivery",
                ));
            };
            if now > date {
                return Err(ApiError::bad_request("Invalid date"));
            }
            Ok(DeliveryPlan {
                email_delivery_type: EmailDeliveryType::Scheduled,
                email_delivery_date: Some(date),
                email_delivery_start_date: None,
                email_delivery_end_date: None,
            })
        }
        EmailDeliveryType::ScheduledRange => {
            let (Some(start), Some(end)) =
                (plan.email_delivery_start_date, plan.email_delivery_end_date)
            else {
                return Err(ApiError::bad_request(
                    "Email delivery start and end date are required for scheduled delivery",
                ));
            };
            if now > start {
                return Err(ApiError::bad_request("Invalid start date"));
            }
            if start > end {
                return Err(ApiError::bad_request("Invalid date range"));
            }
            Ok(DeliveryPlan {
                email_delivery_type: EmailDeliveryType::ScheduledRange,
                email_delivery_date: None,
                email_delivery_start_date: Some(start),
                email_delivery_end_date: Some(end),
            })
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PhishingCampaignStep1Request {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub automatically_enroll_employees: bool,
    #[serde(flatten)]
    pub delivery: DeliveryPlan,
}

/// POST /api/campaigns/create/phishing - wizard step 1 for phishing campaigns
pub async fn create_phishing_step1(
    Extension(auth_user): Extension<AuthUser>,
    Json(payload): Json<PhishingCampaignStep1Request>,
) -> Result<impl IntoResponse, ApiError> {
    let organization_id = auth_user.require_organization()?;
    let plan = validate_delivery_plan(&payload.delivery, Utc::now())?;

    let pool = database::pool().await?;
    if campaign_name_taken(&pool, organization_id, &payload.name, None).await? {
        return Err(ApiError::bad_request("This campaign name already exists"));
    }

    let campaign_id: Uuid = sqlx::query_scalar(
        "INSERT INTO campaigns \
           (id, organization_id, name, description, kind, status, last_step_completed, \
            automatically_enroll_employees) \
         VALUES (gen_random_uuid(), $1, $2, $3, 'phishing', 'draft', 1, $4) RETURNING id",
    )
    .bind(organization_id)
    .bind(&payload.name)
    .bind(&payload.description)
    .bind(payload.automatically_enroll_employees)
    .fetch_one(&pool)
    .await?;

    sqlx::query(
        "INSERT INTO phishing_campaigns \
           (id, campaign_id, email_delivery_type, email_delivery_date, \
            email_delivery_start_date, email_delivery_end_date) \
         VALUES (gen_random_uuid(), $1, $2, $3, $4, $5)",
    )
    .bind(campaign_id)
    .bind(plan.email_delivery_type.as_str())
    .bind(plan.email_delivery_date)
    .bind(plan.email_delivery_start_date)
    .bind(plan.email_delivery_end_date)
    .execute(&pool)
    .await?;

    campaign_json(&pool, campaign_id).await.map(ok)
}

#[derive(Debug, Deserialize)]
pub struct PhishingCampaignStep1UpdateRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub automatically_enroll_employees: Option<bool>,
    #[serde(flatten)]
    pub delivery: DeliveryPlan,
}

/// PATCH /api/campaigns/phishing-campaigns/:id/edit/1
pub async fn update_phishing_step1(
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(payload): Json<PhishingCampaignStep1UpdateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let organization_id = auth_user.require_organization()?;
    let pool = database::pool().await?;
    let campaign = fetch_editable_campaign(&pool, id, organization_id).await?;
    if !campaign.is_phishing() {
        return Err(ApiError::bad_request("This endpoint is only for a phishing campaign"));
    }
    let plan = validate_delivery_plan(&payload.delivery, Utc::now())?;
    if let Some(name) = &payload.name {
        if campaign_name_taken(&pool, organization_id, name, Some(campaign.id)).await? {
            return Err(ApiError::bad_request("This campaign name already exists"));
        }
    }

    sqlx::query(
        "UPDATE campaigns SET \
           name = COALESCE($1, name), \
           description = COALESCE($2, description), \
           automatically_enroll_employees = COALESCE($3, automatically_enroll_employees), \
           updated_at = NOW() \
         WHERE id = $4",
    )
    .bind(payload.name)
    .bind(payload.description)
    .bind(payload.automatically_enroll_employees)
    .bind(campaign.id)
    .execute(&pool)
    .await?;

    sqlx::query(
        "UPDATE phishing_campaigns SET \
           email_delivery_type = $1, email_delivery_date = $2, \
           email_delivery_start_date = $3, email_delivery_end_date = $4, updated_at = NOW() \
         WHERE campaign_id = $5",
    )
    .bind(plan.email_delivery_type.as_str())
    .bind(plan.email_delivery_date)
    .bind(plan.email_delivery_start_date)
    .bind(plan.email_delivery_end_date)
    .bind(campaign.id)
    .execute(&pool)
    .await?;

    lifecycle::update_phishing_campaign_dates(&pool, campaign.id).await?;
    campaign_json(&pool, campaign.id).await.map(ok)
}

// --- wizard step 2: employees -----------------------------------------------

#[derive(Debug, Deserialize)]
pub struct Step2Request {
    pub employees_ids: Vec<Uuid>,
}

/// PATCH /api/campaigns/:id/edit/2 - enroll employees (both campaign kinds)
pub async fn update_step2(
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(payload): Json<Step2Request>,
) -> Result<impl IntoResponse, ApiError> {
    let organization_id = auth_user.require_organization()?;
    let pool = database::pool().await?;
    let campaign = fetch_editable_campaign(&pool, id, organization_id).await?;
    if campaign.last_step_completed < 1 {
        return Err(ApiError::bad_request("Complete the first step"));
    }

    // Only the organization's own, non-deactivated employees count
    let employee_ids: Vec<Uuid> = sqlx::query_scalar(
        "SELECT employee_id FROM employee_profiles \
         WHERE organization_id = $1 AND employee_id = ANY($2) AND status <> 'deactivated'",
    )
    .bind(organization_id)
    .bind(&payload.employees_ids)
    .fetch_all(&pool)
    .await?;

    lifecycle::set_campaign_employees(&pool, &campaign, &employee_ids).await?;
    advance_step(&pool, &campaign, 2).await?;
    Ok(ok_message("Employees added successfully"))
}

// --- wizard step 3 -----------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CourseStep3Request {
    pub course_ids: Vec<Uuid>,
}

/// PATCH /api/campaigns/course-campaigns/:id/edit/3 - attach courses
pub async fn update_course_step3(
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CourseStep3Request>,
) -> Result<impl IntoResponse, ApiError> {
    let organization_id = auth_user.require_organization()?;
    if payload.course_ids.is_empty() {
        return Err(ApiError::field_error("course_ids", "course_ids is required"));
    }
    let pool = database::pool().await?;
    let campaign = fetch_editable_campaign(&pool, id, organization_id).await?;
    if campaign.last_step_completed < 2 {
        return Err(ApiError::bad_request("Complete the second step"));
    }
    if campaign.is_phishing() {
        return Err(ApiError::bad_request(
            "This endpoint cannot be called for a phishing campaign",
        ));
    }

    let visible_ids: Vec<Uuid> = sqlx::query_scalar(
        "SELECT id FROM courses \
         WHERE id = ANY($1) AND (organization_id = $2 OR is_public = TRUE)",
    )
    .bind(&payload.course_ids)
    .bind(organization_id)
    .fetch_all(&pool)
    .await?;
    if visible_ids.len() != payload.course_ids.len() || visible_ids.is_empty() {
        return Err(ApiError::bad_request("Invalid Course"));
    }

    let course_campaign = lifecycle::get_course_campaign(&pool, campaign.id)
        .await?
        .ok_or_else(|| ApiError::not_found("Course campaign not found"))?;

    sqlx::query("DELETE FROM course_campaign_courses WHERE course_campaign_id = $1")
        .bind(course_campaign.id)
        .execute(&pool)
        .await?;
    sqlx::query(
        "INSERT INTO course_campaign_courses (id, course_campaign_id, course_id) \
         SELECT gen_random_uuid(), $1, c.id FROM UNNEST($2::uuid[]) AS c(id)",
    )
    .bind(course_campaign.id)
    .bind(&visible_ids)
    .execute(&pool)
    .await?;

    advance_step(&pool, &campaign, 3).await?;

    let courses: Vec<crate::models::Course> =
        sqlx::query_as("SELECT * FROM courses WHERE id = ANY($1)")
            .bind(&visible_ids)
            .fetch_all(&pool)
            .await?;
    Ok(ok(json!(courses)))
}

#[derive(Debug, Deserialize)]
pub struct PhishingStep3Request {
    pub phishing_template_ids: Vec<Uuid>,
}

/// PATCH /api/campaigns/phishing-campaigns/:id/edit/3 - attach templates
pub async fn update_phishing_step3(
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(payload): Json<PhishingStep3Request>,
) -> Result<impl IntoResponse, ApiError> {
    let organization_id = auth_user.require_organization()?;
    let pool = database::pool().await?;
    let campaign = fetch_editable_campaign(&pool, id, organization_id).await?;
    if campaign.last_step_completed < 2 {
        return Err(ApiError::bad_request("Complete the second step"));
    }
    if !campaign.is_phishing() {
        return Err(ApiError::bad_request("This endpoint is only for a phishing campaign"));
    }

    let visible_ids: Vec<Uuid> = sqlx::query_scalar(
        "SELECT id FROM phishing_templates \
         WHERE id = ANY($1) AND (organization_id = $2 OR is_public = TRUE)",
    )
    .bind(&payload.phishing_template_ids)
    .bind(organization_id)
    .fetch_all(&pool)
    .await?;
    if visible_ids.is_empty() {
        return Err(ApiError::bad_request("Invalid Phishing Template"));
    }

    let phishing = lifecycle::get_phishing_campaign(&pool, campaign.id)
        .await?
        .ok_or_else(|| ApiError::not_found("Phishing campaign not found"))?;

    sqlx::query("DELETE FROM phishing_campaign_templates WHERE phishing_campaign_id = $1")
        .bind(phishing.id)
        .execute(&pool)
        .await?;
    sqlx::query(
        "INSERT INTO phishing_campaign_templates (id, phishing_campaign_id, phishing_template_id) \
         SELECT gen_random_uuid(), $1, t.id FROM UNNEST($2::uuid[]) AS t(id)",
    )
    .bind(phishing.id)
    .bind(&visible_ids)
    .execute(&pool)
    .await?;

    advance_step(&pool, &campaign, 3).await?;
    Ok(ok_message("Phishing campaign updated successfully"))
}

// --- wizard step 4: submit ---------------------------------------------------

/// PATCH /api/campaigns/:id/submit - mark the wizard complete, schedule the
/// campaign and hand it to the lifecycle engine.
pub async fn submit(
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let organization_id = auth_user.require_organization()?;
    let pool = database::pool().await?;
    let campaign = fetch_editable_campaign(&pool, id, organization_id).await?;
    if campaign.last_step_completed < 3 {
        return Err(ApiError::bad_request("Complete the third step"));
    }

    sqlx::query(
        "UPDATE campaigns SET last_step_completed = $1, status = 'scheduled', updated_at = NOW() \
         WHERE id = $2",
    )
    .bind(WIZARD_FINAL_STEP)
    .bind(campaign.id)
    .execute(&pool)
    .await?;

    let campaign_id = campaign.id;
    TaskScheduler::schedule_at(Utc::now(), async move {
        let pool = match database::pool().await {
            Ok(pool) => pool,
            Err(e) => return tracing::error!("initiate: no database: {}", e),
        };
        if let Err(e) = lifecycle::initiate_campaign(&pool, campaign_id).await {
            tracing::error!(%campaign_id, "initiate failed: {}", e);
        }
    });

    Ok(ok_message("Campaign created successfully"))
}

async fn advance_step(pool: &sqlx::PgPool, campaign: &Campaign, step: i32) -> Result<(), ApiError> {
    // Re-editing an earlier step never regresses the milestone
    sqlx::query(
        "UPDATE campaigns SET last_step_completed = GREATEST(last_step_completed, $1), \
         updated_at = NOW() WHERE id = $2",
    )
    .bind(step)
    .bind(campaign.id)
    .execute(pool)
    .await?;
    Ok(())
}

// --- listing & detail --------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CampaignListQuery {
    #[serde(rename = "type")]
    pub kind: Option<CampaignKind>,
    pub status: Option<CampaignStatus>,
    pub search: Option<String>,
}

/// GET /api/campaigns
pub async fn list(
    Extension(auth_user): Extension<AuthUser>,
    Query(query): Query<CampaignListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let organization_id = auth_user.require_organization()?;
    let pool = database::pool().await?;

    let campaigns: Vec<Campaign> = sqlx::query_as(
        "SELECT * FROM campaigns WHERE organization_id = $1 \
           AND ($2::text IS NULL OR kind = $2) \
           AND ($3::text IS NULL OR status = $3) \
           AND ($4::text IS NULL OR name ILIKE '%' || $4 || '%') \
         ORDER BY created_at DESC",
    )
    .bind(organization_id)
    .bind(query.kind.map(|k| k.as_str()))
    .bind(query.status.map(|s| s.as_str()))
    .bind(query.search)
    .fetch_all(&pool)
    .await?;

    let mut out = Vec::new();
    for campaign in &campaigns {
        out.push(list_entry_json(&pool, campaign).await?);
    }
    Ok(ok(json!(out)))
}

async fn list_entry_json(pool: &sqlx::PgPool, campaign: &Campaign) -> Result<serde_json::Value, ApiError> {
    let activity = campaign_activity(pool, campaign).await?;
    Ok(json!({
        "id": campaign.id,
        "name": campaign.name,
        "type": campaign.kind,
        "status": campaign.status,
        "start_date": campaign.start_date,
        "end_date": campaign.end_date,
        "activity": activity,
        "automatically_enroll_employees": campaign.automatically_enroll_employees,
        "last_step_completed": campaign.last_step_completed,
        "is_phishing_campaign": campaign.is_phishing(),
        "is_course_campaign": !campaign.is_phishing(),
    }))
}

async fn campaign_activity(
    pool: &sqlx::PgPool,
    campaign: &Campaign,
) -> Result<Option<crate::models::CampaignActivity>, ApiError> {
    if campaign.is_phishing() {
        if let Some(phishing) = lifecycle::get_phishing_campaign(pool, campaign.id).await? {
            return Ok(Some(
                metrics::funnel_activity(pool, phishing.id, "is_opened", None).await?,
            ));
        }
    } else if let Some(course_campaign) = lifecycle::get_course_campaign(pool, campaign.id).await? {
        return Ok(Some(
            metrics::course_campaign_activity(pool, course_campaign.id).await?,
        ));
    }
    Ok(None)
}

/// GET /api/campaigns/:id
pub async fn detail(
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let organization_id = auth_user.require_organization()?;
    let pool = database::pool().await?;
    fetch_owned_campaign(&pool, id, organization_id).await?;
    campaign_json(&pool, id).await.map(ok)
}

/// DELETE /api/campaigns/:id
pub async fn delete(
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let organization_id = auth_user.require_organization()?;
    let pool = database::pool().await?;
    fetch_owned_campaign(&pool, id, organization_id).await?;
    lifecycle::delete_campaign(&pool, id).await?;
    Ok(ok_message("Campaign deleted"))
}

/// PATCH /api/campaigns/:id/cancel
pub async fn cancel(
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let organization_id = auth_user.require_organization()?;
    let pool = database::pool().await?;
    let campaign = fetch_owned_campaign(&pool, id, organization_id).await?;
    if !matches!(
        campaign.status,
        CampaignStatus::Active | CampaignStatus::Scheduled
    ) {
        return Err(ApiError::not_found("Campaign not found"));
    }
    lifecycle::cancel_campaign(&pool, campaign.id).await?;
    Ok(ok_message("Campaign has been cancelled successfully."))
}

/// GET /api/campaigns/:id/preview/employees
pub async fn preview_employees(
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Query(pagination): Query<Pagination>,
) -> Result<impl IntoResponse, ApiError> {
    let organization_id = auth_user.require_organization()?;
    let pool = database::pool().await?;
    let campaign = fetch_owned_campaign(&pool, id, organization_id).await?;
    let (limit, offset) = pagination.limit_offset();

    let join = if campaign.is_phishing() {
        "JOIN employee_phishing_campaigns r ON r.employee_id = u.id \
         JOIN phishing_campaigns pc ON pc.id = r.phishing_campaign_id AND pc.campaign_id = $1"
    } else {
        "JOIN employee_course_campaigns r ON r.employee_id = u.id \
         JOIN course_campaigns cc ON cc.id = r.course_campaign_id AND cc.campaign_id = $1"
    };
    let sql = format!(
        "SELECT u.id, TRIM(CONCAT(COALESCE(ep.first_name, ''), ' ', COALESCE(ep.last_name, ''))), \
                d.name \
         FROM users u \
         JOIN employee_profiles ep ON ep.employee_id = u.id \
         LEFT JOIN departments d ON d.id = ep.department_id \
         {join} ORDER BY u.email LIMIT $2 OFFSET $3",
    );
    let rows: Vec<(Uuid, String, Option<String>)> = sqlx::query_as(&sql)
        .bind(campaign.id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&pool)
        .await?;

    Ok(ok(json!(rows
        .into_iter()
        .map(|(id, full_name, department)| json!({
            "id": id,
            "full_name": full_name,
            "department": department,
        }))
        .collect::<Vec<_>>())))
}

// --- metrics -----------------------------------------------------------------

/// GET /api/campaigns/:id/learning-metrics
pub async fn learning_metrics(
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let organization_id = auth_user.require_organization()?;
    let pool = database::pool().await?;
    let campaign = fetch_owned_campaign(&pool, id, organization_id).await?;
    if campaign.is_phishing()
        || !matches!(
            campaign.status,
            CampaignStatus::Active | CampaignStatus::Completed
        )
    {
        return Err(ApiError::not_found("Campaign not found"));
    }
    let course_campaign = lifecycle::get_course_campaign(&pool, campaign.id)
        .await?
        .ok_or_else(|| ApiError::not_found("Course campaign not found"))?;

    let mut payload = metrics::course_campaign_metrics(&pool, campaign.id, course_campaign.id).await?;
    payload["id"] = json!(campaign.id);
    payload["name"] = json!(campaign.name);
    payload["status"] = json!(campaign.status);
    Ok(ok(payload))
}

/// GET /api/campaigns/:id/phishing-metrics
pub async fn phishing_metrics(
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    phishing_metrics_inner(auth_user, id, None).await
}

/// GET /api/campaigns/:id/phishing-metrics/:template_id
pub async fn phishing_metrics_for_template(
    Extension(auth_user): Extension<AuthUser>,
    Path((id, template_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
    phishing_metrics_inner(auth_user, id, Some(template_id)).await
}

async fn phishing_metrics_inner(
    auth_user: AuthUser,
    campaign_id: Uuid,
    template_id: Option<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let organization_id = auth_user.require_organization()?;
    let pool = database::pool().await?;
    let campaign = fetch_owned_campaign(&pool, campaign_id, organization_id).await?;
    if !campaign.is_phishing()
        || !matches!(
            campaign.status,
            CampaignStatus::Active | CampaignStatus::Completed
        )
    {
        return Err(ApiError::not_found("Campaign not found"));
    }
    let phishing = lifecycle::get_phishing_campaign(&pool, campaign.id)
        .await?
        .ok_or_else(|| ApiError::not_found("Phishing campaign not found"))?;

    let mut payload =
        metrics::phishing_campaign_metrics(&pool, organization_id, phishing.id, template_id).await?;
    payload["id"] = json!(campaign.id);
    payload["status"] = json!(campaign.status);
    payload["email_delivery_type"] = json!(phishing.email_delivery_type);
    payload["email_delivery_date"] = json!(phishing.email_delivery_date);
    payload["email_delivery_start_date"] = json!(phishing.email_delivery_start_date);
    payload["email_delivery_end_date"] = json!(phishing.email_delivery_end_date);
    Ok(ok(payload))
}

// --- shared ------------------------------------------------------------------

async fn fetch_owned_campaign(
    pool: &sqlx::PgPool,
    id: Uuid,
    organization_id: Uuid,
) -> Result<Campaign, ApiError> {
    let campaign: Option<Campaign> =
        sqlx::query_as("SELECT * FROM campaigns WHERE id = $1 AND organization_id = $2")
            .bind(id)
            .bind(organization_id)
            .fetch_optional(pool)
            .await?;
    campaign.ok_or_else(|| ApiError::not_found("Campaign not found"))
}

async fn fetch_editable_campaign(
    pool: &sqlx::PgPool,
    id: Uuid,
    organization_id: Uuid,
) -> Result<Campaign, ApiError> {
    let campaign = fetch_owned_campaign(pool, id, organization_id).await?;
    if !campaign.is_editable() {
        return Err(ApiError::not_found("Campaign not found"));
    }
    Ok(campaign)
}

async fn campaign_json(pool: &sqlx::PgPool, campaign_id: Uuid) -> Result<serde_json::Value, ApiError> {
    let campaign: Campaign = sqlx::query_as("SELECT * FROM campaigns WHERE id = $1")
        .bind(campaign_id)
        .fetch_one(pool)
        .await?;

    let mut payload = json!({
        "id": campaign.id,
        "name": campaign.name,
        "description": campaign.description,
        "type": campaign.kind,
        "status": campaign.status,
        "start_date": campaign.start_date,
        "end_date": campaign.end_date,
        "activity": campaign_activity(pool, &campaign).await?,
        "automatically_enroll_employees": campaign.automatically_enroll_employees,
        "last_step_completed": campaign.last_step_completed,
    });

    if campaign.is_phishing() {
        if let Some(phishing) = lifecycle::get_phishing_campaign(pool, campaign.id).await? {
            let templates: Vec<(Uuid, String, Option<String>, Option<String>)> = sqlx::query_as(
                "SELECT t.id, t.name, t.description, t.vendor FROM phishing_templates t \
                 JOIN phishing_campaign_templates pct ON pct.phishing_template_id = t.id \
                 WHERE pct.phishing_campaign_id = $1",
            )
            .bind(phishing.id)
            .fetch_all(pool)
            .await?;
            payload["phishing_campaign"] = json!({
                "email_delivery_type": phishing.email_delivery_type,
                "email_delivery_date": phishing.email_delivery_date,
                "email_delivery_start_date": phishing.email_delivery_start_date,
                "email_delivery_end_date": phishing.email_delivery_end_date,
                "phishing_templates": templates.into_iter().map(|(id, name, description, vendor)| json!({
                    "id": id, "name": name, "description": description, "vendor": vendor,
                })).collect::<Vec<_>>(),
            });
        }
    } else if let Some(course_campaign) = lifecycle::get_course_campaign(pool, campaign.id).await? {
        let courses: Vec<crate::models::Course> = sqlx::query_as(
            "SELECT c.* FROM courses c \
             JOIN course_campaign_courses ccc ON ccc.course_id = c.id \
             WHERE ccc.course_campaign_id = $1",
        )
        .bind(course_campaign.id)
        .fetch_all(pool)
        .await?;
        let employee_count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM employee_course_campaigns WHERE course_campaign_id = $1",
        )
        .bind(course_campaign.id)
        .fetch_one(pool)
        .await?;
        payload["course_campaign"] = json!({
            "courses": courses,
            "employee_count": employee_count,
        });
    }

    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn plan(
        delivery_type: EmailDeliveryType,
        date: Option<DateTime<Utc>>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> DeliveryPlan {
        DeliveryPlan {
            email_delivery_type: delivery_type,
            email_delivery_date: date,
            email_delivery_start_date: start,
            email_delivery_end_date: end,
        }
    }

    #[test]
    fn immediate_delivery_clears_dates() {
        let now = Utc::now();
        let validated = validate_delivery_plan(
            &plan(EmailDeliveryType::Immediately, Some(now), Some(now), Some(now)),
            now,
        )
        .unwrap();
        assert!(validated.email_delivery_date.is_none());
        assert!(validated.email_delivery_start_date.is_none());
        assert!(validated.email_delivery_end_date.is_none());
    }

    #[test]
    fn scheduled_delivery_requires_future_date() {
        let now = Utc::now();
        assert!(validate_delivery_plan(&plan(EmailDeliveryType::Scheduled, None, None, None), now)
            .is_err());
        assert!(validate_delivery_plan(
            &plan(EmailDeliveryType::Scheduled, Some(now - Duration::hours(1)), None, None),
            now,
        )
        .is_err());
        let validated = validate_delivery_plan(
            &plan(EmailDeliveryType::Scheduled, Some(now + Duration::hours(1)), None, None),
            now,
        )
        .unwrap();
        assert!(validated.email_delivery_date.is_some());
    }

    #[test]
    fn scheduled_range_requires_ordered_future_window() {
        let now = Utc::now();
        let start = now + Duration::hours(1);
        let end = now + Duration::hours(5);
        assert!(validate_delivery_plan(
            &plan(EmailDeliveryType::ScheduledRange, None, Some(end), Some(start)),
            now,
        )
        .is_err());
        assert!(validate_delivery_plan(
            &plan(EmailDeliveryType::ScheduledRange, None, Some(start), None),
            now,
        )
        .is_err());
        let validated = validate_delivery_plan(
            &plan(EmailDeliveryType::ScheduledRange, None, Some(start), Some(end)),
            now,
        )
        .unwrap();
        assert_eq!(validated.email_delivery_start_date, Some(start));
        assert_eq!(validated.email_delivery_end_date, Some(end));
    }

    #[test]
    fn course_dates_must_be_ordered_and_future() {
        let now = Utc::now();
        let future = now + Duration::days(1);
        let later = now + Duration::days(3);
        assert!(validate_course_dates(Some(future), Some(later), now).is_ok());
        assert!(validate_course_dates(Some(later), Some(future), now).is_err());
        assert!(validate_course_dates(Some(now - Duration::days(1)), Some(later), now).is_err());
        // Dates are optional in step 1
        assert!(validate_course_dates(None, None, now).is_ok());
    }
}
