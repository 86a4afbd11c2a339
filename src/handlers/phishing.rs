use axum::extract::Path;
use axum::response::IntoResponse;
use axum::Extension;
use serde_json::json;
use uuid::Uuid;

use crate::database;
use crate::error::ApiError;
use crate::middleware::AuthUser;
use crate::models::{PhishingAction, PhishingTemplate};
use crate::services::scoring;

use super::{ok, ok_message};

/// GET /api/phishing/templates - org-owned and public templates.
pub async fn list_templates(
    Extension(auth_user): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let organization_id = auth_user.require_organization()?;
    let pool = database::pool().await?;
    let templates: Vec<PhishingTemplate> = sqlx::query_as(
        "SELECT * FROM phishing_templates \
         WHERE organization_id = $1 OR is_public = TRUE ORDER BY name",
    )
    .bind(organization_id)
    .fetch_all(&pool)
    .await?;

    Ok(ok(json!(templates
        .iter()
        .map(|t| json!({
            "id": t.id,
            "organization": t.organization_id,
            "name": t.name,
            "description": t.description,
            "vendor": t.vendor,
        }))
        .collect::<Vec<_>>())))
}

/// GET /api/phishing/templates/:id
pub async fn template_detail(
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let organization_id = auth_user.require_organization()?;
    let pool = database::pool().await?;
    let template: Option<PhishingTemplate> = sqlx::query_as(
        "SELECT * FROM phishing_templates \
         WHERE id = $1 AND (organization_id = $2 OR is_public = TRUE)",
    )
    .bind(id)
    .bind(organization_id)
    .fetch_optional(&pool)
    .await?;
    match template {
        Some(template) => Ok(ok(json!(template))),
        None => Err(ApiError::not_found("Phishing template not found")),
    }
}

// Funnel callbacks. These are hit from inside the simulated email and its
// landing page, keyed by the per-employee record id, so they are public.

/// PATCH /api/phishing/campaigns/:id/opened
pub async fn record_opened(Path(id): Path<Uuid>) -> Result<impl IntoResponse, ApiError> {
    record_action(id, PhishingAction::Opened).await
}

/// PATCH /api/phishing/campaigns/:id/clicked
pub async fn record_clicked(Path(id): Path<Uuid>) -> Result<impl IntoResponse, ApiError> {
    record_action(id, PhishingAction::Clicked).await
}

/// PATCH /api/phishing/campaigns/:id/compromised
pub async fn record_compromised(Path(id): Path<Uuid>) -> Result<impl IntoResponse, ApiError> {
    record_action(id, PhishingAction::Compromised).await
}

/// PATCH /api/phishing/campaigns/:id/reported
pub async fn record_reported(Path(id): Path<Uuid>) -> Result<impl IntoResponse, ApiError> {
    record_action(id, PhishingAction::Reported).await
}

async fn record_action(
    record_id: Uuid,
    action: PhishingAction,
) -> Result<axum::Json<serde_json::Value>, ApiError> {
    let pool = database::pool().await?;
    let employee_id = scoring::record_phishing_action(&pool, record_id, action).await?;
    scoring::rollup_employee_security_score(&pool, employee_id).await?;
    Ok(ok_message("Recorded"))
}
