use axum::extract::Path;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use crate::auth::{self, hash_password, verify_password};
use crate::config;
use crate::database;
use crate::error::ApiError;
use crate::middleware::AuthUser;
use crate::models::{Role, User};
use crate::services::email::{self, Mailer, OutgoingEmail};
use crate::services::{enrollment, metrics};
use crate::tasks::jobs::{self, TokenTarget};
use crate::tasks::TaskScheduler;

use super::{ok, ok_message};

// --- registration -----------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct RegisterStep1Request {
    pub email: String,
    pub name: String,
    pub url: String,
}

/// POST /api/users/register - organization registration, step 1
pub async fn register_step1(
    Json(payload): Json<RegisterStep1Request>,
) -> Result<impl IntoResponse, ApiError> {
    let pool = database::pool().await?;

    if payload.email.trim().is_empty() || !payload.email.contains('@') {
        return Err(ApiError::field_error("email", "A valid email is required"));
    }
    if payload.name.trim().is_empty() {
        return Err(ApiError::field_error("name", "Organization name is required"));
    }

    let email_taken: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE email = $1)")
        .bind(payload.email.to_lowercase())
        .fetch_one(&pool)
        .await?;
    if email_taken {
        return Err(ApiError::bad_request("Email already exists"));
    }
    let name_taken: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM organization_profiles WHERE name = $1)")
            .bind(&payload.name)
            .fetch_one(&pool)
            .await?;
    if name_taken {
        return Err(ApiError::bad_request("Organization name already exists"));
    }

    let organization_id: Uuid = sqlx::query_scalar(
        "INSERT INTO users (id, email, role, is_active) \
         VALUES (gen_random_uuid(), $1, $2, FALSE) RETURNING id",
    )
    .bind(payload.email.to_lowercase())
    .bind(Role::Organization.as_str())
    .fetch_one(&pool)
    .await?;

    sqlx::query(
        "INSERT INTO organization_profiles (id, organization_id, name, url) \
         VALUES (gen_random_uuid(), $1, $2, $3)",
    )
    .bind(organization_id)
    .bind(&payload.name)
    .bind(&payload.url)
    .execute(&pool)
    .await?;

    send_activation_email(&pool, organization_id, &payload.email).await?;
    Ok(ok_message("Account Verification Link sent"))
}

async fn send_activation_email(
    pool: &sqlx::PgPool,
    user_id: Uuid,
    to_email: &str,
) -> Result<(), ApiError> {
    let token = enrollment::set_user_token(pool, user_id).await?;
    let (subject, body) = email::organization_activation(&token);
    Mailer::global()
        .send(OutgoingEmail::new(to_email, subject, body))
        .await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct VerifyTokenRequest {
    pub email: String,
    pub token: String,
}

/// POST /api/users/verify-token
pub async fn verify_token(
    Json(payload): Json<VerifyTokenRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let pool = database::pool().await?;
    let user = fetch_user_by_email(&pool, &payload.email).await?;
    if user.token.as_deref() != Some(payload.token.as_str()) {
        return Err(ApiError::bad_request("Token is incorrect"));
    }
    Ok(ok_message("Email Verified"))
}

#[derive(Debug, Deserialize)]
pub struct RegisterStep2Request {
    pub email: String,
    pub token: String,
    pub password: String,
    pub confirm_password: String,
}

/// POST /api/users/register-2 - set the password against a valid token and
/// activate the account.
pub async fn register_step2(
    Json(payload): Json<RegisterStep2Request>,
) -> Result<impl IntoResponse, ApiError> {
    let pool = database::pool().await?;

    validate_password_pair(&payload.password, &payload.confirm_password)?;
    let user = fetch_user_by_email(&pool, &payload.email).await?;
    if user.token.as_deref() != Some(payload.token.as_str()) {
        return Err(ApiError::bad_request("Token is incorrect"));
    }

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

    let tokens = auth::issue_token_pair(user.id, &user.email, user.role)?;
    Ok(ok(json!({ "tokens": tokens })))
}

#[derive(Debug, Deserialize)]
pub struct ResendActivationRequest {
    pub email: String,
}

/// POST /api/users/resend-activation-link
pub async fn resend_activation_link(
    Json(payload): Json<ResendActivationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let pool = database::pool().await?;
    let user: Option<User> = sqlx::query_as(
        "SELECT * FROM users WHERE email = $1 AND role = 'organization' AND is_email_verified = FALSE",
    )
    .bind(payload.email.to_lowercase())
    .fetch_optional(&pool)
    .await?;
    let Some(user) = user else {
        return Err(ApiError::bad_request(
            "Organization does not exist or organization has already been activated",
        ));
    };
    send_activation_email(&pool, user.id, &user.email).await?;
    Ok(ok_message("Account Verification Link sent"))
}

// --- sessions ---------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// POST /api/users/login
pub async fn login(Json(payload): Json<LoginRequest>) -> Result<impl IntoResponse, ApiError> {
    let pool = database::pool().await?;
    let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE email = $1")
        .bind(payload.email.to_lowercase())
        .fetch_optional(&pool)
        .await?;
    let Some(user) = user else {
        return Err(ApiError::bad_request("User does not exist"));
    };
    let valid = user
        .password_digest
        .as_deref()
        .map(|digest| verify_password(&payload.password, digest))
        .unwrap_or(false);
    if !valid {
        return Err(ApiError::bad_request("Invalid password"));
    }
    if !user.is_active {
        return Err(ApiError::forbidden("Account is not active"));
    }

    sqlx::query("UPDATE users SET last_login = NOW(), updated_at = NOW() WHERE id = $1")
        .bind(user.id)
        .execute(&pool)
        .await?;

    let tokens = auth::issue_token_pair(user.id, &user.email, user.role)?;
    Ok(ok(json!({
        "role": user.role,
        "access": tokens.access,
        "refresh": tokens.refresh,
    })))
}

// --- passwords --------------------------------------------------------------

fn validate_password_pair(password: &str, confirmation: &str) -> Result<(), ApiError> {
    if password.len() < 8 {
        return Err(ApiError::field_error(
            "password",
            "Password must be at least 8 characters",
        ));
    }
    if password != confirmation {
        return Err(ApiError::bad_request("Passwords do not match"));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

/// POST /api/users/forgot-password
pub async fn forgot_password(
    Json(payload): Json<ForgotPasswordRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let pool = database::pool().await?;
    let user = fetch_user_by_email(&pool, &payload.email).await?;
    let token = enrollment::set_user_token(&pool, user.id).await?;
    let (subject, body) = email::password_reset(&token);
    Mailer::global()
        .send(OutgoingEmail::new(&user.email, subject, body))
        .await?;
    Ok(ok_message("Password Reset Link sent"))
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub password: String,
    pub confirm_password: String,
}

/// PATCH /api/users/reset-password/:token
pub async fn reset_password(
    Path(token): Path<String>,
    Json(payload): Json<ResetPasswordRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let pool = database::pool().await?;
    validate_password_pair(&payload.password, &payload.confirm_password)?;

    let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE token = $1")
        .bind(&token)
        .fetch_optional(&pool)
        .await?;
    let Some(user) = user else {
        return Err(ApiError::not_found("Record not found"));
    };

    if let Some(task_id) = user.token_task_id {
        TaskScheduler::revoke(task_id);
    }
    sqlx::query(
        "UPDATE users SET password_digest = $1, token = NULL, token_task_id = NULL, \
         updated_at = NOW() WHERE id = $2",
    )
    .bind(hash_password(&payload.password))
    .bind(user.id)
    .execute(&pool)
    .await?;
    Ok(ok_message("Password Reset Successfully"))
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub old_password: String,
    pub new_password: String,
    pub confirm_password: String,
}

/// PATCH /api/users/change-password
pub async fn change_password(
    Extension(auth_user): Extension<AuthUser>,
    Json(payload): Json<ChangePasswordRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let pool = database::pool().await?;
    validate_password_pair(&payload.new_password, &payload.confirm_password)?;
    if payload.new_password == payload.old_password {
        return Err(ApiError::bad_request(
            "New Password cannot be the same as Old Password",
        ));
    }

    let user = fetch_user(&pool, auth_user.user_id).await?;
    let valid = user
        .password_digest
        .as_deref()
        .map(|digest| verify_password(&payload.old_password, digest))
        .unwrap_or(false);
    if !valid {
        return Err(ApiError::bad_request("Old Password is incorrect"));
    }

    sqlx::query("UPDATE users SET password_digest = $1, updated_at = NOW() WHERE id = $2")
        .bind(hash_password(&payload.new_password))
        .bind(user.id)
        .execute(&pool)
        .await?;

    let (subject, body) = email::password_changed();
    if let Err(e) = Mailer::global()
        .send(OutgoingEmail::new(&user.email, subject, body))
        .await
    {
        warn!(email = %user.email, "password-changed email failed: {}", e);
    }
    Ok(ok_message("Password Changed Successfully"))
}

// --- organization profile & dashboard ---------------------------------------

/// GET /api/users/profile
pub async fn organization_profile(
    Extension(auth_user): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let organization_id = auth_user.require_organization()?;
    let pool = database::pool().await?;

    let user = fetch_user(&pool, organization_id).await?;
    let profile: crate::models::OrganizationProfile =
        sqlx::query_as("SELECT * FROM organization_profiles WHERE organization_id = $1")
            .bind(organization_id)
            .fetch_one(&pool)
            .await?;

    Ok(ok(json!({
        "id": organization_id,
        "email": user.email,
        "last_login": user.last_login,
        "name": profile.name,
        "url": profile.url,
        "security_score": profile.security_score,
    })))
}

/// GET /api/users/dashboard
pub async fn organization_dashboard(
    Extension(auth_user): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let organization_id = auth_user.require_organization()?;
    let pool = database::pool().await?;
    let dashboard = metrics::organization_dashboard(&pool, organization_id).await?;
    Ok(ok(dashboard))
}

// --- organization settings --------------------------------------------------

/// GET /api/users/settings/cut-off-score
pub async fn get_cut_off_score(
    Extension(auth_user): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let organization_id = auth_user.require_organization()?;
    let pool = database::pool().await?;
    let cut_off_score: f64 = sqlx::query_scalar(
        "SELECT cut_off_score FROM organization_profiles WHERE organization_id = $1",
    )
    .bind(organization_id)
    .fetch_one(&pool)
    .await?;
    Ok(ok(json!({ "cut_off_score": cut_off_score })))
}

#[derive(Debug, Deserialize)]
pub struct CutOffScoreRequest {
    pub cut_off_score: f64,
}

/// PATCH /api/users/settings/cut-off-score
pub async fn set_cut_off_score(
    Extension(auth_user): Extension<AuthUser>,
    Json(payload): Json<CutOffScoreRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let organization_id = auth_user.require_organization()?;
    if !(0.0..=100.0).contains(&payload.cut_off_score) {
        return Err(ApiError::field_error(
            "cut_off_score",
            "Must be between 0 and 100",
        ));
    }
    let pool = database::pool().await?;
    sqlx::query(
        "UPDATE organization_profiles SET cut_off_score = $1, updated_at = NOW() \
         WHERE organization_id = $2",
    )
    .bind(payload.cut_off_score)
    .bind(organization_id)
    .execute(&pool)
    .await?;
    Ok(ok(json!({ "cut_off_score": payload.cut_off_score })))
}

/// GET /api/users/settings/enrollment-notifications
pub async fn get_notification_settings(
    Extension(auth_user): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let organization_id = auth_user.require_organization()?;
    let pool = database::pool().await?;
    let row: (bool, bool, bool) = sqlx::query_as(
        "SELECT campaign_email_notification, campaign_completion_notification, reminder_notification \
         FROM organization_profiles WHERE organization_id = $1",
    )
    .bind(organization_id)
    .fetch_one(&pool)
    .await?;
    Ok(ok(json!({
        "campaign_email_notification": row.0,
        "campaign_completion_notification": row.1,
        "reminder_notification": row.2,
    })))
}

#[derive(Debug, Deserialize)]
pub struct NotificationSettingsRequest {
    pub campaign_email_notification: Option<bool>,
    pub campaign_completion_notification: Option<bool>,
    pub reminder_notification: Option<bool>,
}

/// PATCH /api/users/settings/enrollment-notifications
pub async fn update_notification_settings(
    Extension(auth_user): Extension<AuthUser>,
    Json(payload): Json<NotificationSettingsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let organization_id = auth_user.require_organization()?;
    let pool = database::pool().await?;
    sqlx::query(
        "UPDATE organization_profiles SET \
           campaign_email_notification = COALESCE($1, campaign_email_notification), \
           campaign_completion_notification = COALESCE($2, campaign_completion_notification), \
           reminder_notification = COALESCE($3, reminder_notification), \
           updated_at = NOW() \
         WHERE organization_id = $4",
    )
    .bind(payload.campaign_email_notification)
    .bind(payload.campaign_completion_notification)
    .bind(payload.reminder_notification)
    .bind(organization_id)
    .execute(&pool)
    .await?;
    get_notification_settings(Extension(auth_user)).await
}

/// GET /api/users/settings/phishing-report-email
pub async fn get_phishing_report_email(
    Extension(auth_user): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let organization_id = auth_user.require_organization()?;
    let pool = database::pool().await?;
    let report_email: Option<String> = sqlx::query_scalar(
        "SELECT phishing_report_email FROM organization_profiles WHERE organization_id = $1",
    )
    .bind(organization_id)
    .fetch_one(&pool)
    .await?;
    Ok(ok(json!({ "phishing_report_email": report_email })))
}

#[derive(Debug, Deserialize)]
pub struct PhishingReportEmailRequest {
    pub phishing_report_email: String,
}

/// PATCH /api/users/settings/phishing-report-email
pub async fn set_phishing_report_email(
    Extension(auth_user): Extension<AuthUser>,
    Json(payload): Json<PhishingReportEmailRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let organization_id = auth_user.require_organization()?;
    if !payload.phishing_report_email.contains('@') {
        return Err(ApiError::field_error(
            "phishing_report_email",
            "A valid email is required",
        ));
    }
    let pool = database::pool().await?;
    sqlx::query(
        "UPDATE organization_profiles SET phishing_report_email = $1, updated_at = NOW() \
         WHERE organization_id = $2",
    )
    .bind(&payload.phishing_report_email)
    .bind(organization_id)
    .execute(&pool)
    .await?;
    Ok(ok(json!({ "phishing_report_email": payload.phishing_report_email })))
}

/// GET /api/users/settings/allowlisting - everything an organization's mail
/// admin must allowlist for the simulations to land.
pub async fn allowlisting_settings(
    Extension(auth_user): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    auth_user.require_organization()?;
    let pool = database::pool().await?;
    let domains: Vec<Option<String>> =
        sqlx::query_scalar("SELECT DISTINCT email_domain FROM phishing_templates")
            .fetch_all(&pool)
            .await?;
    let email_config = &config::config().email;
    Ok(ok(json!({
        "ip_addresses": email_config.relay_ip_addresses,
        "email_headers": [email_config.phishing_tracking_header],
        "domain_list": domains.into_iter().flatten().collect::<Vec<_>>(),
    })))
}

// --- authorized domains & deliverability tests ------------------------------

#[derive(Debug, Deserialize)]
pub struct AuthorizedDomainRequest {
    pub email: String,
}

/// GET /api/users/settings/authorized-domains
pub async fn list_authorized_domains(
    Extension(auth_user): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let organization_id = auth_user.require_organization()?;
    let pool = database::pool().await?;
    let domains: Vec<crate::models::AuthorizedDomain> = sqlx::query_as(
        "SELECT * FROM authorized_domains WHERE organization_id = $1 ORDER BY created_at",
    )
    .bind(organization_id)
    .fetch_all(&pool)
    .await?;
    Ok(ok(json!(domains)))
}

/// POST /api/users/settings/authorized-domains
pub async fn create_authorized_domain(
    Extension(auth_user): Extension<AuthUser>,
    Json(payload): Json<AuthorizedDomainRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let organization_id = auth_user.require_organization()?;
    let Some((_, domain)) = payload.email.split_once('@') else {
        return Err(ApiError::field_error("email", "A valid email is required"));
    };
    let pool = database::pool().await?;

    let domain_id: Uuid = sqlx::query_scalar(
        "INSERT INTO authorized_domains (id, organization_id, email, domain) \
         VALUES (gen_random_uuid(), $1, $2, $3) RETURNING id",
    )
    .bind(organization_id)
    .bind(&payload.email)
    .bind(domain)
    .fetch_one(&pool)
    .await?;

    send_domain_verification(&pool, TokenTarget::AuthorizedDomain, domain_id, &payload.email)
        .await?;
    Ok(ok(json!({ "id": domain_id, "domain": domain })))
}

async fn send_domain_verification(
    pool: &sqlx::PgPool,
    target: TokenTarget,
    row_id: Uuid,
    to_email: &str,
) -> Result<(), ApiError> {
    let (table, previous_task): (&str, Option<Uuid>) = match target {
        TokenTarget::AuthorizedDomain => (
            "authorized_domains",
            sqlx::query_scalar("SELECT verification_task_id FROM authorized_domains WHERE id = $1")
                .bind(row_id)
                .fetch_one(pool)
                .await?,
        ),
        TokenTarget::DeliverabilityTest => (
            "deliverability_tests",
            sqlx::query_scalar("SELECT verification_task_id FROM deliverability_tests WHERE id = $1")
                .bind(row_id)
                .fetch_one(pool)
                .await?,
        ),
        TokenTarget::User => unreachable!("user tokens go through enrollment::set_user_token"),
    };
    if let Some(task_id) = previous_task {
        TaskScheduler::revoke(task_id);
    }

    let token = auth::one_time_token();
    let expiry = config::config().security.verification_token_expiry_secs;
    let task_id = jobs::schedule_token_rotation(
        target,
        row_id,
        Utc::now() + Duration::seconds(expiry as i64),
    );
    let sql = format!(
        "UPDATE {table} SET verification_token = $1, verification_task_id = $2, updated_at = NOW() \
         WHERE id = $3",
    );
    sqlx::query(&sql)
        .bind(&token)
        .bind(task_id)
        .bind(row_id)
        .execute(pool)
        .await?;

    let (subject, body) = match target {
        TokenTarget::DeliverabilityTest => email::deliverability_test(&token),
        _ => email::domain_verification(&token),
    };
    Mailer::global()
        .send(OutgoingEmail::new(to_email, subject, body))
        .await?;
    Ok(())
}

/// GET /api/users/settings/authorized-domains/:id
pub async fn get_authorized_domain(
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let organization_id = auth_user.require_organization()?;
    let pool = database::pool().await?;
    let domain: Option<crate::models::AuthorizedDomain> =
        sqlx::query_as("SELECT * FROM authorized_domains WHERE id = $1 AND organization_id = $2")
            .bind(id)
            .bind(organization_id)
            .fetch_optional(&pool)
            .await?;
    match domain {
        Some(domain) => Ok(ok(json!(domain))),
        None => Err(ApiError::not_found("Authorized domain not found")),
    }
}

/// DELETE /api/users/settings/authorized-domains/:id
pub async fn delete_authorized_domain(
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let organization_id = auth_user.require_organization()?;
    let pool = database::pool().await?;
    let deleted = sqlx::query("DELETE FROM authorized_domains WHERE id = $1 AND organization_id = $2")
        .bind(id)
        .bind(organization_id)
        .execute(&pool)
        .await?;
    if deleted.rows_affected() == 0 {
        return Err(ApiError::not_found("Authorized domain not found"));
    }
    Ok(ok_message("Authorized domain deleted"))
}

#[derive(Debug, Deserialize)]
pub struct VerifyDomainRequest {
    pub token: String,
}

/// POST /api/users/settings/authorized-domains/:id/verify
pub async fn verify_authorized_domain(
    Path(id): Path<Uuid>,
    Json(payload): Json<VerifyDomainRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let pool = database::pool().await?;
    let updated = sqlx::query(
        "UPDATE authorized_domains \
         SET verified_on = NOW(), verification_token = NULL, updated_at = NOW() \
         WHERE id = $1 AND verification_token = $2",
    )
    .bind(id)
    .bind(&payload.token)
    .execute(&pool)
    .await?;
    if updated.rows_affected() == 0 {
        return Err(ApiError::bad_request("Token is incorrect"));
    }
    Ok(ok_message("Domain verified"))
}

/// POST /api/users/settings/authorized-domains/:id/resend-verification
pub async fn resend_domain_verification(
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let organization_id = auth_user.require_organization()?;
    let pool = database::pool().await?;
    let to_email: Option<Option<String>> = sqlx::query_scalar(
        "SELECT email FROM authorized_domains WHERE id = $1 AND organization_id = $2",
    )
    .bind(id)
    .bind(organization_id)
    .fetch_optional(&pool)
    .await?;
    let Some(Some(to_email)) = to_email else {
        return Err(ApiError::not_found("Authorized domain not found"));
    };
    send_domain_verification(&pool, TokenTarget::AuthorizedDomain, id, &to_email).await?;
    Ok(ok_message("Verification email sent"))
}

/// GET /api/users/settings/deliverability-test
pub async fn list_deliverability_tests(
    Extension(auth_user): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let organization_id = auth_user.require_organization()?;
    let pool = database::pool().await?;
    let tests: Vec<crate::models::DeliverabilityTest> = sqlx::query_as(
        "SELECT * FROM deliverability_tests WHERE organization_id = $1 ORDER BY created_at",
    )
    .bind(organization_id)
    .fetch_all(&pool)
    .await?;
    Ok(ok(json!(tests)))
}

/// POST /api/users/settings/deliverability-test
pub async fn create_deliverability_test(
    Extension(auth_user): Extension<AuthUser>,
    Json(payload): Json<AuthorizedDomainRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let organization_id = auth_user.require_organization()?;
    let Some((_, domain)) = payload.email.split_once('@') else {
        return Err(ApiError::field_error("email", "A valid email is required"));
    };
    let pool = database::pool().await?;

    let authorized: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM authorized_domains WHERE organization_id = $1 AND domain = $2)",
    )
    .bind(organization_id)
    .bind(domain)
    .fetch_one(&pool)
    .await?;
    if !authorized {
        return Err(ApiError::bad_request("Unauthorized domain"));
    }

    let test_id: Uuid = sqlx::query_scalar(
        "INSERT INTO deliverability_tests (id, organization_id, email) \
         VALUES (gen_random_uuid(), $1, $2) RETURNING id",
    )
    .bind(organization_id)
    .bind(&payload.email)
    .fetch_one(&pool)
    .await?;

    send_domain_verification(&pool, TokenTarget::DeliverabilityTest, test_id, &payload.email)
        .await?;
    Ok(ok(json!({ "id": test_id, "email": payload.email })))
}

/// GET /api/users/settings/deliverability-test/:id
pub async fn get_deliverability_test(
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let organization_id = auth_user.require_organization()?;
    let pool = database::pool().await?;
    let test: Option<crate::models::DeliverabilityTest> =
        sqlx::query_as("SELECT * FROM deliverability_tests WHERE id = $1 AND organization_id = $2")
            .bind(id)
            .bind(organization_id)
            .fetch_optional(&pool)
            .await?;
    match test {
        Some(test) => Ok(ok(json!(test))),
        None => Err(ApiError::not_found("Deliverability test not found")),
    }
}

/// POST /api/users/settings/deliverability-test/:id/verify
pub async fn verify_deliverability_test(
    Path(id): Path<Uuid>,
    Json(payload): Json<VerifyDomainRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let pool = database::pool().await?;
    let updated = sqlx::query(
        "UPDATE deliverability_tests \
         SET verified_on = NOW(), verification_token = NULL, updated_at = NOW() \
         WHERE id = $1 AND verification_token = $2",
    )
    .bind(id)
    .bind(&payload.token)
    .execute(&pool)
    .await?;
    if updated.rows_affected() == 0 {
        return Err(ApiError::bad_request("Token is incorrect"));
    }
    Ok(ok_message("Delivery confirmed"))
}

/// GET /api/users/phishing-permission-check - has the organization verified
/// at least one domain and one deliverability test?
pub async fn phishing_permission_check(
    Extension(auth_user): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let organization_id = auth_user.require_organization()?;
    let pool = database::pool().await?;
    let domains: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM authorized_domains \
         WHERE organization_id = $1 AND verified_on IS NOT NULL)",
    )
    .bind(organization_id)
    .fetch_one(&pool)
    .await?;
    let tests: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM deliverability_tests \
         WHERE organization_id = $1 AND verified_on IS NOT NULL)",
    )
    .bind(organization_id)
    .fetch_one(&pool)
    .await?;
    Ok(ok(json!({ "authorized_domains": domains, "deliverability_tests": tests })))
}

// --- shared lookups ---------------------------------------------------------

async fn fetch_user(pool: &sqlx::PgPool, user_id: Uuid) -> Result<User, ApiError> {
    let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await?;
    user.ok_or_else(|| ApiError::not_found("User not found"))
}

async fn fetch_user_by_email(pool: &sqlx::PgPool, email: &str) -> Result<User, ApiError> {
    let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE email = $1")
        .bind(email.to_lowercase())
        .fetch_optional(pool)
        .await?;
    user.ok_or_else(|| ApiError::bad_request("User does not exist"))
}
