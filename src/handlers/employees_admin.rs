use axum::extract::{Path, Query};
use axum::response::IntoResponse;
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::database;
use crate::error::ApiError;
use crate::middleware::AuthUser;
use crate::services::enrollment::{self, ImportRecord, NewEmployee};

use super::{ok, ok_message, Pagination};

#[derive(Debug, Deserialize)]
pub struct AddEmployeeRequest {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub department_id: Option<Uuid>,
    pub staff_id: Option<String>,
}

/// POST /api/users/add-employee
pub async fn add_employee(
    Extension(auth_user): Extension<AuthUser>,
    Json(payload): Json<AddEmployeeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let organization_id = auth_user.require_organization()?;
    if !payload.email.contains('@') {
        return Err(ApiError::field_error("email", "A valid email is required"));
    }
    let pool = database::pool().await?;

    let email_taken: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE email = $1)")
        .bind(payload.email.to_lowercase())
        .fetch_one(&pool)
        .await?;
    if email_taken {
        return Err(ApiError::bad_request("User email already exists"));
    }

    if let Some(department_id) = payload.department_id {
        let owned: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM departments WHERE id = $1 AND organization_id = $2)",
        )
        .bind(department_id)
        .bind(organization_id)
        .fetch_one(&pool)
        .await?;
        if !owned {
            return Err(ApiError::bad_request("Department does not exist"));
        }
    }

    let employee_id = enrollment::create_employee(
        &pool,
        organization_id,
        NewEmployee {
            email: payload.email.clone(),
            first_name: Some(payload.first_name),
            last_name: Some(payload.last_name),
            department_id: payload.department_id,
            staff_id: payload.staff_id,
        },
    )
    .await?;

    employee_json(&pool, employee_id).await.map(ok)
}

#[derive(Debug, Deserialize)]
pub struct EmployeeListQuery {
    /// Search over first name, last name, email and department name
    pub query: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[derive(Debug, sqlx::FromRow, serde::Serialize)]
struct EmployeeRow {
    id: Uuid,
    email: String,
    last_login: Option<chrono::DateTime<chrono::Utc>>,
    first_name: Option<String>,
    last_name: Option<String>,
    status: String,
    department: Option<String>,
    security_score: Option<f64>,
}

const EMPLOYEE_SELECT: &str =
    "SELECT u.id, u.email, u.last_login, ep.first_name, ep.last_name, ep.status, \
            d.name AS department, ep.security_score \
     FROM users u \
     JOIN employee_profiles ep ON ep.employee_id = u.id \
     LEFT JOIN departments d ON d.id = ep.department_id \
     WHERE ep.organization_id = $1 \
       AND ($2::text IS NULL OR ep.first_name ILIKE '%' || $2 || '%' \
            OR ep.last_name ILIKE '%' || $2 || '%' \
            OR u.email ILIKE '%' || $2 || '%' \
            OR d.name ILIKE '%' || $2 || '%') \
     ORDER BY u.email";

/// GET /api/users/employees
pub async fn list(
    Extension(auth_user): Extension<AuthUser>,
    Query(query): Query<EmployeeListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let organization_id = auth_user.require_organization()?;
    let pool = database::pool().await?;
    let employees: Vec<EmployeeRow> = sqlx::query_as(EMPLOYEE_SELECT)
        .bind(organization_id)
        .bind(query.query)
        .fetch_all(&pool)
        .await?;
    Ok(ok(json!(employees)))
}

/// GET /api/users/employees-paginated
pub async fn list_paginated(
    Extension(auth_user): Extension<AuthUser>,
    Query(query): Query<EmployeeListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let organization_id = auth_user.require_organization()?;
    let pool = database::pool().await?;
    let (limit, offset) = Pagination { page: query.page, per_page: query.per_page }.limit_offset();

    let sql = format!("{} LIMIT $3 OFFSET $4", EMPLOYEE_SELECT);
    let employees: Vec<EmployeeRow> = sqlx::query_as(&sql)
        .bind(organization_id)
        .bind(&query.query)
        .bind(limit)
        .bind(offset)
        .fetch_all(&pool)
        .await?;

    let total: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM employee_profiles WHERE organization_id = $1",
    )
    .bind(organization_id)
    .fetch_one(&pool)
    .await?;

    Ok(ok(json!({ "count": total, "results": employees })))
}

#[derive(Debug, Deserialize)]
pub struct UpdateEmployeeRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub department_id: Option<Uuid>,
}

/// PATCH /api/users/employees/:id
pub async fn update(
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateEmployeeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let organization_id = auth_user.require_organization()?;
    let pool = database::pool().await?;

    let owned: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM employee_profiles \
         WHERE employee_id = $1 AND organization_id = $2)",
    )
    .bind(id)
    .bind(organization_id)
    .fetch_one(&pool)
    .await?;
    if !owned {
        return Err(ApiError::not_found("Employee not found"));
    }

    if let Some(department_id) = payload.department_id {
        let department_owned: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM departments WHERE id = $1 AND organization_id = $2)",
        )
        .bind(department_id)
        .bind(organization_id)
        .fetch_one(&pool)
        .await?;
        if !department_owned {
            return Err(ApiError::bad_request("Department does not exist"));
        }
    }

    sqlx::query(
        "UPDATE employee_profiles SET \
           first_name = COALESCE($1, first_name), \
           last_name = COALESCE($2, last_name), \
           department_id = COALESCE($3, department_id), \
           updated_at = NOW() \
         WHERE employee_id = $4",
    )
    .bind(payload.first_name)
    .bind(payload.last_name)
    .bind(payload.department_id)
    .bind(id)
    .execute(&pool)
    .await?;

    employee_json(&pool, id).await.map(ok)
}

#[derive(Debug, Deserialize)]
pub struct DeactivateEmployeesRequest {
    pub ids: Vec<Uuid>,
}

/// POST /api/users/employees/deactivate
pub async fn deactivate(
    Extension(auth_user): Extension<AuthUser>,
    Json(payload): Json<DeactivateEmployeesRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let organization_id = auth_user.require_organization()?;
    let pool = database::pool().await?;

    let owned_ids: Vec<Uuid> = sqlx::query_scalar(
        "SELECT employee_id FROM employee_profiles \
         WHERE organization_id = $1 AND employee_id = ANY($2)",
    )
    .bind(organization_id)
    .bind(&payload.ids)
    .fetch_all(&pool)
    .await?;
    if owned_ids.is_empty() {
        return Err(ApiError::bad_request("Employees do not exist"));
    }

    for employee_id in owned_ids {
        enrollment::deactivate_employee(&pool, employee_id).await?;
    }
    Ok(ok_message("Employees Deactivated Successfully"))
}

#[derive(Debug, Deserialize)]
pub struct ImportRequest {
    pub records: Vec<ImportRecord>,
}

/// POST /api/users/user-file-import - bulk import of parsed employee rows.
pub async fn import(
    Extension(auth_user): Extension<AuthUser>,
    Json(payload): Json<ImportRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let organization_id = auth_user.require_organization()?;
    if payload.records.is_empty() {
        return Err(ApiError::field_error("records", "No records supplied"));
    }
    for record in &payload.records {
        if !record.email.contains('@') {
            return Err(ApiError::field_error(
                "records",
                format!("Invalid email: {}", record.email),
            ));
        }
    }

    let pool = database::pool().await?;
    let outcome = enrollment::import_employees(&pool, organization_id, payload.records).await?;
    if outcome.new_employee_ids.is_empty() {
        return Err(ApiError::field_error("file", "No new employees added"));
    }

    let mut employees = Vec::new();
    for employee_id in outcome.new_employee_ids {
        employees.push(employee_json(&pool, employee_id).await?);
    }
    Ok(ok(json!({ "employees": employees })))
}

async fn employee_json(pool: &sqlx::PgPool, employee_id: Uuid) -> Result<serde_json::Value, ApiError> {
    let row: Option<EmployeeRow> = sqlx::query_as(
        "SELECT u.id, u.email, u.last_login, ep.first_name, ep.last_name, ep.status, \
                d.name AS department, ep.security_score \
         FROM users u \
         JOIN employee_profiles ep ON ep.employee_id = u.id \
         LEFT JOIN departments d ON d.id = ep.department_id \
         WHERE u.id = $1",
    )
    .bind(employee_id)
    .fetch_optional(pool)
    .await?;
    row.map(|r| json!(r))
        .ok_or_else(|| ApiError::not_found("Employee not found"))
}
