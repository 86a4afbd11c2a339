use axum::extract::{Path, Query};
use axum::response::IntoResponse;
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::database;
use crate::error::ApiError;
use crate::middleware::AuthUser;
use crate::models::Department;

use super::{ok, ok_message};

#[derive(Debug, Deserialize)]
pub struct DepartmentListQuery {
    /// Optional name filter
    pub name: Option<String>,
}

/// GET /api/users/departments
pub async fn list(
    Extension(auth_user): Extension<AuthUser>,
    Query(query): Query<DepartmentListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let organization_id = auth_user.require_organization()?;
    let pool = database::pool().await?;

    let departments: Vec<(Uuid, String, i64)> = sqlx::query_as(
        "SELECT d.id, d.name, COUNT(ep.id) \
         FROM departments d \
         LEFT JOIN employee_profiles ep ON ep.department_id = d.id \
         WHERE d.organization_id = $1 AND ($2::text IS NULL OR d.name ILIKE '%' || $2 || '%') \
         GROUP BY d.id, d.name ORDER BY d.name",
    )
    .bind(organization_id)
    .bind(query.name.map(|n| n.to_lowercase()))
    .fetch_all(&pool)
    .await?;

    Ok(ok(json!(departments
        .into_iter()
        .map(|(id, name, num_employees)| json!({
            "id": id,
            "name": name,
            "num_employees": num_employees,
        }))
        .collect::<Vec<_>>())))
}

#[derive(Debug, Deserialize)]
pub struct DepartmentRequest {
    pub name: String,
}

/// POST /api/users/departments
pub async fn create(
    Extension(auth_user): Extension<AuthUser>,
    Json(payload): Json<DepartmentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let organization_id = auth_user.require_organization()?;
    let name = payload.name.trim().to_lowercase();
    if name.is_empty() {
        return Err(ApiError::field_error("name", "Department name is required"));
    }
    let pool = database::pool().await?;

    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM departments WHERE organization_id = $1 AND name = $2)",
    )
    .bind(organization_id)
    .bind(&name)
    .fetch_one(&pool)
    .await?;
    if exists {
        return Err(ApiError::bad_request("Department already exists"));
    }

    let id: Uuid = sqlx::query_scalar(
        "INSERT INTO departments (id, organization_id, name) \
         VALUES (gen_random_uuid(), $1, $2) RETURNING id",
    )
    .bind(organization_id)
    .bind(&name)
    .fetch_one(&pool)
    .await?;

    Ok(ok(json!({ "id": id, "name": name })))
}

/// GET /api/users/departments/:id
pub async fn detail(
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let organization_id = auth_user.require_organization()?;
    let pool = database::pool().await?;
    let department = fetch_department(&pool, id, organization_id).await?;
    let num_employees: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM employee_profiles WHERE department_id = $1")
            .bind(department.id)
            .fetch_one(&pool)
            .await?;
    Ok(ok(json!({
        "id": department.id,
        "name": department.name,
        "num_employees": num_employees,
    })))
}

/// PATCH /api/users/departments/:id
pub async fn update(
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DepartmentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let organization_id = auth_user.require_organization()?;
    let pool = database::pool().await?;
    let department = fetch_department(&pool, id, organization_id).await?;

    let name = payload.name.trim().to_lowercase();
    sqlx::query("UPDATE departments SET name = $1, updated_at = NOW() WHERE id = $2")
        .bind(&name)
        .bind(department.id)
        .execute(&pool)
        .await?;
    Ok(ok(json!({ "id": department.id, "name": name })))
}

/// DELETE /api/users/departments/:id
pub async fn delete(
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let organization_id = auth_user.require_organization()?;
    let pool = database::pool().await?;
    let department = fetch_department(&pool, id, organization_id).await?;
    sqlx::query("DELETE FROM departments WHERE id = $1")
        .bind(department.id)
        .execute(&pool)
        .await?;
    Ok(ok_message("Department deleted"))
}

#[derive(Debug, Deserialize)]
pub struct BulkDeleteRequest {
    pub ids: Vec<Uuid>,
}

/// POST /api/users/departments/delete
pub async fn bulk_delete(
    Extension(auth_user): Extension<AuthUser>,
    Json(payload): Json<BulkDeleteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let organization_id = auth_user.require_organization()?;
    let pool = database::pool().await?;

    let deleted = sqlx::query("DELETE FROM departments WHERE organization_id = $1 AND id = ANY($2)")
        .bind(organization_id)
        .bind(&payload.ids)
        .execute(&pool)
        .await?;
    if deleted.rows_affected() == 0 {
        return Err(ApiError::bad_request("Departments do not exist"));
    }
    Ok(ok_message("Departments Deactivated Successfully"))
}

async fn fetch_department(
    pool: &sqlx::PgPool,
    id: Uuid,
    organization_id: Uuid,
) -> Result<Department, ApiError> {
    let department: Option<Department> =
        sqlx::query_as("SELECT * FROM departments WHERE id = $1 AND organization_id = $2")
            .bind(id)
            .bind(organization_id)
            .fetch_optional(pool)
            .await?;
    department.ok_or_else(|| ApiError::not_found("Department not found"))
}
