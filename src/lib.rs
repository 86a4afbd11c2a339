pub mod auth;
pub mod config;
pub mod database;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod tasks;

use axum::{routing::get, Router};
use serde_json::{json, Value};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::middleware::jwt_auth_middleware;

pub fn app() -> Router {
    Router::new()
        // Public
        .route("/", get(root))
        .route("/health", get(health))
        .merge(public_routes())
        // Protected API
        .merge(protected_routes().route_layer(axum::middleware::from_fn(jwt_auth_middleware)))
        // Global middleware
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

fn public_routes() -> Router {
    use axum::routing::{patch, post};
    use handlers::{employee_portal, phishing, users};

    Router::new()
        // Organization onboarding + sessions
        .route("/api/users/register", post(users::register_step1))
        .route("/api/users/verify-token", post(users::verify_token))
        .route("/api/users/register-2", post(users::register_step2))
        .route(
            "/api/users/resend-activation-link",
            post(users::resend_activation_link),
        )
        .route("/api/users/login", post(users::login))
        .route("/api/users/forgot-password", post(users::forgot_password))
        .route("/api/users/reset-password/:token", patch(users::reset_password))
        // Invited employees finish their registration from the email link
        .route(
            "/api/employee/:token/complete-registration",
            get(employee_portal::registration_details)
                .patch(employee_portal::complete_registration),
        )
        // Token-keyed verification callbacks
        .route(
            "/api/users/settings/authorized-domains/:id/verify",
            post(users::verify_authorized_domain),
        )
        .route(
            "/api/users/settings/deliverability-test/:id/verify",
            post(users::verify_deliverability_test),
        )
        // Phishing funnel callbacks, keyed by the per-employee record id
        .route("/api/phishing/campaigns/:id/opened", patch(phishing::record_opened))
        .route("/api/phishing/campaigns/:id/clicked", patch(phishing::record_clicked))
        .route(
            "/api/phishing/campaigns/:id/compromised",
            patch(phishing::record_compromised),
        )
        .route(
            "/api/phishing/campaigns/:id/reported",
            patch(phishing::record_reported),
        )
}

fn protected_routes() -> Router {
    Router::new()
        .merge(user_routes())
        .merge(campaign_routes())
        .merge(course_routes())
        .merge(employee_routes())
        .merge(phishing_routes())
}

fn user_routes() -> Router {
    use axum::routing::{patch, post};
    use handlers::{departments, employees_admin, users};

    Router::new()
        .route("/api/users/profile", get(users::organization_profile))
        .route("/api/users/dashboard", get(users::organization_dashboard))
        .route("/api/users/change-password", patch(users::change_password))
        .route(
            "/api/users/phishing-permission-check",
            get(users::phishing_permission_check),
        )
        // Settings
        .route(
            "/api/users/settings/cut-off-score",
            get(users::get_cut_off_score).patch(users::set_cut_off_score),
        )
        .route(
            "/api/users/settings/enrollment-notifications",
            get(users::get_notification_settings).patch(users::update_notification_settings),
        )
        .route(
            "/api/users/settings/phishing-report-email",
            get(users::get_phishing_report_email).patch(users::set_phishing_report_email),
        )
        .route("/api/users/settings/allowlisting", get(users::allowlisting_settings))
        .route(
            "/api/users/settings/authorized-domains",
            get(users::list_authorized_domains).post(users::create_authorized_domain),
        )
        .route(
            "/api/users/settings/authorized-domains/:id",
            get(users::get_authorized_domain).delete(users::delete_authorized_domain),
        )
        .route(
            "/api/users/settings/authorized-domains/:id/resend-verification",
            post(users::resend_domain_verification),
        )
        .route(
            "/api/users/settings/deliverability-test",
            get(users::list_deliverability_tests).post(users::create_deliverability_test),
        )
        .route(
            "/api/users/settings/deliverability-test/:id",
            get(users::get_deliverability_test),
        )
        // Employees administration
        .route("/api/users/add-employee", post(employees_admin::add_employee))
        .route("/api/users/employees", get(employees_admin::list))
        .route(
            "/api/users/employees-paginated",
            get(employees_admin::list_paginated),
        )
        .route(
            "/api/users/employees/deactivate",
            post(employees_admin::deactivate),
        )
        .route("/api/users/employees/:id", patch(employees_admin::update))
        .route("/api/users/user-file-import", post(employees_admin::import))
        // Departments
        .route(
            "/api/users/departments",
            get(departments::list).post(departments::create),
        )
        .route("/api/users/departments/delete", post(departments::bulk_delete))
        .route(
            "/api/users/departments/:id",
            get(departments::detail)
                .patch(departments::update)
                .delete(departments::delete),
        )
}

fn campaign_routes() -> Router {
    use axum::routing::{patch, post};
    use handlers::campaigns;

    Router::new()
        .route("/api/campaigns/create/course", post(campaigns::create_course_step1))
        .route(
            "/api/campaigns/create/phishing",
            post(campaigns::create_phishing_step1),
        )
        .route(
            "/api/campaigns/course-campaigns/:id/edit/1",
            patch(campaigns::update_course_step1),
        )
        .route(
            "/api/campaigns/phishing-campaigns/:id/edit/1",
            patch(campaigns::update_phishing_step1),
        )
        .route("/api/campaigns/:id/edit/2", patch(campaigns::update_step2))
        .route(
            "/api/campaigns/course-campaigns/:id/edit/3",
            patch(campaigns::update_course_step3),
        )
        .route(
            "/api/campaigns/phishing-campaigns/:id/edit/3",
            patch(campaigns::update_phishing_step3),
        )
        .route("/api/campaigns/:id/submit", patch(campaigns::submit))
        .route("/api/campaigns", get(campaigns::list))
        .route(
            "/api/campaigns/:id",
            get(campaigns::detail).delete(campaigns::delete),
        )
        .route(
            "/api/campaigns/:id/preview/employees",
            get(campaigns::preview_employees),
        )
        .route("/api/campaigns/:id/cancel", patch(campaigns::cancel))
        .route(
            "/api/campaigns/:id/learning-metrics",
            get(campaigns::learning_metrics),
        )
        .route(
            "/api/campaigns/:id/phishing-metrics",
            get(campaigns::phishing_metrics),
        )
        .route(
            "/api/campaigns/:id/phishing-metrics/:template_id",
            get(campaigns::phishing_metrics_for_template),
        )
}

fn course_routes() -> Router {
    use axum::routing::patch;
    use handlers::courses;

    Router::new()
        .route("/api/courses", get(courses::list))
        .route("/api/courses/:course_id", get(courses::detail))
        .route("/api/courses/:course_id/start", patch(courses::start))
        .route("/api/courses/:course_id/complete", patch(courses::complete))
        .route("/api/courses/:course_id/retake", patch(courses::retake))
        .route("/api/courses/:course_id/performance", get(courses::performance))
        .route("/api/courses/:course_id/contents", get(courses::list_contents))
        .route(
            "/api/courses/:course_id/contents/:content_id",
            get(courses::content_detail),
        )
        .route(
            "/api/courses/:course_id/contents/:content_id/complete",
            patch(courses::complete_content),
        )
        .route(
            "/api/courses/:course_id/contents/:content_id/questions/:question_id/answer",
            patch(courses::answer_question),
        )
}

fn employee_routes() -> Router {
    use axum::routing::patch;
    use handlers::employee_portal;

    Router::new()
        .route("/api/employee/profile", get(employee_portal::profile))
        .route("/api/employee/dashboard", get(employee_portal::dashboard))
        .route(
            "/api/employee/dashboard/learning-resources",
            get(employee_portal::learning_resources),
        )
        .route("/api/employee/campaigns", get(employee_portal::campaign_list))
        .route(
            "/api/employee/campaigns/count",
            get(employee_portal::campaign_count),
        )
        .route(
            "/api/employee/campaigns/:campaign_id",
            get(employee_portal::campaign_detail),
        )
        .route(
            "/api/employee/campaigns/:campaign_id/start",
            patch(employee_portal::start_campaign),
        )
        .route(
            "/api/employee/campaigns/:campaign_id/courses/:course_id/contents/:content_id/questions/:question_id/answer",
            patch(employee_portal::answer_campaign_question),
        )
        .route(
            "/api/employee/campaigns/:campaign_id/courses/:course_id/contents/:content_id/complete",
            patch(employee_portal::complete_campaign_content),
        )
        .route(
            "/api/employee/campaigns/:campaign_id/complete",
            patch(employee_portal::complete_campaign),
        )
}

fn phishing_routes() -> Router {
    use handlers::phishing;

    Router::new()
        .route("/api/phishing/templates", get(phishing::list_templates))
        .route("/api/phishing/templates/:id", get(phishing::template_detail))
}

async fn root() -> axum::response::Json<Value> {
    let version = env!("CARGO_PKG_VERSION");

    axum::response::Json(json!({
        "success": true,
        "data": {
            "name": "Rampart API",
            "version": version,
            "description": "Security-awareness training backend built with Rust (Axum)",
            "endpoints": {
                "home": "/ (public)",
                "users": "/api/users/* (registration + sessions public, rest protected)",
                "campaigns": "/api/campaigns/* (organization)",
                "courses": "/api/courses/* (protected)",
                "employee": "/api/employee/* (employee portal)",
                "phishing": "/api/phishing/* (templates protected, funnel callbacks public)",
            },
        }
    }))
}

async fn health() -> impl axum::response::IntoResponse {
    let now = chrono::Utc::now();

    match database::health_check().await {
        Ok(_) => (
            axum::http::StatusCode::OK,
            axum::response::Json(json!({
                "success": true,
                "data": { "status": "ok", "timestamp": now, "database": "ok" }
            })),
        ),
        Err(e) => (
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            axum::response::Json(json!({
                "success": false,
                "error": "database unavailable",
                "data": { "status": "degraded", "timestamp": now, "database_error": e.to_string() }
            })),
        ),
    }
}
