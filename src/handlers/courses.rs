use axum::extract::{Path, Query};
use axum::response::IntoResponse;
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::database;
use crate::error::ApiError;
use crate::middleware::AuthUser;
use crate::models::{ActivityKind, Content, Course, LearningType, Question, QuestionOption, Role, UserCourse};
use crate::services::learning;

use super::{ok, ok_message};

/// Resolve the organization whose courses the caller may see.
async fn caller_organization_id(
    pool: &sqlx::PgPool,
    auth_user: &AuthUser,
) -> Result<Option<Uuid>, ApiError> {
    match auth_user.role {
        Role::Organization => Ok(Some(auth_user.user_id)),
        Role::Employee => {
            let organization_id: Option<Uuid> = sqlx::query_scalar(
                "SELECT organization_id FROM employee_profiles WHERE employee_id = $1",
            )
            .bind(auth_user.user_id)
            .fetch_optional(pool)
            .await?;
            Ok(organization_id)
        }
        Role::Admin => Ok(None),
    }
}

async fn fetch_visible_course(
    pool: &sqlx::PgPool,
    auth_user: &AuthUser,
    course_id: Uuid,
) -> Result<Course, ApiError> {
    let organization_id = caller_organization_id(pool, auth_user).await?;
    let course: Option<Course> = sqlx::query_as(
        "SELECT * FROM courses WHERE id = $1 \
           AND (is_public = TRUE OR $2::uuid IS NULL OR organization_id = $2)",
    )
    .bind(course_id)
    .bind(organization_id)
    .fetch_optional(pool)
    .await?;
    course.ok_or_else(|| ApiError::not_found("Course not found"))
}

async fn course_summary(pool: &sqlx::PgPool, course: &Course) -> Result<serde_json::Value, ApiError> {
    let material_count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM course_contents WHERE course_id = $1")
            .bind(course.id)
            .fetch_one(pool)
            .await?;
    let quiz_count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM course_contents cc \
         WHERE cc.course_id = $1 \
           AND EXISTS (SELECT 1 FROM questions q WHERE q.content_id = cc.content_id)",
    )
    .bind(course.id)
    .fetch_one(pool)
    .await?;
    let questions_count = learning::course_questions_count(pool, course.id).await?;
    let duration_secs: Option<i64> = sqlx::query_scalar(
        "SELECT SUM(c.duration_secs)::bigint FROM contents c \
         JOIN course_contents cc ON cc.content_id = c.id WHERE cc.course_id = $1",
    )
    .bind(course.id)
    .fetch_one(pool)
    .await?;

    Ok(json!({
        "id": course.id,
        "name": course.name,
        "description": course.description,
        "learning_type": course.learning_type,
        "thumbnail": course.thumbnail,
        "material_count": material_count,
        "quiz_count": quiz_count,
        "questions_count": questions_count,
        "duration_secs": duration_secs.unwrap_or(0),
    }))
}

#[derive(Debug, Deserialize)]
pub struct CourseListQuery {
    pub learning_type: Option<LearningType>,
}

/// GET /api/courses
pub async fn list(
    Extension(auth_user): Extension<AuthUser>,
    Query(query): Query<CourseListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let pool = database::pool().await?;
    let organization_id = caller_organization_id(&pool, &auth_user).await?;

    let courses: Vec<Course> = sqlx::query_as(
        "SELECT * FROM courses \
         WHERE (is_public = TRUE OR $1::uuid IS NULL OR organization_id = $1) \
           AND ($2::text IS NULL OR learning_type = $2) \
         ORDER BY created_at DESC",
    )
    .bind(organization_id)
    .bind(query.learning_type.map(|t| t.as_str()))
    .fetch_all(&pool)
    .await?;

    let mut out = Vec::new();
    for course in &courses {
        out.push(course_summary(&pool, course).await?);
    }
    Ok(ok(json!(out)))
}

/// GET /api/courses/:id
pub async fn detail(
    Extension(auth_user): Extension<AuthUser>,
    Path(course_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let pool = database::pool().await?;
    let course = fetch_visible_course(&pool, &auth_user, course_id).await?;

    let mut payload = course_summary(&pool, &course).await?;

    let user_course: Option<UserCourse> =
        sqlx::query_as("SELECT * FROM user_courses WHERE user_id = $1 AND course_id = $2")
            .bind(auth_user.user_id)
            .bind(course.id)
            .fetch_optional(&pool)
            .await?;
    payload["is_started"] = json!(user_course.as_ref().map(|uc| uc.is_started).unwrap_or(false));
    payload["is_completed"] = json!(user_course.as_ref().map(|uc| uc.is_completed).unwrap_or(false));
    payload["course_progression"] = json!(match user_course {
        Some(_) => learning::self_paced_progress(&pool, auth_user.user_id, course.id).await?,
        None => 0,
    });

    let contents: Vec<Content> = sqlx::query_as(
        "SELECT c.* FROM contents c \
         JOIN course_contents cc ON cc.content_id = c.id \
         WHERE cc.course_id = $1 ORDER BY cc.position",
    )
    .bind(course.id)
    .fetch_all(&pool)
    .await?;
    payload["course_contents"] = json!(contents);

    Ok(ok(payload))
}

/// PATCH /api/courses/:id/start
pub async fn start(
    Extension(auth_user): Extension<AuthUser>,
    Path(course_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let pool = database::pool().await?;
    let course = fetch_visible_course(&pool, &auth_user, course_id).await?;

    sqlx::query(
        "INSERT INTO user_courses (id, user_id, course_id, started_at, is_started) \
         VALUES (gen_random_uuid(), $1, $2, NOW(), TRUE) \
         ON CONFLICT (user_id, course_id) DO UPDATE SET is_started = TRUE, updated_at = NOW()",
    )
    .bind(auth_user.user_id)
    .bind(course.id)
    .execute(&pool)
    .await?;

    if auth_user.role == Role::Employee {
        learning::perform_activity(&pool, auth_user.user_id, ActivityKind::CourseStarted).await?;
    }
    Ok(ok_message("Course started"))
}

/// PATCH /api/courses/:id/complete - requires every content completed.
pub async fn complete(
    Extension(auth_user): Extension<AuthUser>,
    Path(course_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let pool = database::pool().await?;
    let course = fetch_visible_course(&pool, &auth_user, course_id).await?;

    let user_course: Option<UserCourse> =
        sqlx::query_as("SELECT * FROM user_courses WHERE user_id = $1 AND course_id = $2")
            .bind(auth_user.user_id)
            .bind(course.id)
            .fetch_optional(&pool)
            .await?;
    if user_course.is_none() {
        return Err(ApiError::bad_request(
            "You have to start the course before completing it",
        ));
    }

    let incomplete: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM course_contents cc \
         WHERE cc.course_id = $1 AND NOT EXISTS ( \
           SELECT 1 FROM completed_contents done \
           WHERE done.user_id = $2 AND done.course_id = $1 AND done.content_id = cc.content_id)",
    )
    .bind(course.id)
    .bind(auth_user.user_id)
    .fetch_one(&pool)
    .await?;
    if incomplete > 0 {
        return Err(ApiError::bad_request(
            "Complete all contents to complete the course",
        ));
    }

    sqlx::query(
        "UPDATE user_courses SET is_completed = TRUE, completed_at = NOW(), updated_at = NOW() \
         WHERE user_id = $1 AND course_id = $2",
    )
    .bind(auth_user.user_id)
    .bind(course.id)
    .execute(&pool)
    .await?;

    if auth_user.role == Role::Employee {
        learning::perform_activity(&pool, auth_user.user_id, ActivityKind::CourseCompleted).await?;
    }

    Ok(ok(json!({
        "score": learning::self_paced_score(&pool, auth_user.user_id, course.id).await?,
        "question_count": learning::course_questions_count(&pool, course.id).await?,
    })))
}

/// PATCH /api/courses/:id/retake
pub async fn retake(
    Extension(auth_user): Extension<AuthUser>,
    Path(course_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let pool = database::pool().await?;
    let course = fetch_visible_course(&pool, &auth_user, course_id).await?;

    let attempted: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM user_courses WHERE user_id = $1 AND course_id = $2)",
    )
    .bind(auth_user.user_id)
    .bind(course.id)
    .fetch_one(&pool)
    .await?;
    if !attempted {
        return Err(ApiError::bad_request("You have not started/completed this course"));
    }

    learning::retake_course(&pool, auth_user.user_id, course.id).await?;
    Ok(ok_message("Course reset"))
}

/// GET /api/courses/:id/performance - answered-question snapshots + score.
pub async fn performance(
    Extension(auth_user): Extension<AuthUser>,
    Path(course_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let pool = database::pool().await?;
    let course = fetch_visible_course(&pool, &auth_user, course_id).await?;

    let answers: Vec<(serde_json::Value, serde_json::Value)> = sqlx::query_as(
        "SELECT question_snapshot, answers_snapshot FROM answered_questions \
         WHERE user_id = $1 AND course_id = $2 ORDER BY created_at",
    )
    .bind(auth_user.user_id)
    .bind(course.id)
    .fetch_all(&pool)
    .await?;

    Ok(ok(json!({
        "score": learning::self_paced_score(&pool, auth_user.user_id, course.id).await?,
        "question_count": learning::course_questions_count(&pool, course.id).await?,
        "answers": answers.into_iter().map(|(question, selected_answers)| json!({
            "question": question,
            "selected_answers": selected_answers,
        })).collect::<Vec<_>>(),
    })))
}

// --- contents ----------------------------------------------------------------

async fn fetch_course_content(
    pool: &sqlx::PgPool,
    course_id: Uuid,
    content_id: Uuid,
) -> Result<Content, ApiError> {
    let content: Option<Content> = sqlx::query_as(
        "SELECT c.* FROM contents c \
         JOIN course_contents cc ON cc.content_id = c.id \
         WHERE cc.course_id = $1 AND c.id = $2",
    )
    .bind(course_id)
    .bind(content_id)
    .fetch_optional(pool)
    .await?;
    content.ok_or_else(|| ApiError::not_found("Content not found"))
}

/// GET /api/courses/:id/contents
pub async fn list_contents(
    Extension(auth_user): Extension<AuthUser>,
    Path(course_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let pool = database::pool().await?;
    let course = fetch_visible_course(&pool, &auth_user, course_id).await?;

    let contents: Vec<Content> = sqlx::query_as(
        "SELECT c.* FROM contents c \
         JOIN course_contents cc ON cc.content_id = c.id \
         WHERE cc.course_id = $1 ORDER BY cc.position",
    )
    .bind(course.id)
    .fetch_all(&pool)
    .await?;
    Ok(ok(json!(contents)))
}

/// GET /api/courses/:id/contents/:content_id - content with its questions.
pub async fn content_detail(
    Extension(auth_user): Extension<AuthUser>,
    Path((course_id, content_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
    let pool = database::pool().await?;
    let course = fetch_visible_course(&pool, &auth_user, course_id).await?;
    let content = fetch_course_content(&pool, course.id, content_id).await?;

    let questions: Vec<Question> =
        sqlx::query_as("SELECT * FROM questions WHERE content_id = $1 ORDER BY created_at")
            .bind(content.id)
            .fetch_all(&pool)
            .await?;
    let mut question_payloads = Vec::new();
    for question in &questions {
        let options: Vec<QuestionOption> = sqlx::query_as(
            "SELECT * FROM question_options WHERE question_id = $1 ORDER BY created_at",
        )
        .bind(question.id)
        .fetch_all(&pool)
        .await?;
        question_payloads.push(json!({
            "id": question.id,
            "text": question.text,
            "type": question.kind,
            "options": options.iter().map(|o| json!({ "id": o.id, "text": o.text })).collect::<Vec<_>>(),
        }));
    }

    let is_completed: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM completed_contents \
         WHERE user_id = $1 AND course_id = $2 AND content_id = $3)",
    )
    .bind(auth_user.user_id)
    .bind(course.id)
    .bind(content.id)
    .fetch_one(&pool)
    .await?;

    let mut payload = json!(content);
    payload["questions"] = json!(question_payloads);
    payload["is_completed"] = json!(is_completed);
    Ok(ok(payload))
}

/// PATCH /api/courses/:id/contents/:content_id/complete
pub async fn complete_content(
    Extension(auth_user): Extension<AuthUser>,
    Path((course_id, content_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
    let pool = database::pool().await?;
    let course = fetch_visible_course(&pool, &auth_user, course_id).await?;
    let content = fetch_course_content(&pool, course.id, content_id).await?;

    learning::complete_content(&pool, auth_user.user_id, course.id, content.id).await?;
    Ok(ok_message("Content completed"))
}

#[derive(Debug, Deserialize)]
pub struct AnswerRequest {
    pub answer_ids: Vec<Uuid>,
}

/// PATCH /api/courses/:id/contents/:content_id/questions/:question_id/answer
pub async fn answer_question(
    Extension(auth_user): Extension<AuthUser>,
    Path((course_id, content_id, question_id)): Path<(Uuid, Uuid, Uuid)>,
    Json(payload): Json<AnswerRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let pool = database::pool().await?;
    let course = fetch_visible_course(&pool, &auth_user, course_id).await?;
    let content = fetch_course_content(&pool, course.id, content_id).await?;

    let (question, all_options, chosen) =
        load_question_options(&pool, content.id, question_id, &payload.answer_ids).await?;

    let is_correct = learning::answer_course_question(
        &pool,
        auth_user.user_id,
        course.id,
        content.id,
        &question,
        &all_options,
        &chosen,
    )
    .await?;
    Ok(ok(json!({ "is_correct": is_correct })))
}

/// Validate that the question belongs to the content and the chosen options
/// belong to the question.
pub(crate) async fn load_question_options(
    pool: &sqlx::PgPool,
    content_id: Uuid,
    question_id: Uuid,
    answer_ids: &[Uuid],
) -> Result<(Question, Vec<QuestionOption>, Vec<QuestionOption>), ApiError> {
    let question: Option<Question> =
        sqlx::query_as("SELECT * FROM questions WHERE id = $1 AND content_id = $2")
            .bind(question_id)
            .bind(content_id)
            .fetch_optional(pool)
            .await?;
    let question = question.ok_or_else(|| ApiError::not_found("Question not found"))?;

    let all_options: Vec<QuestionOption> =
        sqlx::query_as("SELECT * FROM question_options WHERE question_id = $1 ORDER BY created_at")
            .bind(question.id)
            .fetch_all(pool)
            .await?;

    let chosen: Vec<QuestionOption> = all_options
        .iter()
        .filter(|option| answer_ids.contains(&option.id))
        .cloned()
        .collect();
    if chosen.len() != answer_ids.len() {
        return Err(ApiError::bad_request("Invalid answer options"));
    }
    Ok((question, all_options, chosen))
}
