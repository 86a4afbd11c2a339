use chrono::Utc;
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::DatabaseError;
use crate::models::{ActivityKind, Question, QuestionOption};

/// Denominator of a course's progress: every question plus every content
/// that has no questions (those are completed explicitly).
async fn course_progress_total(pool: &PgPool, course_id: Uuid) -> Result<i64, DatabaseError> {
    let questions: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM questions q \
         JOIN course_contents cc ON cc.content_id = q.content_id \
         WHERE cc.course_id = $1",
    )
    .bind(course_id)
    .fetch_one(pool)
    .await?;

    let questionless_contents: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM course_contents cc \
         WHERE cc.course_id = $1 \
           AND NOT EXISTS (SELECT 1 FROM questions q WHERE q.content_id = cc.content_id)",
    )
    .bind(course_id)
    .fetch_one(pool)
    .await?;

    Ok(questions + questionless_contents)
}

pub async fn course_questions_count(pool: &PgPool, course_id: Uuid) -> Result<i64, DatabaseError> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM questions q \
         JOIN course_contents cc ON cc.content_id = q.content_id \
         WHERE cc.course_id = $1",
    )
    .bind(course_id)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

fn to_rate(answered: i64, total: i64) -> i32 {
    if total == 0 {
        0
    } else {
        ((answered as f64 / total as f64) * 100.0) as i32
    }
}

/// Self-paced progress through a course, as an integer percentage.
pub async fn self_paced_progress(
    pool: &PgPool,
    user_id: Uuid,
    course_id: Uuid,
) -> Result<i32, DatabaseError> {
    let total = course_progress_total(pool, course_id).await?;

    let answered: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM answered_questions WHERE user_id = $1 AND course_id = $2",
    )
    .bind(user_id)
    .bind(course_id)
    .fetch_one(pool)
    .await?;

    let completed_questionless: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM completed_contents c \
         WHERE c.user_id = $1 AND c.course_id = $2 \
           AND NOT EXISTS (SELECT 1 FROM questions q WHERE q.content_id = c.content_id)",
    )
    .bind(user_id)
    .bind(course_id)
    .fetch_one(pool)
    .await?;

    Ok(to_rate(answered + completed_questionless, total))
}

/// Correct answers over question count, as an integer percentage.
pub async fn self_paced_score(
    pool: &PgPool,
    user_id: Uuid,
    course_id: Uuid,
) -> Result<i32, DatabaseError> {
    let questions = course_questions_count(pool, course_id).await?;
    let correct: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM answered_questions \
         WHERE user_id = $1 AND course_id = $2 AND is_correct = TRUE",
    )
    .bind(user_id)
    .bind(course_id)
    .fetch_one(pool)
    .await?;
    Ok(to_rate(correct, questions))
}

/// Campaign-scoped progress through one course.
pub async fn campaign_course_progress(
    pool: &PgPool,
    employee_id: Uuid,
    course_campaign_id: Uuid,
    course_id: Uuid,
) -> Result<i32, DatabaseError> {
    let total = course_progress_total(pool, course_id).await?;

    let answered: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM answered_campaign_questions \
         WHERE employee_id = $1 AND course_campaign_id = $2 AND course_id = $3",
    )
    .bind(employee_id)
    .bind(course_campaign_id)
    .bind(course_id)
    .fetch_one(pool)
    .await?;

    let completed_questionless: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM completed_campaign_contents c \
         WHERE c.employee_id = $1 AND c.course_campaign_id = $2 AND c.course_id = $3 \
           AND NOT EXISTS (SELECT 1 FROM questions q WHERE q.content_id = c.content_id)",
    )
    .bind(employee_id)
    .bind(course_campaign_id)
    .bind(course_id)
    .fetch_one(pool)
    .await?;

    Ok(to_rate(answered + completed_questionless, total))
}

/// Campaign-scoped score for one course.
pub async fn campaign_course_score(
    pool: &PgPool,
    employee_id: Uuid,
    course_campaign_id: Uuid,
    course_id: Uuid,
) -> Result<i32, DatabaseError> {
    let questions = course_questions_count(pool, course_id).await?;
    let correct: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM answered_campaign_questions \
         WHERE employee_id = $1 AND course_campaign_id = $2 AND course_id = $3 \
           AND is_correct = TRUE",
    )
    .bind(employee_id)
    .bind(course_campaign_id)
    .bind(course_id)
    .fetch_one(pool)
    .await?;
    Ok(to_rate(correct, questions))
}

pub async fn campaign_course_ids(
    pool: &PgPool,
    course_campaign_id: Uuid,
) -> Result<Vec<Uuid>, DatabaseError> {
    let ids: Vec<Uuid> = sqlx::query_scalar(
        "SELECT course_id FROM course_campaign_courses WHERE course_campaign_id = $1",
    )
    .bind(course_campaign_id)
    .fetch_all(pool)
    .await?;
    Ok(ids)
}

/// Average progress of one employee across all the campaign's courses.
pub async fn employee_campaign_progress(
    pool: &PgPool,
    employee_id: Uuid,
    course_campaign_id: Uuid,
) -> Result<i32, DatabaseError> {
    let course_ids = campaign_course_ids(pool, course_campaign_id).await?;
    if course_ids.is_empty() {
        return Ok(0);
    }
    let mut sum = 0i64;
    for course_id in &course_ids {
        sum += campaign_course_progress(pool, employee_id, course_campaign_id, *course_id).await?
            as i64;
    }
    Ok((sum / course_ids.len() as i64) as i32)
}

/// Average score of one employee across all the campaign's courses.
pub async fn employee_campaign_average_score(
    pool: &PgPool,
    employee_id: Uuid,
    course_campaign_id: Uuid,
) -> Result<f64, DatabaseError> {
    let course_ids = campaign_course_ids(pool, course_campaign_id).await?;
    if course_ids.is_empty() {
        return Ok(0.0);
    }
    let mut sum = 0.0;
    for course_id in &course_ids {
        sum += campaign_course_score(pool, employee_id, course_campaign_id, *course_id).await?
            as f64;
    }
    Ok(sum / course_ids.len() as f64)
}

/// Average progress across every enrolled employee.
pub async fn course_campaign_progress_rate(
    pool: &PgPool,
    course_campaign_id: Uuid,
) -> Result<i32, DatabaseError> {
    let employee_ids: Vec<Uuid> = sqlx::query_scalar(
        "SELECT employee_id FROM employee_course_campaigns WHERE course_campaign_id = $1",
    )
    .bind(course_campaign_id)
    .fetch_all(pool)
    .await?;
    if employee_ids.is_empty() {
        return Ok(0);
    }
    let mut sum = 0i64;
    for employee_id in &employee_ids {
        sum += employee_campaign_progress(pool, *employee_id, course_campaign_id).await? as i64;
    }
    Ok((sum / employee_ids.len() as i64) as i32)
}

pub async fn course_campaign_average_score(
    pool: &PgPool,
    course_campaign_id: Uuid,
) -> Result<f64, DatabaseError> {
    let employee_ids: Vec<Uuid> = sqlx::query_scalar(
        "SELECT employee_id FROM employee_course_campaigns WHERE course_campaign_id = $1",
    )
    .bind(course_campaign_id)
    .fetch_all(pool)
    .await?;
    if employee_ids.is_empty() {
        return Ok(0.0);
    }
    let mut sum = 0.0;
    for employee_id in &employee_ids {
        sum += employee_campaign_average_score(pool, *employee_id, course_campaign_id).await?;
    }
    Ok(sum / employee_ids.len() as f64)
}

/// All chosen options must be correct ones; choosing fewer than every
/// correct option still counts.
pub fn answers_are_correct(chosen: &[QuestionOption]) -> bool {
    !chosen.is_empty() && chosen.iter().all(|option| option.is_correct)
}

pub fn snapshot_question(question: &Question, options: &[QuestionOption]) -> serde_json::Value {
    json!({
        "id": question.id,
        "text": question.text,
        "type": question.kind,
        "options": options.iter().map(|o| json!({
            "id": o.id,
            "text": o.text,
            "is_correct": o.is_correct,
        })).collect::<Vec<_>>(),
    })
}

pub fn snapshot_answers(chosen: &[QuestionOption]) -> serde_json::Value {
    json!(chosen
        .iter()
        .map(|o| json!({ "id": o.id, "text": o.text, "is_correct": o.is_correct }))
        .collect::<Vec<_>>())
}

/// Record an answer in the self-paced flow, then complete the content when
/// every one of its questions has been answered.
pub async fn answer_course_question(
    pool: &PgPool,
    user_id: Uuid,
    course_id: Uuid,
    content_id: Uuid,
    question: &Question,
    all_options: &[QuestionOption],
    chosen: &[QuestionOption],
) -> Result<bool, DatabaseError> {
    let is_correct = answers_are_correct(chosen);
    sqlx::query(
        "INSERT INTO answered_questions \
           (id, user_id, course_id, content_id, question_id, question_snapshot, answers_snapshot, is_correct) \
         VALUES (gen_random_uuid(), $1, $2, $3, $4, $5, $6, $7) \
         ON CONFLICT (user_id, course_id, question_id) DO UPDATE \
           SET question_snapshot = EXCLUDED.question_snapshot, \
               answers_snapshot = EXCLUDED.answers_snapshot, \
               is_correct = EXCLUDED.is_correct, \
               updated_at = NOW()",
    )
    .bind(user_id)
    .bind(course_id)
    .bind(content_id)
    .bind(question.id)
    .bind(snapshot_question(question, all_options))
    .bind(snapshot_answers(chosen))
    .bind(is_correct)
    .execute(pool)
    .await?;

    let remaining: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM questions q \
         WHERE q.content_id = $1 AND NOT EXISTS ( \
           SELECT 1 FROM answered_questions a \
           WHERE a.user_id = $2 AND a.course_id = $3 AND a.question_id = q.id)",
    )
    .bind(content_id)
    .bind(user_id)
    .bind(course_id)
    .fetch_one(pool)
    .await?;

    if remaining == 0 {
        complete_content(pool, user_id, course_id, content_id).await?;
    }
    Ok(is_correct)
}

pub async fn complete_content(
    pool: &PgPool,
    user_id: Uuid,
    course_id: Uuid,
    content_id: Uuid,
) -> Result<(), DatabaseError> {
    sqlx::query(
        "INSERT INTO completed_contents (id, user_id, course_id, content_id, completed_at) \
         VALUES (gen_random_uuid(), $1, $2, $3, NOW()) \
         ON CONFLICT (user_id, course_id, content_id) DO UPDATE SET completed_at = NOW()",
    )
    .bind(user_id)
    .bind(course_id)
    .bind(content_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Campaign-scoped mirror of `answer_course_question`; additionally
/// completes the per-employee course row once its progress hits 100%.
pub async fn answer_campaign_question(
    pool: &PgPool,
    employee_id: Uuid,
    course_campaign_id: Uuid,
    course_id: Uuid,
    content_id: Uuid,
    question: &Question,
    all_options: &[QuestionOption],
    chosen: &[QuestionOption],
) -> Result<bool, DatabaseError> {
    let is_correct = answers_are_correct(chosen);
    sqlx::query(
        "INSERT INTO answered_campaign_questions \
           (id, employee_id, course_campaign_id, course_id, content_id, question_id, \
            question_snapshot, answers_snapshot, is_correct) \
         VALUES (gen_random_uuid(), $1, $2, $3, $4, $5, $6, $7, $8) \
         ON CONFLICT (employee_id, course_campaign_id, question_id) DO UPDATE \
           SET question_snapshot = EXCLUDED.question_snapshot, \
               answers_snapshot = EXCLUDED.answers_snapshot, \
               is_correct = EXCLUDED.is_correct, \
               updated_at = NOW()",
    )
    .bind(employee_id)
    .bind(course_campaign_id)
    .bind(course_id)
    .bind(content_id)
    .bind(question.id)
    .bind(snapshot_question(question, all_options))
    .bind(snapshot_answers(chosen))
    .bind(is_correct)
    .execute(pool)
    .await?;

    let remaining: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM questions q \
         WHERE q.content_id = $1 AND NOT EXISTS ( \
           SELECT 1 FROM answered_campaign_questions a \
           WHERE a.employee_id = $2 AND a.course_campaign_id = $3 AND a.question_id = q.id)",
    )
    .bind(content_id)
    .bind(employee_id)
    .bind(course_campaign_id)
    .fetch_one(pool)
    .await?;

    if remaining == 0 {
        complete_campaign_content(pool, employee_id, course_campaign_id, course_id, content_id)
            .await?;
    }

    if campaign_course_progress(pool, employee_id, course_campaign_id, course_id).await? >= 100 {
        sqlx::query(
            "UPDATE employee_campaign_courses \
             SET is_completed = TRUE, completed_at = NOW(), updated_at = NOW() \
             WHERE employee_id = $1 AND course_campaign_id = $2 AND course_id = $3",
        )
        .bind(employee_id)
        .bind(course_campaign_id)
        .bind(course_id)
        .execute(pool)
        .await?;
    }

    Ok(is_correct)
}

pub async fn complete_campaign_content(
    pool: &PgPool,
    employee_id: Uuid,
    course_campaign_id: Uuid,
    course_id: Uuid,
    content_id: Uuid,
) -> Result<(), DatabaseError> {
    sqlx::query(
        "INSERT INTO completed_campaign_contents \
           (id, employee_id, course_campaign_id, course_id, content_id, completed_at) \
         VALUES (gen_random_uuid(), $1, $2, $3, $4, NOW()) \
         ON CONFLICT (employee_id, course_campaign_id, course_id, content_id) \
           DO UPDATE SET completed_at = NOW()",
    )
    .bind(employee_id)
    .bind(course_campaign_id)
    .bind(course_id)
    .bind(content_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Append an activity-log row for the employee's organization feed.
pub async fn perform_activity(
    pool: &PgPool,
    employee_id: Uuid,
    kind: ActivityKind,
) -> Result<(), DatabaseError> {
    let profile: Option<(Uuid, Option<String>)> = sqlx::query_as(
        "SELECT organization_id, first_name FROM employee_profiles WHERE employee_id = $1",
    )
    .bind(employee_id)
    .fetch_optional(pool)
    .await?;
    let Some((organization_id, first_name)) = profile else {
        return Ok(());
    };

    sqlx::query(
        "INSERT INTO activity_logs (id, organization_id, employee_id, kind, description) \
         VALUES (gen_random_uuid(), $1, $2, $3, $4)",
    )
    .bind(organization_id)
    .bind(employee_id)
    .bind(kind.as_str())
    .bind(kind.describe(first_name.as_deref().unwrap_or("An employee")))
    .execute(pool)
    .await?;
    Ok(())
}

/// Clear a self-paced attempt so the course can be taken again.
pub async fn retake_course(
    pool: &PgPool,
    user_id: Uuid,
    course_id: Uuid,
) -> Result<(), DatabaseError> {
    sqlx::query("DELETE FROM completed_contents WHERE user_id = $1 AND course_id = $2")
        .bind(user_id)
        .bind(course_id)
        .execute(pool)
        .await?;
    sqlx::query("DELETE FROM answered_questions WHERE user_id = $1 AND course_id = $2")
        .bind(user_id)
        .bind(course_id)
        .execute(pool)
        .await?;
    sqlx::query(
        "UPDATE user_courses \
         SET started_at = $3, is_completed = FALSE, completed_at = NULL, updated_at = NOW() \
         WHERE user_id = $1 AND course_id = $2",
    )
    .bind(user_id)
    .bind(course_id)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::QuestionKind;
    use chrono::Utc;

    fn option(is_correct: bool) -> QuestionOption {
        let now = Utc::now();
        QuestionOption {
            id: Uuid::new_v4(),
            question_id: Uuid::new_v4(),
            text: "option".to_string(),
            is_correct,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn marking_requires_all_chosen_correct() {
        assert!(answers_are_correct(&[option(true), option(true)]));
        assert!(!answers_are_correct(&[option(true), option(false)]));
        assert!(!answers_are_correct(&[]));
    }

    #[test]
    fn rates_round_down_and_survive_zero() {
        assert_eq!(to_rate(0, 0), 0);
        assert_eq!(to_rate(1, 3), 33);
        assert_eq!(to_rate(3, 3), 100);
    }

    #[test]
    fn question_snapshot_keeps_option_correctness() {
        let now = Utc::now();
        let question = Question {
            id: Uuid::new_v4(),
            content_id: None,
            organization_id: None,
            text: "Which is phishing?".to_string(),
            kind: QuestionKind::SingleChoice,
            is_public: true,
            created_at: now,
            updated_at: now,
        };
        let options = [option(true), option(false)];
        let snapshot = snapshot_question(&question, &options);
        assert_eq!(snapshot["options"].as_array().unwrap().len(), 2);
        assert_eq!(snapshot["type"], serde_json::json!("singlechoice"));
    }
}
