use chrono::{DateTime, Duration, Utc, Weekday};
use serde_json::{json, Value};
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::DatabaseError;
use crate::models::{CampaignActivity, PhishingAction};
use crate::services::{learning, scoring};

// --- phishing funnel -------------------------------------------------------

/// completed/total counter for one funnel flag, optionally narrowed to a
/// template.
pub async fn funnel_activity(
    pool: &PgPool,
    phishing_campaign_id: Uuid,
    flag_column: &str,
    phishing_template_id: Option<Uuid>,
) -> Result<CampaignActivity, DatabaseError> {
    // flag_column is one of our own identifiers, never user input
    let template_clause = if phishing_template_id.is_some() {
        " AND phishing_template_id = $2"
    } else {
        ""
    };
    let sql = format!(
        "SELECT COUNT(*) FILTER (WHERE {flag}), COUNT(*) \
         FROM employee_phishing_campaigns WHERE phishing_campaign_id = $1{clause}",
        flag = flag_column,
        clause = template_clause,
    );
    let mut query = sqlx::query_as::<_, (i64, i64)>(&sql).bind(phishing_campaign_id);
    if let Some(template_id) = phishing_template_id {
        query = query.bind(template_id);
    }
    let (completed, total) = query.fetch_one(pool).await?;
    Ok(CampaignActivity { completed, total })
}

#[derive(Debug, sqlx::FromRow, serde::Serialize)]
pub struct PhishingEmployeeRecord {
    pub employee_id: Uuid,
    pub full_name: String,
    pub email: String,
    pub department: Option<String>,
    pub action: PhishingAction,
}

pub async fn phishing_employee_records(
    pool: &PgPool,
    phishing_campaign_id: Uuid,
    phishing_template_id: Option<Uuid>,
) -> Result<Vec<PhishingEmployeeRecord>, DatabaseError> {
    let template_clause = if phishing_template_id.is_some() {
        " AND epc.phishing_template_id = $2"
    } else {
        ""
    };
    let sql = format!(
        "SELECT epc.employee_id, \
                TRIM(CONCAT(COALESCE(ep.first_name, ''), ' ', COALESCE(ep.last_name, ''))) AS full_name, \
                u.email, d.name AS department, epc.action \
         FROM employee_phishing_campaigns epc \
         JOIN users u ON u.id = epc.employee_id \
         JOIN employee_profiles ep ON ep.employee_id = epc.employee_id \
         LEFT JOIN departments d ON d.id = ep.department_id \
         WHERE epc.phishing_campaign_id = $1{clause} \
         ORDER BY u.email",
        clause = template_clause,
    );
    let mut query = sqlx::query_as::<_, PhishingEmployeeRecord>(&sql).bind(phishing_campaign_id);
    if let Some(template_id) = phishing_template_id {
        query = query.bind(template_id);
    }
    Ok(query.fetch_all(pool).await?)
}

pub fn employee_record_json(record: &PhishingEmployeeRecord) -> Value {
    let scores = match scoring::action_score(record.action) {
        Some(score) => json!({
            "security_score": score,
            "risk_rating": scoring::risk_rating(score),
        }),
        None => json!({ "security_score": "N/A", "risk_rating": "N/A" }),
    };
    json!({
        "employee_id": record.employee_id,
        "full_name": record.full_name,
        "email": record.email,
        "department": record.department,
        "action": record.action,
        "scores": scores,
    })
}

/// Employees who reported the email, falling back to those who merely opened
/// it when nobody reported. At most 10.
pub async fn top_performers(
    pool: &PgPool,
    phishing_campaign_id: Uuid,
    phishing_template_id: Option<Uuid>,
) -> Result<Vec<Value>, DatabaseError> {
    let records =
        phishing_employee_records(pool, phishing_campaign_id, phishing_template_id).await?;

    let reported: Vec<&PhishingEmployeeRecord> = records
        .iter()
        .filter(|r| r.action == PhishingAction::Reported)
        .collect();
    let pool_of = if reported.is_empty() {
        records
            .iter()
            .filter(|r| r.action == PhishingAction::Opened)
            .collect::<Vec<_>>()
    } else {
        reported
    };

    Ok(pool_of
        .into_iter()
        .take(10)
        .map(|r| json!({ "full_name": r.full_name, "department": r.department }))
        .collect())
}

/// Per-department security score / risk breakdown for a phishing campaign.
/// high = reported+opened, medium = clicked, low = compromised; each band is
/// expressed relative to the department score.
pub async fn department_scores(
    pool: &PgPool,
    campaign_organization_id: Uuid,
    phishing_campaign_id: Uuid,
    phishing_template_id: Option<Uuid>,
) -> Result<Vec<Value>, DatabaseError> {
    let departments: Vec<(Uuid, String)> =
        sqlx::query_as("SELECT id, name FROM departments WHERE organization_id = $1 ORDER BY name")
            .bind(campaign_organization_id)
            .fetch_all(pool)
            .await?;

    let records =
        phishing_employee_records(pool, phishing_campaign_id, phishing_template_id).await?;

    let mut out = Vec::new();
    for (department_id, department_name) in departments {
        let dept_records: Vec<&PhishingEmployeeRecord> = records
            .iter()
            .filter(|r| r.department.as_deref() == Some(department_name.as_str()))
            .collect();
        if phishing_template_id.is_some() && dept_records.is_empty() {
            continue;
        }

        let band = |actions: &[PhishingAction]| -> f64 {
            let scores: Vec<f64> = dept_records
                .iter()
                .filter(|r| actions.contains(&r.action))
                .filter_map(|r| scoring::action_score(r.action))
                .collect();
            if scores.is_empty() {
                0.0
            } else {
                scores.iter().sum::<f64>() / scores.len() as f64
            }
        };

        let high = band(&[PhishingAction::Reported, PhishingAction::Opened]);
        let medium = band(&[PhishingAction::Clicked]);
        let low = band(&[PhishingAction::Compromised]);
        let department_score =
            scoring::department_phishing_score(pool, phishing_campaign_id, department_id)
                .await?
                .unwrap_or(0.0);

        let entry = if department_score == 0.0 {
            json!({
                "department": department_name,
                "security_score": { "score": 0, "high": 0, "medium": 0, "low": 0 },
                "risk_rating": { "score": 0, "high": 0, "medium": 0, "low": 0 },
            })
        } else {
            let high_pct = high / department_score * 100.0;
            let medium_pct = medium / department_score * 100.0;
            let low_pct = low / department_score * 100.0;
            json!({
                "department": department_name,
                "security_score": {
                    "score": department_score,
                    "high": high_pct,
                    "medium": medium_pct,
                    "low": low_pct,
                },
                "risk_rating": {
                    "score": 100.0 - department_score,
                    "high": 100.0 - high_pct,
                    "medium": 100.0 - medium_pct,
                    "low": 100.0 - low_pct,
                },
            })
        };
        out.push(entry);
    }
    Ok(out)
}

/// The full phishing metrics payload for a campaign, optionally narrowed to
/// one template.
pub async fn phishing_campaign_metrics(
    pool: &PgPool,
    organization_id: Uuid,
    phishing_campaign_id: Uuid,
    phishing_template_id: Option<Uuid>,
) -> Result<Value, DatabaseError> {
    let records =
        phishing_employee_records(pool, phishing_campaign_id, phishing_template_id).await?;
    let average = scoring::phishing_campaign_score(pool, phishing_campaign_id, phishing_template_id)
        .await?;

    Ok(json!({
        "employee_records": records.iter().map(employee_record_json).collect::<Vec<_>>(),
        "opened_employees_activity":
            funnel_activity(pool, phishing_campaign_id, "is_opened", phishing_template_id).await?,
        "clicked_employees_activity":
            funnel_activity(pool, phishing_campaign_id, "is_clicked", phishing_template_id).await?,
        "compromised_employees_activity":
            funnel_activity(pool, phishing_campaign_id, "is_compromised", phishing_template_id).await?,
        "reported_employees_activity":
            funnel_activity(pool, phishing_campaign_id, "is_reported", phishing_template_id).await?,
        "average_security_score": average,
        "top_performers": top_performers(pool, phishing_campaign_id, phishing_template_id).await?,
        "scores": department_scores(pool, organization_id, phishing_campaign_id, phishing_template_id).await?,
    }))
}

// --- course campaign metrics -----------------------------------------------

pub async fn course_campaign_metrics(
    pool: &PgPool,
    campaign_id: Uuid,
    course_campaign_id: Uuid,
) -> Result<Value, DatabaseError> {
    let course_ids = learning::campaign_course_ids(pool, course_campaign_id).await?;
    let employee_ids: Vec<Uuid> = sqlx::query_scalar(
        "SELECT employee_id FROM employee_course_campaigns WHERE course_campaign_id = $1",
    )
    .bind(course_campaign_id)
    .fetch_all(pool)
    .await?;

    let mut courses = Vec::new();
    for course_id in &course_ids {
        let name: String = sqlx::query_scalar("SELECT name FROM courses WHERE id = $1")
            .bind(course_id)
            .fetch_one(pool)
            .await?;
        let mut score_sum = 0.0;
        let mut progress_sum = 0i64;
        for employee_id in &employee_ids {
            score_sum +=
                learning::campaign_course_score(pool, *employee_id, course_campaign_id, *course_id)
                    .await? as f64;
            progress_sum += learning::campaign_course_progress(
                pool,
                *employee_id,
                course_campaign_id,
                *course_id,
            )
            .await? as i64;
        }
        let count = employee_ids.len().max(1) as f64;
        courses.push(json!({
            "id": course_id,
            "name": name,
            "average_score": score_sum / count,
            "completion_rate": progress_sum as f64 / count,
        }));
    }

    let mut employees = Vec::new();
    for employee_id in &employee_ids {
        let row: (String, Option<String>, Option<String>, Option<String>, String) = sqlx::query_as(
            "SELECT u.email, ep.first_name, ep.last_name, d.name, ep.status \
             FROM users u \
             JOIN employee_profiles ep ON ep.employee_id = u.id \
             LEFT JOIN departments d ON d.id = ep.department_id \
             WHERE u.id = $1",
        )
        .bind(employee_id)
        .fetch_one(pool)
        .await?;
        employees.push(json!({
            "id": employee_id,
            "email": row.0,
            "first_name": row.1,
            "last_name": row.2,
            "department": row.3,
            "status": row.4,
            "progress_rate":
                learning::employee_campaign_progress(pool, *employee_id, course_campaign_id).await?,
            "average_score":
                learning::employee_campaign_average_score(pool, *employee_id, course_campaign_id).await?,
        }));
    }

    let cut_off_score: f64 = sqlx::query_scalar(
        "SELECT op.cut_off_score FROM organization_profiles op \
         JOIN campaigns c ON c.organization_id = op.organization_id WHERE c.id = $1",
    )
    .bind(campaign_id)
    .fetch_one(pool)
    .await?;

    Ok(json!({
        "completion_rate": learning::course_campaign_progress_rate(pool, course_campaign_id).await?,
        "average_score": learning::course_campaign_average_score(pool, course_campaign_id).await?,
        "cut_off_score": cut_off_score,
        "course_campaign": { "courses": courses, "employees": employees },
    }))
}

pub async fn course_campaign_activity(
    pool: &PgPool,
    course_campaign_id: Uuid,
) -> Result<CampaignActivity, DatabaseError> {
    let (completed, total): (i64, i64) = sqlx::query_as(
        "SELECT COUNT(*) FILTER (WHERE is_completed), COUNT(*) \
         FROM employee_course_campaigns WHERE course_campaign_id = $1",
    )
    .bind(course_campaign_id)
    .fetch_one(pool)
    .await?;
    Ok(CampaignActivity { completed, total })
}

// --- organization dashboard -------------------------------------------------

async fn campaign_count(
    pool: &PgPool,
    organization_id: Uuid,
    phishing: bool,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<i64, DatabaseError> {
    let operator = if phishing { "=" } else { "<>" };
    let sql = format!(
        "SELECT COUNT(*) FROM campaigns \
         WHERE organization_id = $1 AND kind {} 'phishing' \
           AND start_date >= $2 AND start_date < $3",
        operator,
    );
    let count: i64 = sqlx::query_scalar(&sql)
        .bind(organization_id)
        .bind(from)
        .bind(to)
        .fetch_one(pool)
        .await?;
    Ok(count)
}

fn week_bounds(at: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let week = at.date_naive().week(Weekday::Mon);
    let start = week
        .first_day()
        .and_hms_opt(0, 0, 0)
        .expect("valid midnight")
        .and_utc();
    (start, start + Duration::days(7))
}

/// Weekly campaign-start histogram over the last 30 days plus the current
/// week, and a daily histogram over the last 7 days.
pub async fn campaign_start_histograms(
    pool: &PgPool,
    organization_id: Uuid,
) -> Result<Value, DatabaseError> {
    let now = Utc::now();

    let mut last_30_days = Vec::new();
    let mut cursor = now - Duration::days(30);
    let mut week_number = 0;
    while cursor < now {
        week_number += 1;
        let (start, end) = week_bounds(cursor);
        last_30_days.push(json!({
            "name": format!("Week {}", week_number),
            "learning_campaigns": campaign_count(pool, organization_id, false, start, end).await?,
            "phishing_campaigns": campaign_count(pool, organization_id, true, start, end).await?,
        }));
        cursor = cursor + Duration::days(7);
    }
    let (this_week_start, this_week_end) = week_bounds(now);
    last_30_days.push(json!({
        "name": "This Week",
        "learning_campaigns":
            campaign_count(pool, organization_id, false, this_week_start, this_week_end).await?,
        "phishing_campaigns":
            campaign_count(pool, organization_id, true, this_week_start, this_week_end).await?,
    }));

    let mut last_7_days = Vec::new();
    for i in 0..7 {
        let day = now - Duration::days(7) + Duration::days(i);
        let next_day = day + Duration::days(1);
        let name = if i == 6 {
            "Today".to_string()
        } else {
            day.format("%A").to_string()
        };
        last_7_days.push(json!({
            "name": name,
            "learning_campaigns": campaign_count(pool, organization_id, false, day, next_day).await?,
            "phishing_campaigns": campaign_count(pool, organization_id, true, day, next_day).await?,
        }));
    }

    Ok(json!({ "last_30_days": last_30_days, "last_7_days": last_7_days }))
}

pub async fn organization_dashboard(
    pool: &PgPool,
    organization_id: Uuid,
) -> Result<Value, DatabaseError> {
    let now = Utc::now();
    let scoring_cfg = &crate::config::config().scoring;

    let security_score: Option<f64> = sqlx::query_scalar(
        "SELECT security_score FROM organization_profiles WHERE organization_id = $1",
    )
    .bind(organization_id)
    .fetch_one(pool)
    .await?;

    let campaign_stats = json!({
        "phishing_campaigns":
            campaign_count(pool, organization_id, true, now - Duration::days(14), now).await?,
        "learning_campaigns":
            campaign_count(pool, organization_id, false, now - Duration::days(14), now).await?,
        "active_learning_campaigns": sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM campaigns \
             WHERE organization_id = $1 AND kind <> 'phishing' AND status = 'active'",
        )
        .bind(organization_id)
        .fetch_one(pool)
        .await?,
    });

    // Average progress over every course campaign the organization has run
    let course_campaign_ids: Vec<Uuid> = sqlx::query_scalar(
        "SELECT cc.id FROM course_campaigns cc \
         JOIN campaigns c ON c.id = cc.campaign_id WHERE c.organization_id = $1",
    )
    .bind(organization_id)
    .fetch_all(pool)
    .await?;
    let training_completion_rate = if course_campaign_ids.is_empty() {
        0.0
    } else {
        let mut sum = 0i64;
        for id in &course_campaign_ids {
            sum += learning::course_campaign_progress_rate(pool, *id).await? as i64;
        }
        sum as f64 / course_campaign_ids.len() as f64
    };

    let (employees_count, active_count, high, medium, low): (i64, i64, i64, i64, i64) =
        sqlx::query_as(
            "SELECT COUNT(*), \
                    COUNT(*) FILTER (WHERE status = 'active'), \
                    COUNT(*) FILTER (WHERE security_score < $2), \
                    COUNT(*) FILTER (WHERE security_score >= $2 AND security_score < $3), \
                    COUNT(*) FILTER (WHERE security_score >= $3) \
             FROM employee_profiles WHERE organization_id = $1",
        )
        .bind(organization_id)
        .bind(scoring_cfg.high_risk_below)
        .bind(scoring_cfg.medium_risk_below)
        .fetch_one(pool)
        .await?;
    let departments_count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM departments WHERE organization_id = $1")
            .bind(organization_id)
            .fetch_one(pool)
            .await?;

    let employees_security_stats = json!({
        "employees_count": employees_count,
        "active_employees_count": active_count,
        "inactive_employees_count": employees_count - active_count,
        "departments_count": departments_count,
        "risk_rating": { "high": high, "medium": medium, "low": low },
    });

    let department_rows: Vec<(Uuid, String, Option<f64>)> = sqlx::query_as(
        "SELECT id, name, security_score FROM departments WHERE organization_id = $1 ORDER BY name",
    )
    .bind(organization_id)
    .fetch_all(pool)
    .await?;
    let mut departments_security_stats = Vec::new();
    for (department_id, name, score) in department_rows {
        let (count, dept_high, dept_medium, dept_low): (i64, i64, i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), \
                    COUNT(*) FILTER (WHERE security_score < $2), \
                    COUNT(*) FILTER (WHERE security_score >= $2 AND security_score < $3), \
                    COUNT(*) FILTER (WHERE security_score >= $3) \
             FROM employee_profiles WHERE department_id = $1",
        )
        .bind(department_id)
        .bind(scoring_cfg.high_risk_below)
        .bind(scoring_cfg.medium_risk_below)
        .fetch_one(pool)
        .await?;
        departments_security_stats.push(json!({
            "name": name,
            "security_score": score,
            "employees_data": {
                "count": count,
                "high_risk": dept_high,
                "medium_risk": dept_medium,
                "low_risk": dept_low,
            },
        }));
    }

    let activity_logs: Vec<(Option<String>, Option<String>, Option<String>, DateTime<Utc>)> =
        sqlx::query_as(
            "SELECT ep.first_name, ep.last_name, al.description, al.created_at \
             FROM activity_logs al \
             JOIN employee_profiles ep ON ep.employee_id = al.employee_id \
             WHERE al.organization_id = $1 ORDER BY al.created_at DESC LIMIT 50",
        )
        .bind(organization_id)
        .fetch_all(pool)
        .await?;

    Ok(json!({
        "security_score": security_score,
        "campaign_stats": campaign_stats,
        "training_completion_rate": training_completion_rate,
        "employees_security_stats": employees_security_stats,
        "departments_security_stats": departments_security_stats,
        "courses_phishing_campaign_stats":
            campaign_start_histograms(pool, organization_id).await?,
        "activity_logs": activity_logs.into_iter().map(|(first, last, description, at)| json!({
            "employee": { "first_name": first, "last_name": last },
            "description": description,
            "created_at": at,
        })).collect::<Vec<_>>(),
    }))
}

// --- daily snapshots --------------------------------------------------------

/// Append the end-of-day security-score and completed-course snapshots for
/// every user and department.
pub async fn store_daily_snapshots(pool: &PgPool) -> Result<(), DatabaseError> {
    sqlx::query(
        "INSERT INTO user_security_score_timeseries (id, user_id, security_score) \
         SELECT gen_random_uuid(), employee_id, security_score \
         FROM employee_profiles WHERE security_score IS NOT NULL",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "INSERT INTO user_security_score_timeseries (id, user_id, security_score) \
         SELECT gen_random_uuid(), organization_id, security_score \
         FROM organization_profiles WHERE security_score IS NOT NULL",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "INSERT INTO department_security_score_timeseries (id, department_id, security_score) \
         SELECT gen_random_uuid(), id, security_score \
         FROM departments WHERE security_score IS NOT NULL",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "INSERT INTO user_completed_courses_timeseries (id, user_id, courses_completed) \
         SELECT gen_random_uuid(), u.id, \
                (SELECT COUNT(*) FROM user_courses uc WHERE uc.user_id = u.id AND uc.is_completed) \
         FROM users u WHERE u.role IN ('employee', 'organization')",
    )
    .execute(pool)
    .await?;

    tracing::info!("daily security snapshots stored");
    Ok(())
}
