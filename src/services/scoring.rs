use sqlx::PgPool;
use uuid::Uuid;

use crate::config;
use crate::database::DatabaseError;
use crate::models::PhishingAction;

/// Fixed score for each phishing action. `NoAction` carries no score and is
/// excluded from averages.
pub fn action_score(action: PhishingAction) -> Option<f64> {
    match action {
        PhishingAction::Compromised => Some(0.0),
        PhishingAction::Clicked => Some(30.0),
        PhishingAction::Opened => Some(70.0),
        PhishingAction::Reported => Some(100.0),
        PhishingAction::NoAction => None,
    }
}

/// Risk rating is the inverse of the security score, normalized to 0..=1.
pub fn risk_rating(security_score: f64) -> f64 {
    (100.0 - security_score) / 100.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskBucket {
    High,
    Medium,
    Low,
}

pub fn risk_bucket(security_score: f64) -> RiskBucket {
    let scoring = &config::config().scoring;
    if security_score < scoring.high_risk_below {
        RiskBucket::High
    } else if security_score < scoring.medium_risk_below {
        RiskBucket::Medium
    } else {
        RiskBucket::Low
    }
}

/// Average the scored actions, skipping unscored ones.
pub fn average_action_score(actions: &[PhishingAction]) -> Option<f64> {
    let scores: Vec<f64> = actions.iter().copied().filter_map(action_score).collect();
    if scores.is_empty() {
        return None;
    }
    Some(scores.iter().sum::<f64>() / scores.len() as f64)
}

/// Average security score of a phishing campaign over opened records,
/// optionally narrowed to one template.
pub async fn phishing_campaign_score(
    pool: &PgPool,
    phishing_campaign_id: Uuid,
    phishing_template_id: Option<Uuid>,
) -> Result<Option<f64>, DatabaseError> {
    let mut sql = String::from(
        "SELECT action FROM employee_phishing_campaigns \
         WHERE phishing_campaign_id = $1 AND is_opened = TRUE",
    );
    if phishing_template_id.is_some() {
        sql.push_str(" AND phishing_template_id = $2");
    }

    let mut query = sqlx::query_scalar::<_, PhishingAction>(&sql).bind(phishing_campaign_id);
    if let Some(template_id) = phishing_template_id {
        query = query.bind(template_id);
    }
    let actions = query.fetch_all(pool).await?;
    Ok(average_action_score(&actions))
}

/// Average security score of one department's opened records within a
/// phishing campaign.
pub async fn department_phishing_score(
    pool: &PgPool,
    phishing_campaign_id: Uuid,
    department_id: Uuid,
) -> Result<Option<f64>, DatabaseError> {
    let actions = sqlx::query_scalar::<_, PhishingAction>(
        "SELECT epc.action FROM employee_phishing_campaigns epc \
         JOIN employee_profiles ep ON ep.employee_id = epc.employee_id \
         WHERE epc.phishing_campaign_id = $1 AND epc.is_opened = TRUE \
           AND ep.department_id = $2 AND epc.action <> 'no_action'",
    )
    .bind(phishing_campaign_id)
    .bind(department_id)
    .fetch_all(pool)
    .await?;
    Ok(average_action_score(&actions))
}

/// Recompute the employee's profile score from all their phishing records,
/// then roll the averages up through the department and the organization.
/// Runs after every funnel event.
pub async fn rollup_employee_security_score(
    pool: &PgPool,
    employee_id: Uuid,
) -> Result<(), DatabaseError> {
    let employee_score: Option<f64> = sqlx::query_scalar(
        "SELECT AVG(security_score) FROM employee_phishing_campaigns WHERE employee_id = $1",
    )
    .bind(employee_id)
    .fetch_one(pool)
    .await?;

    sqlx::query("UPDATE employee_profiles SET security_score = $1, updated_at = NOW() WHERE employee_id = $2")
        .bind(employee_score)
        .bind(employee_id)
        .execute(pool)
        .await?;

    let profile: Option<(Option<Uuid>, Uuid)> = sqlx::query_as(
        "SELECT department_id, organization_id FROM employee_profiles WHERE employee_id = $1",
    )
    .bind(employee_id)
    .fetch_optional(pool)
    .await?;

    let Some((department_id, organization_id)) = profile else {
        return Ok(());
    };

    if let Some(department_id) = department_id {
        sqlx::query(
            "UPDATE departments SET security_score = \
               (SELECT AVG(security_score) FROM employee_profiles WHERE department_id = $1), \
               updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(department_id)
        .execute(pool)
        .await?;
    }

    sqlx::query(
        "UPDATE organization_profiles SET security_score = \
           (SELECT AVG(security_score) FROM employee_profiles WHERE organization_id = $1), \
           updated_at = NOW() \
         WHERE organization_id = $1",
    )
    .bind(organization_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Stamp a funnel action onto a record: timestamp, flag, action and the
/// action's fixed score.
pub async fn record_phishing_action(
    pool: &PgPool,
    record_id: Uuid,
    action: PhishingAction,
) -> Result<Uuid, DatabaseError> {
    let (flag_column, time_column) = match action {
        PhishingAction::Opened => ("is_opened", "opened_at"),
        PhishingAction::Clicked => ("is_clicked", "clicked_at"),
        PhishingAction::Compromised => ("is_compromised", "compromised_at"),
        PhishingAction::Reported => ("is_reported", "reported_at"),
        PhishingAction::NoAction => ("is_email_sent", "email_sent_at"),
    };

    let sql = format!(
        "UPDATE employee_phishing_campaigns \
         SET {flag} = TRUE, {time} = NOW(), action = $1, security_score = $2, updated_at = NOW() \
         WHERE id = $3 RETURNING employee_id",
        flag = flag_column,
        time = time_column,
    );

    let employee_id: Option<Uuid> = sqlx::query_scalar(&sql)
        .bind(action.as_str())
        .bind(action_score(action))
        .bind(record_id)
        .fetch_optional(pool)
        .await?;

    employee_id.ok_or_else(|| DatabaseError::NotFound("Phishing record not found".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_mapping() {
        assert_eq!(action_score(PhishingAction::Compromised), Some(0.0));
        assert_eq!(action_score(PhishingAction::Clicked), Some(30.0));
        assert_eq!(action_score(PhishingAction::Opened), Some(70.0));
        assert_eq!(action_score(PhishingAction::Reported), Some(100.0));
        assert_eq!(action_score(PhishingAction::NoAction), None);
    }

    #[test]
    fn unscored_actions_do_not_drag_the_average() {
        let actions = [
            PhishingAction::Reported,
            PhishingAction::NoAction,
            PhishingAction::Compromised,
        ];
        assert_eq!(average_action_score(&actions), Some(50.0));
        assert_eq!(average_action_score(&[PhishingAction::NoAction]), None);
        assert_eq!(average_action_score(&[]), None);
    }

    #[test]
    fn risk_buckets() {
        assert_eq!(risk_bucket(10.0), RiskBucket::High);
        assert_eq!(risk_bucket(40.0), RiskBucket::Medium);
        assert_eq!(risk_bucket(69.9), RiskBucket::Medium);
        assert_eq!(risk_bucket(70.0), RiskBucket::Low);
        assert_eq!(risk_rating(70.0), 0.3);
    }
}
