use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub database: DatabaseConfig,
    pub security: SecurityConfig,
    pub email: EmailConfig,
    pub scoring: ScoringConfig,
    pub campaigns: CampaignConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub max_connections: u32,
    pub connection_timeout: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub jwt_secret: String,
    pub access_token_expiry_hours: u64,
    pub refresh_token_expiry_hours: u64,
    /// Lifetime of one-time account/reset tokens before they are rotated.
    pub user_token_expiry_secs: u64,
    /// Lifetime of domain-verification and deliverability-test tokens.
    pub verification_token_expiry_secs: u64,
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    /// HTTP relay endpoint; empty means log-only delivery.
    pub relay_url: String,
    pub relay_token: String,
    pub from_address: String,
    /// Base URL the frontend is served from, used in email links.
    pub frontend_url: String,
    /// Header carrying the phishing record id on simulated emails.
    pub phishing_tracking_header: String,
    /// Relay egress addresses organizations must allowlist.
    pub relay_ip_addresses: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Scores below this are high risk.
    pub high_risk_below: f64,
    /// Scores below this (and at or above high_risk_below) are medium risk.
    pub medium_risk_below: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignConfig {
    /// Offsets before the campaign end date at which reminder emails fire.
    pub reminder_offsets_secs: Vec<u64>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let environment = match env::var("APP_ENV").as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            Ok("staging") | Ok("stage") => Environment::Staging,
            _ => Environment::Development,
        };

        match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        }
        .with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = env::var("DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = v.parse().unwrap_or(self.database.max_connections);
        }
        if let Ok(v) = env::var("DATABASE_CONNECTION_TIMEOUT") {
            self.database.connection_timeout = v.parse().unwrap_or(self.database.connection_timeout);
        }

        if let Ok(v) = env::var("JWT_SECRET") {
            self.security.jwt_secret = v;
        }
        if let Ok(v) = env::var("ACCESS_TOKEN_EXPIRY_HOURS") {
            self.security.access_token_expiry_hours =
                v.parse().unwrap_or(self.security.access_token_expiry_hours);
        }
        if let Ok(v) = env::var("REFRESH_TOKEN_EXPIRY_HOURS") {
            self.security.refresh_token_expiry_hours =
                v.parse().unwrap_or(self.security.refresh_token_expiry_hours);
        }
        if let Ok(v) = env::var("USER_TOKEN_EXPIRY_SECS") {
            self.security.user_token_expiry_secs =
                v.parse().unwrap_or(self.security.user_token_expiry_secs);
        }
        if let Ok(v) = env::var("CORS_ORIGINS") {
            self.security.cors_origins = v.split(',').map(|s| s.trim().to_string()).collect();
        }

        if let Ok(v) = env::var("EMAIL_RELAY_URL") {
            self.email.relay_url = v;
        }
        if let Ok(v) = env::var("EMAIL_RELAY_TOKEN") {
            self.email.relay_token = v;
        }
        if let Ok(v) = env::var("EMAIL_FROM_ADDRESS") {
            self.email.from_address = v;
        }
        if let Ok(v) = env::var("FRONTEND_URL") {
            self.email.frontend_url = v;
        }

        self
    }

    fn base_email() -> EmailConfig {
        EmailConfig {
            relay_url: String::new(),
            relay_token: String::new(),
            from_address: "no-reply@rampart.local".to_string(),
            frontend_url: "http://localhost:5173/".to_string(),
            phishing_tracking_header: "X-Rampart-Record".to_string(),
            relay_ip_addresses: vec!["203.0.113.10".to_string(), "203.0.113.11".to_string()],
        }
    }

    fn base_scoring() -> ScoringConfig {
        ScoringConfig {
            high_risk_below: 40.0,
            medium_risk_below: 70.0,
        }
    }

    fn base_campaigns() -> CampaignConfig {
        CampaignConfig {
            // 3 days, 1 day and 1 hour before the deadline
            reminder_offsets_secs: vec![3 * 86_400, 86_400, 3_600],
        }
    }

    fn development() -> Self {
        Self {
            environment: Environment::Development,
            database: DatabaseConfig {
                max_connections: 10,
                connection_timeout: 30,
            },
            security: SecurityConfig {
                jwt_secret: "dev-only-secret-change-me".to_string(),
                access_token_expiry_hours: 24 * 7,
                refresh_token_expiry_hours: 24 * 30,
                user_token_expiry_secs: 24 * 3600,
                verification_token_expiry_secs: 15 * 60,
                cors_origins: vec![
                    "http://localhost:3000".to_string(),
                    "http://localhost:5173".to_string(),
                ],
            },
            email: Self::base_email(),
            scoring: Self::base_scoring(),
            campaigns: Self::base_campaigns(),
        }
    }

    fn staging() -> Self {
        Self {
            environment: Environment::Staging,
            database: DatabaseConfig {
                max_connections: 20,
                connection_timeout: 10,
            },
            security: SecurityConfig {
                jwt_secret: String::new(),
                access_token_expiry_hours: 24,
                refresh_token_expiry_hours: 24 * 7,
                user_token_expiry_secs: 24 * 3600,
                verification_token_expiry_secs: 15 * 60,
                cors_origins: vec!["https://staging.rampart.example".to_string()],
            },
            email: Self::base_email(),
            scoring: Self::base_scoring(),
            campaigns: Self::base_campaigns(),
        }
    }

    fn production() -> Self {
        Self {
            environment: Environment::Production,
            database: DatabaseConfig {
                max_connections: 50,
                connection_timeout: 5,
            },
            security: SecurityConfig {
                jwt_secret: String::new(),
                access_token_expiry_hours: 4,
                refresh_token_expiry_hours: 24,
                user_token_expiry_secs: 3600,
                verification_token_expiry_secs: 15 * 60,
                cors_origins: vec!["https://app.rampart.example".to_string()],
            },
            email: Self::base_email(),
            scoring: Self::base_scoring(),
            campaigns: Self::base_campaigns(),
        }
    }
}

// Global singleton config - initialized once at startup
pub static CONFIG: Lazy<AppConfig> = Lazy::new(AppConfig::from_env);

// Convenience function for accessing config
pub fn config() -> &'static AppConfig {
    &CONFIG
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn development_defaults() {
        let config = AppConfig::development();
        assert_eq!(config.database.max_connections, 10);
        assert!(!config.security.jwt_secret.is_empty());
        assert_eq!(config.scoring.high_risk_below, 40.0);
    }

    #[test]
    fn production_requires_explicit_secret() {
        let config = AppConfig::production();
        assert!(config.security.jwt_secret.is_empty());
        assert_eq!(config.security.access_token_expiry_hours, 4);
    }

    #[test]
    fn reminder_offsets_are_descending() {
        let config = AppConfig::development();
        let offsets = &config.campaigns.reminder_offsets_secs;
        assert!(offsets.windows(2).all(|w| w[0] > w[1]));
    }
}
