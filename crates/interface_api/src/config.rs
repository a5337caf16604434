//! API configuration

use chrono::Duration;
use serde::Deserialize;

use core_kernel::{TemporalError, Timezone};
use domain_billing::EngineConfig;

/// API configuration
///
/// Loaded from `API_`-prefixed environment variables, e.g. `API_CRON_SECRET`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Database URL
    pub database_url: String,
    /// Log level
    pub log_level: String,
    /// Bearer secret the scheduler presents on the cron endpoint
    pub cron_secret: String,
    /// IANA zone the business runs in
    pub billing_timezone: String,
    /// Minutes a `processing` run may go quiet before it is reclaimed
    pub run_liveness_minutes: i64,
    /// Character budget for notes printed on the invoice
    pub notes_char_budget: usize,
    /// Default payment terms in days
    pub payment_terms_days: u32,
    pub smtp_host: Option<String>,
    pub smtp_port: u16,
    pub smtp_user: Option<String>,
    pub smtp_password: Option<String>,
    /// Sender address for invoice emails
    pub mail_from: Option<String>,
    /// Display name on invoice emails
    pub mail_from_name: String,
    /// Invoice number series, e.g. `INV` gives `INV-0001`
    pub invoice_series: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            database_url: "postgres://localhost/oj_projects".to_string(),
            log_level: "info".to_string(),
            cron_secret: String::new(),
            billing_timezone: "Europe/London".to_string(),
            run_liveness_minutes: 30,
            notes_char_budget: 2000,
            payment_terms_days: 30,
            smtp_host: None,
            smtp_port: 587,
            smtp_user: None,
            smtp_password: None,
            mail_from: None,
            mail_from_name: "Orange Jelly".to_string(),
            invoice_series: "INV".to_string(),
        }
    }
}

/// SMTP settings, present only when every required value is set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub from_email: String,
    pub from_name: String,
}

impl ApiConfig {
    /// Loads configuration from environment
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::Environment::with_prefix("API"))
            .build()?
            .try_deserialize()
    }

    /// Returns the server address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The engine-side projection of this configuration
    pub fn engine_config(&self) -> Result<EngineConfig, TemporalError> {
        let timezone: Timezone = self.billing_timezone.parse()?;
        Ok(EngineConfig {
            timezone,
            liveness_window: Duration::minutes(self.run_liveness_minutes),
            notes_char_budget: self.notes_char_budget,
            payment_terms_days: self.payment_terms_days,
            sender_name: self.mail_from_name.clone(),
            ..EngineConfig::default()
        })
    }

    /// SMTP settings, or `None` when mail delivery is not configured
    pub fn smtp_settings(&self) -> Option<SmtpSettings> {
        let non_empty = |value: &Option<String>| value.clone().filter(|v| !v.trim().is_empty());
        Some(SmtpSettings {
            host: non_empty(&self.smtp_host)?,
            port: self.smtp_port,
            user: non_empty(&self.smtp_user)?,
            password: non_empty(&self.smtp_password)?,
            from_email: non_empty(&self.mail_from)?,
            from_name: self.mail_from_name.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ApiConfig::default();

        assert_eq!(config.server_addr(), "0.0.0.0:8080");
        assert_eq!(config.invoice_series, "INV");
        assert!(config.smtp_settings().is_none());
    }

    #[test]
    fn test_engine_config_projection() {
        let config = ApiConfig {
            run_liveness_minutes: 45,
            notes_char_budget: 500,
            payment_terms_days: 14,
            ..ApiConfig::default()
        };

        let engine = config.engine_config().unwrap();

        assert_eq!(engine.timezone.name(), "Europe/London");
        assert_eq!(engine.liveness_window, Duration::minutes(45));
        assert_eq!(engine.notes_char_budget, 500);
        assert_eq!(engine.payment_terms_days, 14);
    }

    #[test]
    fn test_unknown_timezone_is_rejected() {
        let config = ApiConfig {
            billing_timezone: "Mars/Olympus".to_string(),
            ..ApiConfig::default()
        };
        assert!(config.engine_config().is_err());
    }

    #[test]
    fn test_smtp_requires_every_credential() {
        let mut config = ApiConfig {
            smtp_host: Some("smtp.example.test".to_string()),
            smtp_user: Some("billing".to_string()),
            smtp_password: Some("secret".to_string()),
            ..ApiConfig::default()
        };
        assert!(config.smtp_settings().is_none());

        config.mail_from = Some("billing@example.test".to_string());
        let smtp = config.smtp_settings().unwrap();
        assert_eq!(smtp.port, 587);
        assert_eq!(smtp.from_name, "Orange Jelly");
    }
}
