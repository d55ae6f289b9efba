use anyhow::{bail, Result};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BrokerMode {
    Live,
    Paper,
    Backtest,
}

/// Broker credentials resolved from named environment variables only —
/// never from YAML. `Debug` is hand-written so a secret value can never
/// leak into a log line via a derived impl.
pub struct ResolvedSecrets {
    pub app_key: String,
    pub app_secret: String,
    pub account_no: Option<String>,
}

impl fmt::Debug for ResolvedSecrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedSecrets")
            .field("app_key", &"<redacted>")
            .field("app_secret", &"<redacted>")
            .field("account_no", &self.account_no.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// LIVE requires a full credential set; PAPER requires app credentials but
/// no account number; BACKTEST requires nothing. Error messages name only
/// the missing environment variable, never its value.
pub fn resolve_secrets_for_mode(mode: BrokerMode) -> Result<Option<ResolvedSecrets>> {
    match mode {
        BrokerMode::Backtest => Ok(None),
        BrokerMode::Paper => Ok(Some(ResolvedSecrets {
            app_key: require_env("OMS_BROKER_APP_KEY")?,
            app_secret: require_env("OMS_BROKER_APP_SECRET")?,
            account_no: None,
        })),
        BrokerMode::Live => Ok(Some(ResolvedSecrets {
            app_key: require_env("OMS_BROKER_APP_KEY")?,
            app_secret: require_env("OMS_BROKER_APP_SECRET")?,
            account_no: Some(require_env("OMS_BROKER_ACCOUNT_NO")?),
        })),
    }
}

fn require_env(name: &str) -> Result<String> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => bail!("missing required environment variable {name}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_impl_never_prints_secret_values() {
        let secrets = ResolvedSecrets {
            app_key: "super-secret-key".to_string(),
            app_secret: "super-secret-value".to_string(),
            account_no: Some("12345678".to_string()),
        };
        let debug = format!("{secrets:?}");
        assert!(!debug.contains("super-secret"));
        assert!(!debug.contains("12345678"));
    }
}
