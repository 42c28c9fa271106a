/// config.rs – Load settings from config.yaml + environment variables.
///
/// Environment variables always override YAML values.
/// API credentials are read exclusively from the environment / .env file.
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::models::AccountId;

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HostType {
    Live,
    Demo,
}

impl std::str::FromStr for HostType {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "live" => Ok(HostType::Live),
            "demo" => Ok(HostType::Demo),
            other => Err(anyhow::anyhow!("{other} is not a valid host type")),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: HostType,
    /// JSON websocket endpoint for live accounts.
    pub live_url: String,
    /// JSON websocket endpoint for demo accounts.
    pub demo_url: String,
    /// Fixed delay before reconnecting after a disconnect.
    pub reconnect_delay_secs: f64,
    /// Keepalive interval.
    pub heartbeat_secs: f64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: HostType::Demo,
            live_url: "wss://live.ctraderapi.com:5036".into(),
            demo_url: "wss://demo.ctraderapi.com:5036".into(),
            reconnect_delay_secs: 5.0,
            heartbeat_secs: 10.0,
        }
    }
}

impl BrokerConfig {
    pub fn endpoint(&self) -> &str {
        match self.host {
            HostType::Live => &self.live_url,
            HostType::Demo => &self.demo_url,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DashboardConfig {
    /// Minimum time between two redraws.
    pub render_min_interval_ms: u64,
    /// How often to ask the broker for unrealized PnL while live.
    pub pnl_poll_ms: u64,
    /// How often to reconcile positions while live.
    pub reconcile_poll_secs: f64,
    /// How often to refresh spot subscriptions while live.
    pub price_refresh_secs: f64,
    /// Terminal rows not available to position rows.
    pub reserved_rows: u16,
    /// Notices retained in the rolling log.
    pub notice_capacity: usize,
    /// Notices shown under the table.
    pub visible_notices: usize,
    /// Delay before the menu comes back after leaving the dashboard.
    pub quit_delay_ms: u64,
    /// Delay before re-reconciling after a manual close.
    pub reconcile_after_close_ms: u64,
    /// Delay before requesting tick data for symbols still without a quote.
    pub missing_tick_delay_ms: u64,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            render_min_interval_ms: 20,
            pnl_poll_ms: 300,
            reconcile_poll_secs: 5.0,
            price_refresh_secs: 15.0,
            reserved_rows: 8,
            notice_capacity: 6,
            visible_notices: 3,
            quit_delay_ms: 500,
            reconcile_after_close_ms: 2000,
            missing_tick_delay_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    /// Append-only log file; the terminal belongs to the menu and dashboard.
    pub file: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            file: "ctrader-live-pnl.log".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Top-level settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub broker: BrokerConfig,
    pub dashboard: DashboardConfig,
    pub log: LogConfig,

    // API credentials – populated from env, not from YAML.
    #[serde(skip)]
    pub client_id: Option<String>,
    #[serde(skip)]
    pub client_secret: Option<String>,
    #[serde(skip)]
    pub access_token: Option<String>,
    #[serde(skip)]
    pub account_ids: Vec<AccountId>,
}

impl Settings {
    /// Load settings from *config_path* YAML file, then overlay env vars.
    pub fn load(config_path: &str, host_override: Option<HostType>) -> Result<Self> {
        // Try to load .env file (ignore error if absent)
        let _ = dotenvy::dotenv();

        let mut settings = if std::path::Path::new(config_path).exists() {
            let yaml = std::fs::read_to_string(config_path).context("reading config file")?;
            serde_yaml::from_str::<Settings>(&yaml).context("parsing config YAML")?
        } else {
            Settings::default()
        };

        settings.client_id = non_empty_env("CLIENT_ID");
        settings.client_secret = non_empty_env("CLIENT_SECRET");
        settings.access_token = non_empty_env("ACCESS_TOKEN");
        settings.account_ids = parse_account_ids(&std::env::var("ACCOUNT_IDS").unwrap_or_default());

        if let Ok(val) = std::env::var("CTRADER_HOST") {
            settings.broker.host = val.parse().context("CTRADER_HOST")?;
        }
        if let Some(host) = host_override {
            settings.broker.host = host;
        }

        settings.validate()?;
        Ok(settings)
    }

    pub fn has_credentials(&self) -> bool {
        self.client_id.is_some() && self.client_secret.is_some() && self.access_token.is_some()
    }

    fn validate(&self) -> Result<()> {
        validate_positive("broker.reconnect_delay_secs", self.broker.reconnect_delay_secs)?;
        validate_positive("broker.heartbeat_secs", self.broker.heartbeat_secs)?;
        validate_positive("dashboard.reconcile_poll_secs", self.dashboard.reconcile_poll_secs)?;
        validate_positive("dashboard.price_refresh_secs", self.dashboard.price_refresh_secs)?;

        if self.broker.endpoint().trim().is_empty() {
            bail!("broker endpoint for {:?} must not be empty", self.broker.host);
        }
        if self.dashboard.pnl_poll_ms == 0 {
            bail!("dashboard.pnl_poll_ms must be > 0");
        }
        if self.dashboard.notice_capacity == 0 {
            bail!("dashboard.notice_capacity must be > 0");
        }
        if self.dashboard.visible_notices > self.dashboard.notice_capacity {
            bail!("dashboard.visible_notices must be <= dashboard.notice_capacity");
        }
        Ok(())
    }
}

/// `"1, 2,x,3"` → `[1, 2, 3]`; entries that are not integers are skipped.
pub fn parse_account_ids(raw: &str) -> Vec<AccountId> {
    raw.split(',')
        .filter_map(|s| s.trim().parse::<AccountId>().ok())
        .collect()
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn validate_positive(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value <= 0.0 {
        bail!("{name} must be a finite number > 0");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_reconcile_interval() {
        let mut settings = Settings::default();
        settings.dashboard.reconcile_poll_secs = 0.0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn validate_rejects_more_visible_notices_than_kept() {
        let mut settings = Settings::default();
        settings.dashboard.visible_notices = 10;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn validate_rejects_empty_endpoint() {
        let mut settings = Settings::default();
        settings.broker.host = HostType::Live;
        settings.broker.live_url = " ".into();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn account_ids_skip_garbage() {
        assert_eq!(parse_account_ids("1, 22,abc,,3"), vec![1, 22, 3]);
        assert!(parse_account_ids("").is_empty());
    }

    #[test]
    fn yaml_overrides_defaults() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            f,
            "broker:\n  host: live\ndashboard:\n  reserved_rows: 10\n  pnl_poll_ms: 500"
        )
        .unwrap();
        let settings = Settings::load(f.path().to_str().unwrap(), None).unwrap();
        assert_eq!(settings.dashboard.reserved_rows, 10);
        assert_eq!(settings.dashboard.pnl_poll_ms, 500);
        assert_eq!(settings.dashboard.notice_capacity, 6);
    }

    #[test]
    fn host_override_wins() {
        let settings = Settings::load("does-not-exist.yaml", Some(HostType::Live)).unwrap();
        assert_eq!(settings.broker.host, HostType::Live);
        assert!(settings.broker.endpoint().starts_with("wss://live"));
    }
}
