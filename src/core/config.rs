use anyhow::{Context, Result};
use chrono::NaiveDate;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::time::Duration;
use std::{fs, path::PathBuf};
use tracing::debug;

use super::convert::{ConversionParams, RateMode};
use super::market::{DateWindow, Interval, PriceQuery, SortOrder};

pub const API_KEY_ENV: &str = "POLYGON_API_KEY";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PolygonProviderConfig {
    pub base_url: String,
    #[serde(default = "default_polygon_version")]
    pub api_version: String,
    /// Falls back to the `POLYGON_API_KEY` environment variable.
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for PolygonProviderConfig {
    fn default() -> Self {
        PolygonProviderConfig {
            base_url: "https://api.polygon.io".to_string(),
            api_version: default_polygon_version(),
            api_key: None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FrankfurterProviderConfig {
    pub base_url: String,
    #[serde(default = "default_frankfurter_version")]
    pub api_version: String,
}

impl Default for FrankfurterProviderConfig {
    fn default() -> Self {
        FrankfurterProviderConfig {
            base_url: "https://api.frankfurter.dev".to_string(),
            api_version: default_frankfurter_version(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub polygon: PolygonProviderConfig,
    #[serde(default)]
    pub frankfurter: FrankfurterProviderConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub retries: usize,
    pub retry_delay_ms: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        HttpConfig {
            timeout_secs: 30,
            retries: 2,
            retry_delay_ms: 500,
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    pub ticker: String,
    pub mode: RateMode,
    #[serde(default)]
    pub date_from: Option<NaiveDate>,
    #[serde(default)]
    pub date_to: Option<NaiveDate>,
    #[serde(default = "default_date_column")]
    pub date_column: String,
    #[serde(default)]
    pub interval: Interval,
    #[serde(default)]
    pub sort: SortOrder,
    #[serde(default = "default_adjusted")]
    pub adjusted: bool,
    pub base_currency: String,
    pub target_currency: String,
    pub convert_fields: Vec<String>,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

/// A single problem found while validating the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigIssue {
    pub field: &'static str,
    pub problem: String,
}

impl Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "`{}`: {}", self.field, self.problem)
    }
}

fn default_polygon_version() -> String {
    "v2".to_string()
}

fn default_frankfurter_version() -> String {
    "v1".to_string()
}

fn default_date_column() -> String {
    "date".to_string()
}

fn default_adjusted() -> bool {
    true
}

fn is_currency_code(code: &str) -> bool {
    code.len() == 3 && code.chars().all(|c| c.is_ascii_uppercase())
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        debug!("Loading default config");
        let config_path = Self::default_config_path()?;
        Self::load_from_path(&config_path)
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("dev", "stockfx", "stockfx")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.config_dir().join("config.yaml"))
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Self = serde_yaml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;
        debug!("Successfully loaded config");
        Ok(config)
    }

    pub fn polygon_api_key(&self) -> Option<String> {
        self.providers
            .polygon
            .api_key
            .clone()
            .or_else(|| std::env::var(API_KEY_ENV).ok())
            .filter(|key| !key.trim().is_empty())
    }

    /// Checks every required setting and reports all problems at once.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();
        let mut issue = |field: &'static str, problem: String| {
            issues.push(ConfigIssue { field, problem });
        };

        if self.ticker.trim().is_empty() {
            issue("ticker", "must not be empty".to_string());
        }
        if !is_currency_code(&self.base_currency) {
            issue(
                "base_currency",
                format!("`{}` is not a 3-letter currency code", self.base_currency),
            );
        }
        if !is_currency_code(&self.target_currency) {
            issue(
                "target_currency",
                format!("`{}` is not a 3-letter currency code", self.target_currency),
            );
        }
        if self.convert_fields.is_empty() {
            issue("convert_fields", "at least one field is required".to_string());
        }
        if self.date_column.trim().is_empty() {
            issue("date_column", "must not be empty".to_string());
        }
        if self.interval.multiplier == 0 {
            issue("interval.multiplier", "must be greater than zero".to_string());
        }
        if self.http.timeout_secs == 0 {
            issue("http.timeout_secs", "must be greater than zero".to_string());
        }
        if self.polygon_api_key().is_none() {
            issue(
                "providers.polygon.api_key",
                format!("not set in config or {API_KEY_ENV}"),
            );
        }

        if self.mode == RateMode::Historical {
            match (self.date_from, self.date_to) {
                (Some(from), Some(to)) if from > to => {
                    issue("date_from", format!("{from} is after date_to {to}"));
                }
                (from, to) => {
                    if from.is_none() {
                        issue("date_from", "required in historical mode".to_string());
                    }
                    if to.is_none() {
                        issue("date_to", "required in historical mode".to_string());
                    }
                }
            }
        }

        issues
    }

    pub fn ensure_valid(&self) -> Result<()> {
        let issues = self.validate();
        if issues.is_empty() {
            return Ok(());
        }
        let details = issues
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        anyhow::bail!("Invalid configuration: {details}")
    }

    pub fn date_window(&self) -> DateWindow {
        match (self.mode, self.date_from, self.date_to) {
            (RateMode::Historical, Some(from), Some(to)) => DateWindow::Range { from, to },
            _ => DateWindow::Latest,
        }
    }

    pub fn price_query(&self) -> PriceQuery {
        PriceQuery {
            ticker: self.ticker.clone(),
            window: self.date_window(),
            interval: self.interval,
            sort: self.sort,
            adjusted: self.adjusted,
        }
    }

    pub fn conversion_params(&self) -> ConversionParams {
        ConversionParams {
            mode: self.mode,
            base_currency: self.base_currency.clone(),
            target_currency: self.target_currency.clone(),
            convertible_fields: self.convert_fields.clone(),
        }
    }
}
