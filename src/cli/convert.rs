use super::ui;
use crate::core::config::AppConfig;
use crate::core::convert::{ConversionOutcome, ConversionStatus, RateMode, convert_prices};
use crate::core::market::Timespan;
use crate::core::table::RateSnapshot;
use crate::core::{ExchangeRateSource, MarketDataSource, PipelineError};
use crate::providers::{FrankfurterProvider, PolygonProvider};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use comfy_table::Cell;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, warn};

/// Command line overrides applied on top of the configuration file.
#[derive(Debug, Clone, Default)]
pub struct ConvertOptions {
    pub ticker: Option<String>,
    pub target_currency: Option<String>,
    pub timespan: Option<Timespan>,
    pub latest: bool,
    pub json: bool,
}

impl ConvertOptions {
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(ticker) = &self.ticker {
            config.ticker = ticker.clone();
        }
        if let Some(currency) = &self.target_currency {
            config.target_currency = currency.to_uppercase();
        }
        if let Some(timespan) = self.timespan {
            config.interval.timespan = timespan;
        }
        if self.latest {
            config.mode = RateMode::Latest;
        }
    }
}

/// Converted prices plus the rate table enriched with the as-of timestamp.
#[derive(Debug)]
pub struct ConversionReport {
    pub ticker: String,
    pub base_currency: String,
    pub outcome: ConversionOutcome,
    pub rates: Vec<RateSnapshot>,
}

#[derive(Serialize)]
struct JsonReport<'a> {
    ticker: &'a str,
    as_of: DateTime<Utc>,
    currency: &'a str,
    converted: bool,
    skipped_reason: Option<String>,
    unresolved_dates: Vec<NaiveDate>,
    prices: Vec<Map<String, Value>>,
    rates: &'a [RateSnapshot],
}

impl ConversionReport {
    /// Currency the run as a whole was converted into.
    pub fn currency(&self) -> &str {
        match &self.outcome.status {
            ConversionStatus::Converted { currency } => currency,
            ConversionStatus::PassThrough { .. } => &self.base_currency,
        }
    }

    fn unresolved_dates(&self) -> Vec<NaiveDate> {
        self.outcome
            .gaps
            .iter()
            .filter_map(|gap| match gap {
                PipelineError::UnresolvedRateGap { date, .. } => Some(*date),
                _ => None,
            })
            .collect()
    }

    pub fn to_json(&self, date_column: &str) -> Result<String> {
        let report = JsonReport {
            ticker: &self.ticker,
            as_of: self.outcome.as_of,
            currency: self.currency(),
            converted: self.outcome.status.is_converted(),
            skipped_reason: match &self.outcome.status {
                ConversionStatus::PassThrough { reason } => Some(reason.to_string()),
                ConversionStatus::Converted { .. } => None,
            },
            unresolved_dates: self.unresolved_dates(),
            prices: self.outcome.table.records(date_column),
            rates: &self.rates,
        };
        serde_json::to_string_pretty(&report).context("Failed to serialize conversion report")
    }

    pub fn display_as_table(&self) -> String {
        let table_data = &self.outcome.table;
        let fields: Vec<&str> = table_data.field_names().into_iter().collect();

        let mut table = ui::new_styled_table();
        let mut header = vec![ui::header_cell("Date"), ui::header_cell("Timestamp")];
        header.extend(fields.iter().map(|field| {
            if self.outcome.active_fields.iter().any(|f| f == field) {
                ui::header_cell(&format!("{field}*"))
            } else {
                ui::header_cell(field)
            }
        }));
        header.push(ui::header_cell("Currency"));
        table.set_header(header);

        for row in &table_data.rows {
            let mut cells = vec![
                Cell::new(row.date),
                Cell::new(row.timestamp.format("%Y-%m-%d %H:%M")),
            ];
            cells.extend(fields.iter().map(|field| {
                ui::format_optional_cell(row.fields.get(*field), |v| format!("{v:.2}"))
            }));
            let converted =
                self.outcome.status.is_converted() && row.currency != self.base_currency;
            cells.push(ui::currency_cell(&row.currency, converted));
            table.add_row(cells);
        }

        let mut output = format!(
            "Ticker: {}\n\n",
            ui::style_text(&self.ticker, ui::StyleType::Title)
        );
        output.push_str(&table.to_string());
        output.push_str(&format!(
            "\n\n{} {}  {} {}",
            ui::style_text("As of:", ui::StyleType::TotalLabel),
            self.outcome.as_of.format("%Y-%m-%d %H:%M UTC"),
            ui::style_text("Currency:", ui::StyleType::TotalLabel),
            ui::style_text(self.currency(), ui::StyleType::TotalValue),
        ));
        output.push_str(&format!(
            "\n{}",
            ui::style_text("* converted field", ui::StyleType::Subtle)
        ));

        if let ConversionStatus::PassThrough { reason } = &self.outcome.status {
            output.push_str(&format!(
                "\n{}",
                ui::style_text(
                    &format!("Prices left in {}: {reason}", self.base_currency),
                    ui::StyleType::Error
                )
            ));
        }
        let unresolved = self.unresolved_dates();
        if !unresolved.is_empty() {
            let dates = unresolved
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            output.push_str(&format!(
                "\n{}",
                ui::style_text(
                    &format!("No rate to interpolate on {dates}, rows left unconverted"),
                    ui::StyleType::Error
                )
            ));
        }

        output
    }
}

/// Fetches prices and rates concurrently, then converts the prices.
pub async fn convert_with_sources(
    config: &AppConfig,
    market: &(dyn MarketDataSource + Send + Sync),
    rate_source: &(dyn ExchangeRateSource + Send + Sync),
) -> Result<ConversionReport> {
    let query = config.price_query();
    let window = config.date_window();

    let pb = ui::new_spinner("Fetching prices and exchange rates...");
    let fetched = futures::try_join!(
        async {
            market
                .fetch_prices(&query)
                .await
                .with_context(|| format!("Failed to fetch prices for {}", config.ticker))
        },
        async {
            rate_source
                .fetch_rates(&config.base_currency, &window)
                .await
                .with_context(|| format!("Failed to fetch {} rates", config.base_currency))
        },
    );
    pb.finish_and_clear();
    let (prices, rates) = fetched?;

    let outcome = convert_prices(Some(&prices), Some(&rates), &config.conversion_params())
        .with_context(|| format!("Failed to convert prices for {}", config.ticker))?;

    let rates = if outcome.status.is_converted() {
        rates.snapshots(outcome.as_of)
    } else {
        Vec::new()
    };
    if !outcome.gaps.is_empty() {
        warn!(
            unresolved = outcome.gaps.len(),
            "Some price rows could not be converted"
        );
    }

    Ok(ConversionReport {
        ticker: config.ticker.clone(),
        base_currency: config.base_currency.clone(),
        outcome,
        rates,
    })
}

pub async fn run(mut config: AppConfig, options: &ConvertOptions) -> Result<()> {
    options.apply(&mut config);
    config.ensure_valid()?;

    let api_key = config
        .polygon_api_key()
        .context("Polygon API key is not configured")?;
    let market = PolygonProvider::new(&config.providers.polygon, &api_key, &config.http)?;
    let rate_source = FrankfurterProvider::new(&config.providers.frankfurter, &config.http)?;

    let report = convert_with_sources(&config, &market, &rate_source).await?;
    info!(
        rows = report.outcome.table.len(),
        currency = report.currency(),
        "Price data ready to persist"
    );

    if options.json {
        println!("{}", report.to_json(&config.date_column)?);
    } else {
        println!("{}", report.display_as_table());
    }
    Ok(())
}
