use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::{debug, info, instrument};

use super::util::{build_client, get_body};
use crate::core::config::{FrankfurterProviderConfig, HttpConfig};
use crate::core::currency::ExchangeRateSource;
use crate::core::error::PipelineError;
use crate::core::market::DateWindow;
use crate::core::table::{RateObservation, RateTable};

const SOURCE: &str = "Frankfurter";

/// Exchange rates published by the ECB, served by the Frankfurter API.
pub struct FrankfurterProvider {
    base_url: String,
    api_version: String,
    http: HttpConfig,
    client: reqwest::Client,
}

impl FrankfurterProvider {
    pub fn new(config: &FrankfurterProviderConfig, http: &HttpConfig) -> Result<Self> {
        let client = build_client(http).context("Failed to build Frankfurter HTTP client")?;
        Ok(FrankfurterProvider {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_version: config.api_version.clone(),
            http: http.clone(),
            client,
        })
    }

    fn rates_url(&self, base_currency: &str, window: &DateWindow) -> String {
        match window {
            DateWindow::Latest => format!(
                "{}/{}/latest?base={}",
                self.base_url, self.api_version, base_currency
            ),
            DateWindow::Range { from, to } => format!(
                "{}/{}/{}..{}?base={}",
                self.base_url, self.api_version, from, to, base_currency
            ),
        }
    }
}

#[derive(Debug, Deserialize)]
struct FrankfurterResponse {
    base: Option<String>,
    date: Option<String>,
    rates: Option<RatesPayload>,
}

/// `latest` answers with a flat currency map, date ranges with one map per date.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RatesPayload {
    Snapshot(BTreeMap<String, f64>),
    Series(BTreeMap<String, BTreeMap<String, f64>>),
}

fn parse_date(date_str: &str) -> Result<NaiveDate, PipelineError> {
    NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
        .map_err(|e| PipelineError::malformed(SOURCE, format!("invalid date `{date_str}`: {e}")))
}

fn check_rates(date: NaiveDate, rates: &BTreeMap<String, f64>) -> Result<(), PipelineError> {
    match rates
        .iter()
        .find(|(_, rate)| !(rate.is_finite() && **rate > 0.0))
    {
        Some((currency, rate)) => Err(PipelineError::malformed(
            SOURCE,
            format!("{currency} rate {rate} on {date} is not positive"),
        )),
        None => Ok(()),
    }
}

fn parse_rates(base_currency: &str, body: &str, today: NaiveDate) -> Result<RateTable, PipelineError> {
    let data: FrankfurterResponse = serde_json::from_str(body).map_err(|e| {
        PipelineError::malformed(SOURCE, format!("failed to parse {base_currency} rates: {e}"))
    })?;

    let base = data.base.unwrap_or_else(|| base_currency.to_string());
    let payload = data
        .rates
        .ok_or_else(|| PipelineError::malformed(SOURCE, "response has no `rates`"))?;

    let rows = match payload {
        RatesPayload::Snapshot(rates) => {
            let date = match data.date.as_deref() {
                Some(date_str) => parse_date(date_str)?,
                None => today,
            };
            vec![(date, rates)]
        }
        RatesPayload::Series(series) => series
            .into_iter()
            .map(|(date_str, rates)| Ok((parse_date(&date_str)?, rates)))
            .collect::<Result<Vec<_>, PipelineError>>()?,
    };

    let rows = rows
        .into_iter()
        .map(|(date, rates)| {
            check_rates(date, &rates)?;
            Ok(RateObservation {
                date,
                base_currency: base.clone(),
                rates,
            })
        })
        .collect::<Result<Vec<_>, PipelineError>>()?;

    Ok(RateTable::new(&base, rows))
}

#[async_trait]
impl ExchangeRateSource for FrankfurterProvider {
    #[instrument(
        name = "FrankfurterRateFetch",
        skip(self, window),
        fields(base = %base_currency)
    )]
    async fn fetch_rates(
        &self,
        base_currency: &str,
        window: &DateWindow,
    ) -> Result<RateTable, PipelineError> {
        let url = self.rates_url(base_currency, window);
        debug!("Requesting exchange rates from {}", url);

        let body = get_body(&self.client, &url, &self.http, SOURCE).await?;
        let table = parse_rates(base_currency, &body, Utc::now().date_naive())?;

        info!(
            rows = table.len(),
            currencies = table.currencies().len(),
            "Fetched exchange rates for {}",
            base_currency
        );
        Ok(table)
    }
}
