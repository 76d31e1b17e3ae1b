//! Aligns a price table with an exchange rate table and converts prices.
//!
//! Two modes are supported. In [`RateMode::Latest`] the rate table holds a
//! single snapshot that is broadcast onto every price row. In
//! [`RateMode::Historical`] rates are left-joined onto prices by calendar date
//! and dates without a quote are filled by linear interpolation between the
//! nearest quoted dates. Interpolated rates are a best-effort estimate, not an
//! observed market rate. Dates that sit before the first or after the last
//! quoted date cannot be interpolated; rows on those dates are passed through
//! unconverted and reported as unresolved gaps.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

use super::error::PipelineError;
use super::table::{ConvertedPrice, ConvertedPriceTable, PriceTable, RateTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateMode {
    Latest,
    #[default]
    Historical,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConversionParams {
    pub mode: RateMode,
    pub base_currency: String,
    pub target_currency: String,
    pub convertible_fields: Vec<String>,
}

/// Outcome of the validity gate.
#[derive(Debug, Clone, PartialEq)]
pub enum Validity {
    Proceed,
    Skip(PipelineError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConversionStatus {
    Converted { currency: String },
    PassThrough { reason: PipelineError },
}

impl ConversionStatus {
    pub fn is_converted(&self) -> bool {
        matches!(self, ConversionStatus::Converted { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConversionOutcome {
    pub table: ConvertedPriceTable,
    /// Latest price timestamp in the table.
    pub as_of: DateTime<Utc>,
    pub status: ConversionStatus,
    /// Convertible fields that were actually present and scaled.
    pub active_fields: Vec<String>,
    /// Row-scoped `UnresolvedRateGap` errors, one per affected date.
    pub gaps: Vec<PipelineError>,
}

/// Decides whether a conversion can run for these inputs.
pub fn check_validity(
    prices: Option<&PriceTable>,
    rates: Option<&RateTable>,
    target_currency: &str,
) -> Validity {
    if prices.is_none_or(|p| p.is_empty()) {
        return Validity::Skip(PipelineError::MissingPriceData);
    }

    match rates {
        None => Validity::Skip(PipelineError::MissingRateData),
        Some(rates) if rates.is_empty() => Validity::Skip(PipelineError::MissingRateData),
        Some(rates) if !rates.has_currency(target_currency) => {
            Validity::Skip(PipelineError::InvalidTargetCurrency {
                currency: target_currency.to_string(),
                base_currency: rates.base_currency.clone(),
            })
        }
        Some(_) => Validity::Proceed,
    }
}

/// Keeps the convertible fields that exist in the price table.
pub fn active_fields(prices: &PriceTable, requested: &[String]) -> Vec<String> {
    let available = prices.field_names();
    requested
        .iter()
        .filter(|field| {
            let present = available.contains(field.as_str());
            if !present {
                warn!(
                    field = %field,
                    available = ?available,
                    "Dropping convertible field missing from price data"
                );
            }
            present
        })
        .cloned()
        .collect()
}

/// Converts `prices` into `params.target_currency` using `rates`.
///
/// Missing price data is fatal. Missing rate data or an unknown target
/// currency yields the prices unchanged, tagged with the base currency, as
/// does a historical run where no row has a quote on both sides.
pub fn convert_prices(
    prices: Option<&PriceTable>,
    rates: Option<&RateTable>,
    params: &ConversionParams,
) -> Result<ConversionOutcome, PipelineError> {
    let validity = check_validity(prices, rates, &params.target_currency);
    if let Validity::Skip(reason) = &validity {
        if !reason.is_recoverable() {
            return Err(reason.clone());
        }
    }
    let prices = prices
        .filter(|prices| !prices.is_empty())
        .ok_or(PipelineError::MissingPriceData)?;
    let fields = active_fields(prices, &params.convertible_fields);

    let (row_rates, status, gaps) = match validity {
        Validity::Skip(reason) => {
            warn!(
                reason = %reason,
                target_currency = %params.target_currency,
                base_currency = %params.base_currency,
                "Skipping currency conversion, prices stay in base currency"
            );
            (
                vec![None; prices.len()],
                ConversionStatus::PassThrough { reason },
                Vec::new(),
            )
        }
        Validity::Proceed => {
            let rates = rates.ok_or(PipelineError::MissingRateData)?;
            let (row_rates, gaps) = match params.mode {
                RateMode::Latest => (
                    broadcast_latest_rate(prices, rates, &params.target_currency)?,
                    Vec::new(),
                ),
                RateMode::Historical => {
                    join_historical_rates(prices, rates, &params.target_currency)
                }
            };
            let status = match gaps.first() {
                // Every row fell outside the quoted range.
                Some(gap) if row_rates.iter().all(Option::is_none) => {
                    warn!(
                        reason = %gap,
                        target_currency = %params.target_currency,
                        "No price row could be converted, prices stay in base currency"
                    );
                    ConversionStatus::PassThrough {
                        reason: gap.clone(),
                    }
                }
                _ => ConversionStatus::Converted {
                    currency: params.target_currency.clone(),
                },
            };
            (row_rates, status, gaps)
        }
    };

    let rows = prices
        .rows
        .iter()
        .zip(row_rates)
        .map(|(row, rate)| {
            let mut converted = ConvertedPrice {
                ticker: row.ticker.clone(),
                timestamp: row.timestamp,
                date: row.date(),
                fields: row.fields.clone(),
                currency: params.base_currency.clone(),
            };
            if let Some(rate) = rate {
                for field in &fields {
                    if let Some(value) = converted.fields.get_mut(field) {
                        *value *= rate;
                    }
                }
                converted.currency = params.target_currency.clone();
            }
            converted
        })
        .collect();

    let table = ConvertedPriceTable { rows };
    let as_of = table.max_timestamp().ok_or(PipelineError::EmptyResult)?;
    debug!(
        rows = table.len(),
        %as_of,
        unresolved = gaps.len(),
        "Currency conversion finished"
    );

    Ok(ConversionOutcome {
        table,
        as_of,
        status,
        active_fields: fields,
        gaps,
    })
}

fn broadcast_latest_rate(
    prices: &PriceTable,
    rates: &RateTable,
    target_currency: &str,
) -> Result<Vec<Option<f64>>, PipelineError> {
    if rates.len() != 1 {
        return Err(PipelineError::malformed(
            "exchange rate",
            format!("expected exactly one latest rate row, got {}", rates.len()),
        ));
    }

    let snapshot = &rates.rows[0];
    let rate = snapshot.rates.get(target_currency).copied().ok_or_else(|| {
        PipelineError::InvalidTargetCurrency {
            currency: target_currency.to_string(),
            base_currency: rates.base_currency.clone(),
        }
    })?;
    if !(rate.is_finite() && rate > 0.0) {
        return Err(PipelineError::malformed(
            "exchange rate",
            format!("{target_currency} rate {rate} on {} is not positive", snapshot.date),
        ));
    }

    debug!(rate, date = %snapshot.date, "Broadcasting latest rate onto all price rows");
    Ok(vec![Some(rate); prices.len()])
}

fn join_historical_rates(
    prices: &PriceTable,
    rates: &RateTable,
    target_currency: &str,
) -> (Vec<Option<f64>>, Vec<PipelineError>) {
    let quoted: BTreeMap<NaiveDate, f64> = rates
        .rows
        .iter()
        .filter_map(|row| row.rates.get(target_currency).map(|rate| (row.date, *rate)))
        .collect();

    // Quoted dates without a price row still anchor the interpolation.
    // Several intraday rows can share a date; they share its rate.
    let mut series: BTreeMap<NaiveDate, Option<f64>> =
        quoted.iter().map(|(date, rate)| (*date, Some(*rate))).collect();
    let price_dates: BTreeSet<NaiveDate> = prices.rows.iter().map(|row| row.date()).collect();
    for date in &price_dates {
        series.entry(*date).or_insert(None);
    }

    let missing = price_dates
        .iter()
        .filter(|date| !quoted.contains_key(*date))
        .count();
    if missing > 0 {
        debug!(
            missing,
            currency = target_currency,
            "Interpolating rates for dates without a quote"
        );
    }
    let filled = interpolate_gaps(&series);

    let gaps = price_dates
        .iter()
        .filter(|date| filled.get(*date).copied().flatten().is_none())
        .map(|date| {
            warn!(
                currency = target_currency,
                date = %date,
                "No neighbouring rate to interpolate from, leaving rows unconverted"
            );
            PipelineError::UnresolvedRateGap {
                currency: target_currency.to_string(),
                date: *date,
            }
        })
        .collect();

    let row_rates = prices
        .rows
        .iter()
        .map(|row| filled.get(&row.date()).copied().flatten())
        .collect();

    (row_rates, gaps)
}

/// Fills missing rates by linear interpolation over calendar days.
///
/// A missing date between quoted dates `d1` and `d2` gets
/// `r1 + (r2 - r1) * (d - d1) / (d2 - d1)`. Dates with no quote on one side
/// stay `None`.
pub fn interpolate_gaps(
    series: &BTreeMap<NaiveDate, Option<f64>>,
) -> BTreeMap<NaiveDate, Option<f64>> {
    let known: Vec<(NaiveDate, f64)> = series
        .iter()
        .filter_map(|(date, rate)| rate.map(|rate| (*date, rate)))
        .collect();

    series
        .iter()
        .map(|(date, rate)| {
            let filled = rate.or_else(|| {
                let next = known.partition_point(|(known_date, _)| known_date < date);
                if next == 0 || next == known.len() {
                    return None;
                }
                let (d1, r1) = known[next - 1];
                let (d2, r2) = known[next];
                let span = (d2 - d1).num_days() as f64;
                let offset = (*date - d1).num_days() as f64;
                Some(r1 + (r2 - r1) * offset / span)
            });
            (*date, filled)
        })
        .collect()
}
