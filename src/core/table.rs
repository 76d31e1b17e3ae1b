//! Tabular price and exchange rate data exchanged between sources and the engine

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// One traded interval for a ticker.
///
/// The calendar date is always derived from `timestamp` (UTC), so a row can
/// never carry a date that disagrees with its instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceObservation {
    pub ticker: String,
    pub timestamp: DateTime<Utc>,
    pub fields: BTreeMap<String, f64>,
}

impl PriceObservation {
    pub fn new(ticker: &str, timestamp: DateTime<Utc>, fields: BTreeMap<String, f64>) -> Self {
        PriceObservation {
            ticker: ticker.to_string(),
            timestamp,
            fields,
        }
    }

    pub fn from_epoch_millis(
        ticker: &str,
        millis: i64,
        fields: BTreeMap<String, f64>,
    ) -> Option<Self> {
        DateTime::from_timestamp_millis(millis).map(|ts| Self::new(ticker, ts, fields))
    }

    pub fn date(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PriceTable {
    pub ticker: String,
    pub rows: Vec<PriceObservation>,
}

impl PriceTable {
    pub fn new(ticker: &str, rows: Vec<PriceObservation>) -> Self {
        PriceTable {
            ticker: ticker.to_string(),
            rows,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Every field name present in at least one row.
    pub fn field_names(&self) -> BTreeSet<&str> {
        self.rows
            .iter()
            .flat_map(|row| row.fields.keys().map(String::as_str))
            .collect()
    }
}

/// Quote rates for one base currency on one date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateObservation {
    pub date: NaiveDate,
    pub base_currency: String,
    pub rates: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateTable {
    pub base_currency: String,
    pub rows: Vec<RateObservation>,
}

impl RateTable {
    pub fn new(base_currency: &str, rows: Vec<RateObservation>) -> Self {
        RateTable {
            base_currency: base_currency.to_string(),
            rows,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Quote currencies available as columns, i.e. the union over all rows.
    pub fn currencies(&self) -> BTreeSet<&str> {
        self.rows
            .iter()
            .flat_map(|row| row.rates.keys().map(String::as_str))
            .collect()
    }

    pub fn has_currency(&self, currency: &str) -> bool {
        self.rows.iter().any(|row| row.rates.contains_key(currency))
    }

    /// Drops the date column and stamps every row with the run's as-of time.
    pub fn snapshots(&self, as_of: DateTime<Utc>) -> Vec<RateSnapshot> {
        self.rows
            .iter()
            .map(|row| RateSnapshot {
                base_currency: row.base_currency.clone(),
                timestamp: as_of,
                rates: row.rates.clone(),
            })
            .collect()
    }
}

/// Exchange rate row enriched for persistence next to the converted prices.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateSnapshot {
    pub base_currency: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub rates: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConvertedPrice {
    pub ticker: String,
    pub timestamp: DateTime<Utc>,
    pub date: NaiveDate,
    pub fields: BTreeMap<String, f64>,
    pub currency: String,
}

impl ConvertedPrice {
    /// Flattens the row into a single record, naming the date column `date_column`.
    pub fn to_record(&self, date_column: &str) -> Map<String, Value> {
        let mut record: Map<String, Value> = self
            .fields
            .iter()
            .map(|(name, value)| (name.clone(), Value::from(*value)))
            .collect();
        record.insert("ticker".to_string(), Value::from(self.ticker.clone()));
        record.insert(
            "timestamp".to_string(),
            Value::from(self.timestamp.to_rfc3339()),
        );
        record.insert(date_column.to_string(), Value::from(self.date.to_string()));
        record.insert("currency".to_string(), Value::from(self.currency.clone()));
        record
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConvertedPriceTable {
    pub rows: Vec<ConvertedPrice>,
}

impl ConvertedPriceTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn max_timestamp(&self) -> Option<DateTime<Utc>> {
        self.rows.iter().map(|row| row.timestamp).max()
    }

    pub fn field_names(&self) -> BTreeSet<&str> {
        self.rows
            .iter()
            .flat_map(|row| row.fields.keys().map(String::as_str))
            .collect()
    }

    pub fn records(&self, date_column: &str) -> Vec<Map<String, Value>> {
        self.rows
            .iter()
            .map(|row| row.to_record(date_column))
            .collect()
    }
}
