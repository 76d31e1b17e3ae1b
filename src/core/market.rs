//! Market data abstractions and query types

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;

use super::error::PipelineError;
use super::table::PriceTable;

/// Aggregate bar size accepted by the market data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Timespan {
    Minute,
    Hour,
    #[default]
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl Display for Timespan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Timespan::Minute => "minute",
                Timespan::Hour => "hour",
                Timespan::Day => "day",
                Timespan::Week => "week",
                Timespan::Month => "month",
                Timespan::Quarter => "quarter",
                Timespan::Year => "year",
            }
        )
    }
}

impl FromStr for Timespan {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "minute" => Ok(Timespan::Minute),
            "hour" => Ok(Timespan::Hour),
            "day" => Ok(Timespan::Day),
            "week" => Ok(Timespan::Week),
            "month" => Ok(Timespan::Month),
            "quarter" => Ok(Timespan::Quarter),
            "year" => Ok(Timespan::Year),
            _ => Err(anyhow::anyhow!("Invalid timespan: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    pub multiplier: u32,
    pub timespan: Timespan,
}

impl Default for Interval {
    fn default() -> Self {
        Interval {
            multiplier: 1,
            timespan: Timespan::Day,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl Display for SortOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SortOrder::Asc => write!(f, "asc"),
            SortOrder::Desc => write!(f, "desc"),
        }
    }
}

/// Which slice of time a source is asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateWindow {
    Latest,
    Range { from: NaiveDate, to: NaiveDate },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PriceQuery {
    pub ticker: String,
    pub window: DateWindow,
    pub interval: Interval,
    pub sort: SortOrder,
    pub adjusted: bool,
}

#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn fetch_prices(&self, query: &PriceQuery) -> Result<PriceTable, PipelineError>;
}
