//! Error kinds raised by the sources and the conversion engine

use chrono::NaiveDate;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("No stock price data available to convert")]
    MissingPriceData,

    #[error("No exchange rate data available")]
    MissingRateData,

    #[error("Currency {currency} is not quoted against {base_currency}")]
    InvalidTargetCurrency {
        currency: String,
        base_currency: String,
    },

    #[error("No {currency} rate on or around {date}")]
    UnresolvedRateGap { currency: String, date: NaiveDate },

    #[error("Converted price table is empty")]
    EmptyResult,

    #[error("{source_name} is unavailable: {reason}")]
    SourceUnavailable {
        source_name: &'static str,
        reason: String,
    },

    #[error("Malformed {source_name} payload: {detail}")]
    MalformedSourcePayload {
        source_name: &'static str,
        detail: String,
    },
}

impl PipelineError {
    pub fn unavailable(source_name: &'static str, reason: impl Into<String>) -> Self {
        PipelineError::SourceUnavailable {
            source_name,
            reason: reason.into(),
        }
    }

    pub fn malformed(source_name: &'static str, detail: impl Into<String>) -> Self {
        PipelineError::MalformedSourcePayload {
            source_name,
            detail: detail.into(),
        }
    }

    /// Whether the run can continue with unconverted prices.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PipelineError::MissingRateData
                | PipelineError::InvalidTargetCurrency { .. }
                | PipelineError::UnresolvedRateGap { .. }
        )
    }
}
