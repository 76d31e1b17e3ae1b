//! Core business logic abstractions

pub mod config;
pub mod convert;
pub mod currency;
pub mod error;
pub mod log;
pub mod market;
pub mod table;

// Re-export main types for cleaner imports
pub use convert::{ConversionOutcome, ConversionParams, RateMode, convert_prices};
pub use currency::ExchangeRateSource;
pub use error::PipelineError;
pub use market::{DateWindow, MarketDataSource, PriceQuery};
pub use table::{PriceTable, RateTable};
