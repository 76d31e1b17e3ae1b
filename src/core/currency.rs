//! Exchange rate abstractions

use async_trait::async_trait;

use super::error::PipelineError;
use super::market::DateWindow;
use super::table::RateTable;

#[async_trait]
pub trait ExchangeRateSource: Send + Sync {
    /// Returns one row for `DateWindow::Latest`, one row per quoted date otherwise.
    async fn fetch_rates(
        &self,
        base_currency: &str,
        window: &DateWindow,
    ) -> Result<RateTable, PipelineError>;
}
