use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, info, instrument};

use super::util::{build_client, get_body};
use crate::core::config::{HttpConfig, PolygonProviderConfig};
use crate::core::error::PipelineError;
use crate::core::market::{DateWindow, MarketDataSource, PriceQuery};
use crate::core::table::{PriceObservation, PriceTable};

const SOURCE: &str = "Polygon";

/// Stock aggregates from the Polygon.io REST API.
pub struct PolygonProvider {
    base_url: String,
    api_version: String,
    api_key: String,
    http: HttpConfig,
    client: reqwest::Client,
}

impl PolygonProvider {
    pub fn new(config: &PolygonProviderConfig, api_key: &str, http: &HttpConfig) -> Result<Self> {
        let client = build_client(http).context("Failed to build Polygon HTTP client")?;
        Ok(PolygonProvider {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_version: config.api_version.clone(),
            api_key: api_key.to_string(),
            http: http.clone(),
            client,
        })
    }

    /// Aggregates URL without the API key, safe to log.
    fn aggregates_url(&self, query: &PriceQuery, today: NaiveDate) -> String {
        let (multiplier, from, to) = match query.window {
            DateWindow::Latest => (1, today - Duration::days(1), today),
            DateWindow::Range { from, to } => (query.interval.multiplier, from, to),
        };
        format!(
            "{}/{}/aggs/ticker/{}/range/{}/{}/{}/{}?adjusted={}&sort={}",
            self.base_url,
            self.api_version,
            query.ticker,
            multiplier,
            query.interval.timespan,
            from,
            to,
            query.adjusted,
            query.sort
        )
    }
}

#[derive(Deserialize, Debug)]
struct AggregatesResponse {
    results: Option<Vec<Map<String, Value>>>,
    #[serde(alias = "resultsCount")]
    results_count: Option<u64>,
    status: Option<String>,
}

fn parse_bar(ticker: &str, bar: &Map<String, Value>) -> Result<PriceObservation, PipelineError> {
    let millis = bar
        .get("t")
        .and_then(|t| t.as_i64().or_else(|| t.as_f64().map(|f| f as i64)))
        .ok_or_else(|| PipelineError::malformed(SOURCE, "aggregate bar without epoch `t`"))?;

    let fields: BTreeMap<String, f64> = bar
        .iter()
        .filter(|(key, _)| key.as_str() != "t")
        .filter_map(|(key, value)| value.as_f64().map(|v| (key.clone(), v)))
        .collect();

    PriceObservation::from_epoch_millis(ticker, millis, fields).ok_or_else(|| {
        PipelineError::malformed(SOURCE, format!("epoch `t` out of range: {millis}"))
    })
}

fn parse_aggregates(ticker: &str, body: &str) -> Result<PriceTable, PipelineError> {
    let data: AggregatesResponse = serde_json::from_str(body).map_err(|e| {
        PipelineError::malformed(SOURCE, format!("failed to parse response for {ticker}: {e}"))
    })?;

    let bars = match (data.results, data.results_count) {
        (Some(bars), _) => bars,
        // Polygon omits `results` entirely when the window holds no bars.
        (None, Some(0)) => Vec::new(),
        (None, _) => {
            return Err(PipelineError::malformed(
                SOURCE,
                format!(
                    "response for {ticker} has no `results` (status: {})",
                    data.status.as_deref().unwrap_or("unknown")
                ),
            ));
        }
    };

    let rows = bars
        .iter()
        .map(|bar| parse_bar(ticker, bar))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(PriceTable::new(ticker, rows))
}

#[async_trait]
impl MarketDataSource for PolygonProvider {
    #[instrument(
        name = "PolygonPriceFetch",
        skip(self, query),
        fields(ticker = %query.ticker)
    )]
    async fn fetch_prices(&self, query: &PriceQuery) -> Result<PriceTable, PipelineError> {
        let url = self.aggregates_url(query, Utc::now().date_naive());
        debug!("Requesting price data from {}", url);

        let authenticated = format!("{}&apiKey={}", url, self.api_key);
        let body = get_body(&self.client, &authenticated, &self.http, SOURCE).await?;
        let table = parse_aggregates(&query.ticker, &body)?;

        info!(rows = table.len(), "Fetched price data for {}", query.ticker);
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::market::{Interval, SortOrder, Timespan};
    use wiremock::matchers::{method, path, path_regex, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(base_url: &str) -> PolygonProvider {
        let config = PolygonProviderConfig {
            base_url: base_url.to_string(),
            ..Default::default()
        };
        let http = HttpConfig {
            retries: 0,
            ..Default::default()
        };
        PolygonProvider::new(&config, "test-key", &http).unwrap()
    }

    #[tokio::test]
    async fn test_transport_error_does_not_leak_api_key() {
        let config = PolygonProviderConfig {
            // Nothing listens on port 9 locally.
            base_url: "http://127.0.0.1:9".to_string(),
            ..Default::default()
        };
        let http = HttpConfig {
            timeout_secs: 1,
            retries: 1,
            retry_delay_ms: 10,
        };
        let provider = PolygonProvider::new(&config, "SECRET-KEY-123", &http).unwrap();

        let err = provider.fetch_prices(&range_query()).await.unwrap_err();
        assert!(matches!(err, PipelineError::SourceUnavailable { .. }));
        assert!(!err.to_string().contains("SECRET-KEY-123"));
        assert!(!format!("{err:?}").contains("apiKey"));
    }

    fn range_query() -> PriceQuery {
        PriceQuery {
            ticker: "AAPL".to_string(),
            window: DateWindow::Range {
                from: "2024-01-02".parse().unwrap(),
                to: "2024-01-03".parse().unwrap(),
            },
            interval: Interval {
                multiplier: 1,
                timespan: Timespan::Day,
            },
            sort: SortOrder::Asc,
            adjusted: true,
        }
    }

    async fn create_mock_server(status: u16, mock_response: &str) -> MockServer {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/aggs/ticker/AAPL/range/1/day/2024-01-02/2024-01-03"))
            .and(query_param("apiKey", "test-key"))
            .and(query_param("adjusted", "true"))
            .and(query_param("sort", "asc"))
            .respond_with(ResponseTemplate::new(status).set_body_string(mock_response))
            .mount(&mock_server)
            .await;
        mock_server
    }

    #[test]
    fn test_latest_url_spans_yesterday_to_today() {
        let provider = provider("http://localhost/");
        let mut query = range_query();
        query.window = DateWindow::Latest;
        query.interval.multiplier = 5;

        let url = provider.aggregates_url(&query, "2024-06-03".parse().unwrap());
        assert_eq!(
            url,
            "http://localhost/v2/aggs/ticker/AAPL/range/1/day/2024-06-02/2024-06-03?adjusted=true&sort=asc"
        );
        assert!(!url.contains("test-key"));
    }

    #[tokio::test]
    async fn test_successful_price_fetch() {
        let mock_response = r#"{
            "ticker": "AAPL",
            "status": "OK",
            "resultsCount": 2,
            "results": [
                {"v": 1000, "vw": 185.1, "o": 187.15, "c": 185.64, "h": 188.44, "l": 183.89, "t": 1704171600000, "n": 10},
                {"v": 2000, "vw": 184.3, "o": 184.22, "c": 184.25, "h": 185.88, "l": 183.43, "t": 1704258000000, "n": 20}
            ]
        }"#;
        let mock_server = create_mock_server(200, mock_response).await;

        let table = provider(&mock_server.uri())
            .fetch_prices(&range_query())
            .await
            .unwrap();

        assert_eq!(table.ticker, "AAPL");
        assert_eq!(table.len(), 2);
        let first = &table.rows[0];
        assert_eq!(first.ticker, "AAPL");
        assert_eq!(first.fields["c"], 185.64);
        assert_eq!(first.fields["v"], 1000.0);
        assert!(!first.fields.contains_key("t"));
        assert_eq!(first.date(), "2024-01-02".parse::<NaiveDate>().unwrap());
    }

    #[tokio::test]
    async fn test_empty_window_yields_empty_table() {
        let mock_response = r#"{"ticker": "AAPL", "status": "OK", "resultsCount": 0}"#;
        let mock_server = create_mock_server(200, mock_response).await;

        let table = provider(&mock_server.uri())
            .fetch_prices(&range_query())
            .await
            .unwrap();
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_missing_results_is_malformed() {
        let mock_response = r#"{"status": "ERROR", "error": "Unknown API Key"}"#;
        let mock_server = create_mock_server(200, mock_response).await;

        let err = provider(&mock_server.uri())
            .fetch_prices(&range_query())
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Malformed Polygon payload: response for AAPL has no `results` (status: ERROR)"
        );
    }

    #[tokio::test]
    async fn test_bar_without_timestamp_is_malformed() {
        let mock_response = r#"{"resultsCount": 1, "results": [{"c": 1.0}]}"#;
        let mock_server = create_mock_server(200, mock_response).await;

        let result = provider(&mock_server.uri())
            .fetch_prices(&range_query())
            .await;
        assert!(matches!(
            result,
            Err(PipelineError::MalformedSourcePayload { .. })
        ));
    }

    #[tokio::test]
    async fn test_http_error_is_source_unavailable() {
        let mock_server = create_mock_server(403, "forbidden").await;

        let err = provider(&mock_server.uri())
            .fetch_prices(&range_query())
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Polygon is unavailable: HTTP 403 Forbidden: forbidden"
        );
    }

    #[tokio::test]
    async fn test_latest_fetch_hits_daily_range() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(
                r"^/v2/aggs/ticker/AAPL/range/1/day/\d{4}-\d{2}-\d{2}/\d{4}-\d{2}-\d{2}$",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"resultsCount": 1, "results": [{"c": 10.0, "t": 1717200000000}]}"#,
            ))
            .mount(&mock_server)
            .await;

        let mut query = range_query();
        query.window = DateWindow::Latest;
        let table = provider(&mock_server.uri())
            .fetch_prices(&query)
            .await
            .unwrap();
        assert_eq!(table.len(), 1);
    }
}
