use std::fs;
use tracing::{error, info};

mod test_utils {
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    pub async fn create_polygon_mock_server(
        ticker: &str,
        from: &str,
        to: &str,
        mock_response: &str,
    ) -> MockServer {
        let mock_server = MockServer::start().await;
        let url_path = format!("/v2/aggs/ticker/{ticker}/range/1/day/{from}/{to}");

        Mock::given(method("GET"))
            .and(path(&url_path))
            .and(query_param("apiKey", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_string(mock_response))
            .mount(&mock_server)
            .await;

        mock_server
    }

    pub async fn create_frankfurter_mock_server(
        from: &str,
        to: &str,
        status: u16,
        mock_response: &str,
    ) -> MockServer {
        let mock_server = MockServer::start().await;
        let url_path = format!("/v1/{from}..{to}");

        Mock::given(method("GET"))
            .and(path(&url_path))
            .and(query_param("base", "USD"))
            .respond_with(ResponseTemplate::new(status).set_body_string(mock_response))
            .mount(&mock_server)
            .await;

        mock_server
    }
}

const POLYGON_RESPONSE: &str = r#"{
    "ticker": "AAPL",
    "status": "OK",
    "resultsCount": 3,
    "results": [
        {"v": 1000, "o": 100.0, "c": 100.0, "h": 101.0, "l": 99.0, "t": 1704067200000},
        {"v": 1100, "o": 100.0, "c": 100.0, "h": 101.0, "l": 99.0, "t": 1704153600000},
        {"v": 1200, "o": 100.0, "c": 100.0, "h": 101.0, "l": 99.0, "t": 1704240000000}
    ]
}"#;

fn write_config(polygon_url: &str, frankfurter_url: &str, target: &str) -> tempfile::NamedTempFile {
    let config_file = tempfile::NamedTempFile::new().expect("Failed to create temp file");
    let config_content = format!(
        r#"
        ticker: "AAPL"
        mode: historical
        date_from: "2024-01-01"
        date_to: "2024-01-03"
        base_currency: "USD"
        target_currency: "{target}"
        convert_fields: ["o", "c", "h", "l", "missing"]
        providers:
          polygon:
            base_url: {polygon_url}
            api_key: "test-key"
          frankfurter:
            base_url: {frankfurter_url}
        http:
          timeout_secs: 5
          retries: 0
    "#
    );

    fs::write(config_file.path(), &config_content).expect("Failed to write config file");
    config_file
}

fn convert_options() -> stockfx::ConvertOptions {
    stockfx::ConvertOptions {
        json: true,
        ..Default::default()
    }
}

#[test_log::test(tokio::test)]
async fn test_full_app_flow_with_mock() {
    let polygon =
        test_utils::create_polygon_mock_server("AAPL", "2024-01-01", "2024-01-03", POLYGON_RESPONSE)
            .await;
    // 2024-01-02 has no quote and is interpolated
    let frankfurter = test_utils::create_frankfurter_mock_server(
        "2024-01-01",
        "2024-01-03",
        200,
        r#"{
            "base": "USD",
            "rates": {
                "2024-01-01": {"EUR": 0.9, "GBP": 0.8},
                "2024-01-03": {"EUR": 1.1, "GBP": 0.8}
            }
        }"#,
    )
    .await;

    let config_file = write_config(&polygon.uri(), &frankfurter.uri(), "EUR");

    let result = stockfx::run_command(
        stockfx::AppCommand::Convert(convert_options()),
        Some(config_file.path().to_str().unwrap()),
    )
    .await;
    assert!(
        result.is_ok(),
        "Main function failed with: {:?}",
        result.err()
    );
}

#[test_log::test(tokio::test)]
async fn test_sources_feed_the_conversion() {
    use stockfx::cli::convert::convert_with_sources;
    use stockfx::core::config::AppConfig;
    use stockfx::providers::{FrankfurterProvider, PolygonProvider};

    let polygon =
        test_utils::create_polygon_mock_server("AAPL", "2024-01-01", "2024-01-03", POLYGON_RESPONSE)
            .await;
    let frankfurter = test_utils::create_frankfurter_mock_server(
        "2024-01-01",
        "2024-01-03",
        200,
        r#"{
            "base": "USD",
            "rates": {
                "2024-01-01": {"EUR": 0.9},
                "2024-01-03": {"EUR": 1.1}
            }
        }"#,
    )
    .await;

    let config_file = write_config(&polygon.uri(), &frankfurter.uri(), "EUR");
    let config = AppConfig::load_from_path(config_file.path()).unwrap();
    let market = PolygonProvider::new(&config.providers.polygon, "test-key", &config.http).unwrap();
    let rates = FrankfurterProvider::new(&config.providers.frankfurter, &config.http).unwrap();

    let report = convert_with_sources(&config, &market, &rates).await.unwrap();
    info!(?report, "Conversion report");

    let closes: Vec<f64> = report
        .outcome
        .table
        .rows
        .iter()
        .map(|row| row.fields["c"])
        .collect();
    assert_eq!(closes.len(), 3);
    assert!((closes[0] - 90.0).abs() < 1e-9);
    assert!((closes[1] - 100.0).abs() < 1e-9);
    assert!((closes[2] - 110.0).abs() < 1e-9);
    assert!(report.outcome.table.rows.iter().all(|row| row.currency == "EUR"));
    assert_eq!(report.outcome.table.rows[0].fields["v"], 1000.0);
    assert_eq!(report.outcome.active_fields, vec!["o", "c", "h", "l"]);
    assert_eq!(report.rates.len(), 2);
}

#[test_log::test(tokio::test)]
async fn test_invalid_target_currency_still_succeeds() {
    let polygon =
        test_utils::create_polygon_mock_server("AAPL", "2024-01-01", "2024-01-03", POLYGON_RESPONSE)
            .await;
    let frankfurter = test_utils::create_frankfurter_mock_server(
        "2024-01-01",
        "2024-01-03",
        200,
        r#"{"base": "USD", "rates": {"2024-01-01": {"EUR": 0.9}}}"#,
    )
    .await;

    let config_file = write_config(&polygon.uri(), &frankfurter.uri(), "XXX");

    let result = stockfx::run_command(
        stockfx::AppCommand::Convert(convert_options()),
        Some(config_file.path().to_str().unwrap()),
    )
    .await;
    assert!(
        result.is_ok(),
        "Main function failed with: {:?}",
        result.err()
    );
}

#[test_log::test(tokio::test)]
async fn test_rate_source_failure_aborts() {
    let polygon =
        test_utils::create_polygon_mock_server("AAPL", "2024-01-01", "2024-01-03", POLYGON_RESPONSE)
            .await;
    let frankfurter =
        test_utils::create_frankfurter_mock_server("2024-01-01", "2024-01-03", 500, "boom").await;

    let config_file = write_config(&polygon.uri(), &frankfurter.uri(), "EUR");

    let result = stockfx::run_command(
        stockfx::AppCommand::Convert(convert_options()),
        Some(config_file.path().to_str().unwrap()),
    )
    .await;

    match result {
        Ok(()) => panic!("Run should fail when the rate source is down"),
        Err(e) => {
            error!("Run failed as expected: {e:?}");
            assert!(format!("{e:?}").contains("Frankfurter is unavailable"));
        }
    }
}

#[test_log::test(tokio::test)]
#[ignore = "hits the live Frankfurter API"]
async fn test_real_frankfurter_api() {
    use stockfx::core::ExchangeRateSource;
    use stockfx::core::config::{FrankfurterProviderConfig, HttpConfig};
    use stockfx::core::market::DateWindow;
    use stockfx::providers::FrankfurterProvider;

    let provider =
        FrankfurterProvider::new(&FrankfurterProviderConfig::default(), &HttpConfig::default())
            .unwrap();

    match provider.fetch_rates("USD", &DateWindow::Latest).await {
        Ok(table) => {
            info!(?table, "Received latest rates");
            assert_eq!(table.len(), 1);
            assert!(table.has_currency("EUR"));
        }
        Err(e) => {
            error!("Frankfurter request failed: {e}\n{e:?}");
            panic!("Frankfurter request failed: {e}");
        }
    }
}
