//! End-to-end tests for the pooled HTTP strategy

mod common;

use common::test_config;
use pagepress::{Conversion, ConversionSettings, Strategy};

#[tokio::test]
async fn converts_over_the_http_router() {
    let conversion = Conversion::new(test_config(Strategy::PooledHttp, 1)).unwrap();

    let result = conversion
        .convert("<h1>aa</h1><pagebreak/><h1>bb</h1>")
        .await
        .unwrap();
    assert_eq!(result.page_count, 2);
    assert!(String::from_utf8(result.data).unwrap().contains("<h1>bb</h1>"));
    assert!(result.logs.iter().any(|record| record.user_level));

    conversion.kill().await;
}

#[tokio::test]
async fn render_errors_surface_as_failures() {
    let conversion = Conversion::new(test_config(Strategy::PooledHttp, 1)).unwrap();

    // the markup engine cannot render a url
    let settings = ConversionSettings {
        url: Some("https://example.com".to_string()),
        ..ConversionSettings::default()
    };
    let err = conversion.convert(settings).await.unwrap_err();
    assert!(!err.is_timeout());

    conversion.kill().await;
}

#[tokio::test]
async fn http_timeout_carries_the_flag() {
    let conversion = Conversion::new(test_config(Strategy::PooledHttp, 1)).unwrap();

    let settings = ConversionSettings {
        wait_for_js: true,
        timeout_ms: Some(300),
        ..ConversionSettings::from_html("<p>never ready</p>")
    };
    let err = conversion.convert(settings).await.unwrap_err();
    assert!(err.is_timeout(), "expected a timeout, got: {}", err);

    conversion.kill().await;
}
