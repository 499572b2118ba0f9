//! End-to-end tests for the pooled pipe strategy

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::test_config;
use pagepress::{Conversion, ConversionSettings, Strategy};

#[tokio::test]
async fn converts_html_and_reports_page_count() {
    let conversion = Conversion::new(test_config(Strategy::PooledPipe, 1)).unwrap();

    let result = conversion
        .convert("<h1>aa</h1><pagebreak/><h1>bb</h1>")
        .await
        .unwrap();
    assert_eq!(result.page_count, 2);

    let text = String::from_utf8(result.data.clone()).unwrap();
    assert!(text.contains("<h1>aa</h1>"));
    assert!(text.contains("<h1>bb</h1>"));

    // page logs arrive in emission order
    let page_logs: Vec<&str> = result
        .logs
        .iter()
        .filter(|record| record.user_level)
        .map(|record| record.message.as_str())
        .collect();
    assert_eq!(page_logs.len(), 2);
    assert!(page_logs[0].contains("page 1: aa"));
    assert!(page_logs[1].contains("page 2: bb"));

    conversion.kill().await;
}

#[tokio::test]
async fn disabled_log_collection_returns_no_logs() {
    let conversion = Conversion::new(test_config(Strategy::PooledPipe, 1)).unwrap();

    let settings = ConversionSettings {
        collect_logs: Some(false),
        ..ConversionSettings::from_html("<p>quiet</p>")
    };
    let result = conversion.convert(settings).await.unwrap();
    assert_eq!(result.page_count, 1);
    assert!(result.logs.is_empty());

    conversion.kill().await;
}

#[tokio::test]
async fn wait_for_js_times_out_with_the_flag_set() {
    let conversion = Conversion::new(test_config(Strategy::PooledPipe, 1)).unwrap();

    let settings = ConversionSettings {
        wait_for_js: true,
        timeout_ms: Some(300),
        ..ConversionSettings::from_html("<p>never ready</p>")
    };
    let started = Instant::now();
    let err = conversion.convert(settings).await.unwrap_err();
    assert!(err.is_timeout(), "expected a timeout, got: {}", err);
    assert!(
        started.elapsed() < Duration::from_secs(5),
        "timeout took {:?}",
        started.elapsed()
    );

    conversion.kill().await;
}

#[tokio::test]
async fn concurrent_tasks_resolve_to_the_right_callers() {
    let conversion = Conversion::new(test_config(Strategy::PooledPipe, 2)).unwrap();

    let single = conversion.convert(ConversionSettings::from_html("<p>alpha</p>"));
    let triple = conversion.convert(ConversionSettings::from_html(
        "<p>b1</p><pagebreak/><p>b2</p><pagebreak/><p>b3</p>",
    ));
    let (single, triple) = tokio::join!(single, triple);

    let single = single.unwrap();
    assert_eq!(single.page_count, 1);
    assert!(String::from_utf8(single.data).unwrap().contains("alpha"));

    let triple = triple.unwrap();
    assert_eq!(triple.page_count, 3);
    assert!(String::from_utf8(triple.data).unwrap().contains("b3"));

    conversion.kill().await;
}

#[tokio::test]
async fn tasks_queue_for_a_busy_worker() {
    let conversion = Conversion::new(test_config(Strategy::PooledPipe, 1)).unwrap();

    let slow = conversion.convert(ConversionSettings {
        delay_ms: Some(300),
        ..ConversionSettings::from_html("<p>slow</p>")
    });
    let queued = conversion.convert(ConversionSettings::from_html("<p>queued</p>"));
    let (slow, queued) = tokio::join!(slow, queued);
    assert_eq!(slow.unwrap().page_count, 1);
    assert_eq!(queued.unwrap().page_count, 1);

    conversion.kill().await;
}

#[tokio::test]
async fn crashed_worker_fails_its_task_and_is_respawned() {
    let conversion = Arc::new(Conversion::new(test_config(Strategy::PooledPipe, 1)).unwrap());

    // warm the pool so a pid is known
    conversion.convert("<p>warm</p>").await.unwrap();
    let pid = conversion.worker_stats()[0].pid.expect("worker pid");

    let in_flight = {
        let conversion = conversion.clone();
        tokio::spawn(async move {
            conversion
                .convert(ConversionSettings {
                    delay_ms: Some(3_000),
                    timeout_ms: Some(10_000),
                    ..ConversionSettings::from_html("<p>doomed</p>")
                })
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(500)).await;
    let killed = std::process::Command::new("kill")
        .args(["-9", &pid.to_string()])
        .status()
        .unwrap();
    assert!(killed.success());

    let err = in_flight.await.unwrap().unwrap_err();
    assert!(err.is_crash(), "expected a crash error, got: {}", err);

    // the respawned worker serves the next task
    let result = conversion.convert("<p>recovered</p>").await.unwrap();
    assert_eq!(result.page_count, 1);

    conversion.kill().await;
}

#[tokio::test]
async fn killed_pool_restarts_on_the_next_conversion() {
    let conversion = Conversion::new(test_config(Strategy::PooledPipe, 1)).unwrap();

    assert_eq!(conversion.convert("<p>first</p>").await.unwrap().page_count, 1);
    conversion.kill().await;

    assert_eq!(
        conversion.convert("<p>second</p>").await.unwrap().page_count,
        1
    );
    conversion.kill().await;
}
