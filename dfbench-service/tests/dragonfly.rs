use std::sync::Arc;
use std::time::Duration;

use dfbench_service::Error;
use dfbench_service::dragonfly::Dragonfly;
use dfbench_service::exec::Executor;
use dfbench_service::stats::Stats;
use dfbench_test::{MockExecutor, fixtures};
use dfbench_types::{Downloader, SizeTier};

const NAMESPACE: &str = "dragonfly-system";
const PODS: [&str; 3] = ["client-0", "client-1", "client-2"];

fn setup(executor: &MockExecutor) -> Dragonfly {
    dfbench_test::tracing::init();

    let executor: Arc<dyn Executor> = Arc::new(executor.clone());
    let stats = Stats::new(NAMESPACE, Arc::clone(&executor));
    Dragonfly::new(NAMESPACE, executor, stats)
}

fn nano_metrics(ms: f64) -> String {
    fixtures::client_metrics(SizeTier::Nano.task_size_level(), ms, 1)
}

#[tokio::test]
async fn failed_pod_waits_for_siblings() {
    let executor = MockExecutor::new(PODS)
        .fail("client-1", "dfget '")
        .delay("client-0", Duration::from_millis(100))
        .delay("client-2", Duration::from_millis(100))
        .respond("curl -s http://127.0.0.1:4002/metrics", nano_metrics(7.0));
    let dragonfly = setup(&executor);

    let err = dragonfly
        .run_by_file_size("dfget", SizeTier::Nano)
        .await
        .expect_err("run with a failing pod must fail");

    let Error::Exec { target, .. } = &err else {
        panic!("expected exec error, got {err:?}");
    };
    assert!(target.contains("client-1"), "{target}");

    // The siblings finished their download and metrics collection before the verdict.
    let mut pods: Vec<_> = dragonfly
        .stats()
        .downloads()
        .snapshot()
        .into_iter()
        .map(|record| record.pod)
        .collect();
    pods.sort();
    assert_eq!(pods, ["client-0", "client-2"]);
    assert_eq!(executor.calls_matching("-X DELETE").len(), 2);

    let report = dragonfly.stats().report().unwrap();
    let rows = report.rows(Downloader::Dfget).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].times, 2);
    assert_eq!(rows[0].avg, Duration::from_millis(7));
}

#[tokio::test]
async fn cleanup_covers_download_pods() {
    let executor = MockExecutor::new(PODS)
        .respond("curl -s http://127.0.0.1:4002/metrics", nano_metrics(2.5))
        .fail("client-2", "-X DELETE");
    let dragonfly = setup(&executor);

    let outcome = dragonfly.benchmark("dfget", Some(SizeTier::Nano), 1).await;

    assert!(matches!(outcome.run, Err(Error::ResetMetrics { .. })));
    assert!(outcome.cleanup.is_ok());

    let mut cleaned: Vec<_> = executor
        .calls_matching("rm -rf /tmp/*")
        .into_iter()
        .map(|call| call.target.pod)
        .collect();
    cleaned.sort();
    assert_eq!(cleaned, PODS);
}

#[tokio::test]
async fn unknown_downloader_is_rejected_upfront() {
    let executor = MockExecutor::new(PODS);
    let dragonfly = setup(&executor);

    let outcome = dragonfly.benchmark("aria2c", None, 3).await;

    assert!(matches!(outcome.run, Err(Error::UnknownDownloader(ref name)) if name == "aria2c"));
    assert!(outcome.cleanup.is_ok());
    assert!(executor.calls().is_empty());
    assert!(executor.pod_queries().is_empty());
}

#[tokio::test]
async fn report_lists_tiers_in_order() {
    let levels: Vec<_> = SizeTier::ALL
        .iter()
        .map(|tier| (tier.task_size_level(), 5.0, 1))
        .collect();

    let executor = MockExecutor::new(["client-0"]).respond(
        "curl -s http://127.0.0.1:4002/metrics",
        fixtures::client_metrics_multi(&[levels[4], levels[0]]),
    );
    let dragonfly = setup(&executor);

    dragonfly
        .run_by_file_size("proxy", SizeTier::Large)
        .await
        .unwrap();
    dragonfly
        .run_by_file_size("proxy", SizeTier::Nano)
        .await
        .unwrap();

    let report = dragonfly.stats().report().unwrap();
    let tiers: Vec<_> = report
        .rows(Downloader::Proxy)
        .unwrap()
        .iter()
        .map(|row| row.tier)
        .collect();
    assert_eq!(tiers, [SizeTier::Nano, SizeTier::Large]);

    let (downloader, table) = report.tables().next().unwrap();
    assert_eq!(downloader, Downloader::Proxy);
    let labels: Vec<_> = table.rows().iter().map(|row| row[0].as_str()).collect();
    assert_eq!(labels, ["Nano(1B)", "Large(1GB)"]);
}
