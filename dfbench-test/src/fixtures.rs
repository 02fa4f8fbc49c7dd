//! Canned metrics output of a Dragonfly client.
//!
//! ```
//! let text = dfbench_test::fixtures::client_metrics("1", 12.5, 1);
//! assert!(text.contains("task_size_level=\"1\""));
//! ```

use std::fmt::Write;

/// Histogram buckets the client reports download durations in, in milliseconds.
const BUCKETS: &[f64] = &[10.0, 50.0, 100.0, 500.0, 1000.0, 5000.0, 10000.0];

/// Returns a metrics scrape holding one download duration histogram.
///
/// The histogram is labelled with `task_size_level`, carries `count` samples and a sum of
/// `sum_ms` milliseconds. Unrelated families are included, like a real scrape.
pub fn client_metrics(task_size_level: &str, sum_ms: f64, count: u64) -> String {
    client_metrics_multi(&[(task_size_level, sum_ms, count)])
}

/// Returns a metrics scrape with one download duration histogram per entry.
///
/// Each entry is `(task_size_level, sum_ms, count)`.
pub fn client_metrics_multi(histograms: &[(&str, f64, u64)]) -> String {
    let mut text = String::new();
    text.push_str("# HELP dragonfly_client_version Version info of the service.\n");
    text.push_str("# TYPE dragonfly_client_version gauge\n");
    text.push_str("dragonfly_client_version{git_commit=\"abc1234\",version=\"0.1.0\"} 1\n");

    let name = "dragonfly_client_download_task_duration_milliseconds";
    let _ = writeln!(text, "# HELP {name} Histogram of download task duration.");
    let _ = writeln!(text, "# TYPE {name} histogram");
    for &(level, sum, count) in histograms {
        let labels = format!("task_type=\"standard\",task_size_level=\"{level}\"");
        for bound in BUCKETS {
            let cumulative = if sum <= *bound { count } else { 0 };
            let _ = writeln!(text, "{name}_bucket{{{labels},le=\"{bound}\"}} {cumulative}");
        }
        let _ = writeln!(text, "{name}_bucket{{{labels},le=\"+Inf\"}} {count}");
        let _ = writeln!(text, "{name}_sum{{{labels}}} {sum}");
        let _ = writeln!(text, "{name}_count{{{labels}}} {count}");
    }

    text
}

/// Returns a metrics scrape that holds no download duration samples.
pub fn empty_client_metrics() -> String {
    client_metrics_multi(&[])
}
