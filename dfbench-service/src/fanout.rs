//! Fan-out of one task per pod with a fail-together join.

use std::future::Future;

use crate::error::{Error, Result};

/// Spawns `task` once per pod and waits for every task to finish.
///
/// Tasks are never aborted when a sibling fails. After the join, every failure is logged and
/// the first one in pod order is returned.
pub(crate) async fn fan_out<F, Fut>(operation: &str, pods: &[String], task: F) -> Result<()>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let handles: Vec<_> = pods
        .iter()
        .map(|pod| tokio::spawn(task(pod.clone())))
        .collect();

    let results = futures::future::join_all(handles).await;

    let mut first_error = None;
    for (pod, result) in pods.iter().zip(results) {
        let Err(err) = result.map_err(Error::from).and_then(|result| result) else {
            continue;
        };

        tracing::error!(
            error = &err as &dyn std::error::Error,
            pod = %pod,
            operation,
            "error processing pod"
        );
        first_error.get_or_insert(err);
    }

    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    fn pods(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("client-{i}")).collect()
    }

    #[tokio::test]
    async fn all_succeed() {
        let finished = Arc::new(AtomicUsize::new(0));
        let result = fan_out("test", &pods(4), |_| {
            let finished = Arc::clone(&finished);
            async move {
                finished.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(finished.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn failure_waits_for_siblings() {
        let finished = Arc::new(AtomicUsize::new(0));
        let result = fan_out("test", &pods(3), |pod| {
            let finished = Arc::clone(&finished);
            async move {
                if pod == "client-0" {
                    return Err(Error::UnknownTier(pod));
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
                finished.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await;

        assert!(matches!(result, Err(Error::UnknownTier(pod)) if pod == "client-0"));
        assert_eq!(finished.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn first_error_in_pod_order_wins() {
        let result = fan_out("test", &pods(3), |pod| async move {
            match pod.as_str() {
                "client-0" => Ok(()),
                "client-1" => {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Err(Error::UnknownTier(pod))
                }
                _ => Err(Error::UnknownDownloader(pod)),
            }
        })
        .await;

        assert!(matches!(result, Err(Error::UnknownTier(pod)) if pod == "client-1"));
    }

    #[tokio::test]
    async fn panicking_task_is_reported() {
        let result = fan_out("test", &pods(2), |pod| async move {
            if pod == "client-1" {
                panic!("boom");
            }
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(Error::Join(_))));
    }
}
