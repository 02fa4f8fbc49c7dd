//! Pod discovery.

use crate::error::{Error, Result};
use crate::exec::Executor;

/// Label selector of the Dragonfly client pods.
pub const CLIENT_SELECTOR: &str = "component=client";

/// Container of the Dragonfly client within its pod.
pub const CLIENT_CONTAINER: &str = "client";

/// Returns the pods in `namespace` matching `selector`.
///
/// The cluster is queried on every call. An empty result is an error, never an empty success.
pub async fn pods(executor: &dyn Executor, namespace: &str, selector: &str) -> Result<Vec<String>> {
    let pods = executor
        .get_pods(namespace, selector)
        .await
        .inspect_err(|err| {
            tracing::error!(
                error = err as &dyn std::error::Error,
                namespace,
                selector,
                "failed to get pods"
            )
        })?;

    if pods.is_empty() {
        tracing::error!(namespace, selector, "no client pod found");
        return Err(Error::NoPods {
            namespace: namespace.to_owned(),
            selector: selector.to_owned(),
        });
    }

    Ok(pods)
}

/// Returns the Dragonfly client pods in `namespace`.
pub async fn client_pods(executor: &dyn Executor, namespace: &str) -> Result<Vec<String>> {
    pods(executor, namespace, CLIENT_SELECTOR).await
}
