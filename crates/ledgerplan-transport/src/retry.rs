//! Retry with exponential backoff for transient transport failures.

use anyhow::Result;
use std::future::Future;

use ledgerplan_types::RetryConfig;

use crate::RpcError;

/// Whether `error` looks transient (rate limit, timeout, dropped connection).
///
/// Errors answered by the node itself are never retried: resending a
/// rejected transaction or a reverting call gives the same answer.
pub fn should_retry_error(error: &anyhow::Error) -> bool {
    match error.downcast_ref::<RpcError>() {
        Some(RpcError::Rpc { .. }) | Some(RpcError::Decode(_)) => return false,
        Some(RpcError::Transport(_)) => return true,
        None => {}
    }
    let s = format!("{:#}", error).to_ascii_lowercase();
    s.contains("429")
        || s.contains("too many")
        || s.contains("timed out")
        || s.contains("timeout")
        || s.contains("connection")
        || s.contains("transport")
}

pub async fn with_retries<T, F, Fut>(cfg: RetryConfig, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0usize;
    let mut backoff = cfg.initial_backoff;

    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                if attempt >= cfg.retries || !should_retry_error(&e) {
                    return Err(e);
                }
                attempt += 1;
                tracing::debug!(attempt, error = %e, "retrying ledger request");
                tokio::time::sleep(backoff).await;
                backoff = std::cmp::min(backoff * 2, cfg.max_backoff);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_are_retried() {
        let calls = AtomicUsize::new(0);
        let result = with_retries(RetryConfig::new(3, 10, 100), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(anyhow!(RpcError::Transport("connection refused".into())))
                } else {
                    Ok(n)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_node_errors_are_not_retried() {
        let calls = AtomicUsize::new(0);
        let result: Result<()> = with_retries(RetryConfig::default(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(anyhow!(RpcError::Rpc {
                    code: -32000,
                    message: "nonce too low".into(),
                    data: None,
                }))
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_should_retry_plain_errors_by_message() {
        assert!(should_retry_error(&anyhow!("HTTP 429 Too Many Requests")));
        assert!(should_retry_error(&anyhow!("request timed out")));
        assert!(!should_retry_error(&anyhow!("invalid params")));
    }
}
