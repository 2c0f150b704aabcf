use anyhow::Result;
use async_trait::async_trait;

/// Base trait for providers that can create components asynchronously.
///
/// Lets the coordinator defer construction of hardware-touching components
/// until the single-instance check has passed.
///
/// # Example
///
/// ```no_run
/// use gpu_thermald::providers::traits::AsyncProvider;
///
/// struct DisplayProvider;
///
/// #[async_trait::async_trait]
/// impl AsyncProvider<u32> for DisplayProvider {
///     async fn provide(&self) -> anyhow::Result<u32> {
///         Ok(0)
///     }
/// }
/// ```
#[async_trait]
pub trait AsyncProvider<T>: Send + Sync {
    async fn provide(&self) -> Result<T>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    struct CountingProvider {
        value: u32,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl AsyncProvider<u32> for CountingProvider {
        async fn provide(&self) -> Result<u32> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.value)
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl AsyncProvider<u32> for FailingProvider {
        async fn provide(&self) -> Result<u32> {
            Err(anyhow!("NVML unavailable"))
        }
    }

    #[tokio::test]
    async fn provider_creates_fresh_values() {
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = CountingProvider {
            value: 7,
            calls: calls.clone(),
        };

        assert_eq!(provider.provide().await.unwrap(), 7);
        assert_eq!(provider.provide().await.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn boxed_provider_propagates_errors() {
        let provider: Box<dyn AsyncProvider<u32>> = Box::new(FailingProvider);
        let err = provider.provide().await.unwrap_err();
        assert_eq!(err.to_string(), "NVML unavailable");
    }
}
