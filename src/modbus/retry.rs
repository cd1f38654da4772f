use log::warn;
use std::future::Future;
use std::time::Duration;

use crate::utils::error::ModbusError;

/// Bounded caller-side retry. Only timeouts and discarded frames are re-attempted;
/// device exceptions and transport failures return immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    pub fn no_retry() -> Self {
        Self::new(0, Duration::ZERO)
    }

    pub async fn run<T, F, Fut>(&self, mut operation: F) -> Result<T, ModbusError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ModbusError>>,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    warn!("⚠️ Attempt {} failed: {}, retrying in {:?}", attempt, e, self.delay);
                    if !self.delay.is_zero() {
                        tokio::time::sleep(self.delay).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::error::{ExceptionCode, TransportError};
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_timeouts_until_success() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let policy = RetryPolicy::new(3, Duration::ZERO);

        let result = policy
            .run(move || async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ModbusError::Timeout)
                } else {
                    Ok(42)
                }
            })
            .await;

        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let policy = RetryPolicy::new(2, Duration::ZERO);

        let result: Result<(), _> = policy
            .run(move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ModbusError::CrcMismatch { expected: 1, received: 2 })
            })
            .await;

        assert!(matches!(result, Err(ModbusError::CrcMismatch { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exceptions_and_transport_errors_are_not_retried() {
        let policy = RetryPolicy::new(5, Duration::ZERO);

        for error in [
            ModbusError::Exception { function: 0x03, code: ExceptionCode::IllegalDataAddress },
            ModbusError::Transport(TransportError::NotOpen),
        ] {
            let calls = AtomicU32::new(0);
            let result: Result<(), _> = policy
                .run(|| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    let error = error.clone();
                    async move { Err(error) }
                })
                .await;
            assert_eq!(result, Err(error));
            assert_eq!(calls.load(Ordering::SeqCst), 1);
        }
    }
}
