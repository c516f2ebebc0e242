//! Waiting for a page to become usably rendered.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep, Instant};

use crate::driver::PageTab;

#[async_trait]
pub trait SettlePolicy: Send + Sync {
    /// Suspend until `tab` is considered settled. `budget` is the configured
    /// delay for the current pipeline step.
    async fn settle(&self, tab: &dyn PageTab, budget: Duration);
}

/// Always waits the full budget.
pub struct FixedDelay;

#[async_trait]
impl SettlePolicy for FixedDelay {
    async fn settle(&self, _tab: &dyn PageTab, budget: Duration) {
        if !budget.is_zero() {
            debug!("sleeping for {}ms", budget.as_millis());
        }
        sleep(budget).await;
    }
}

/// Polls `document.readyState` and returns as soon as it is `complete`, or
/// when the budget runs out.
pub struct ReadyStateSettle {
    pub poll_interval: Duration,
}

impl Default for ReadyStateSettle {
    fn default() -> Self {
        ReadyStateSettle {
            poll_interval: Duration::from_millis(250),
        }
    }
}

#[async_trait]
impl SettlePolicy for ReadyStateSettle {
    async fn settle(&self, tab: &dyn PageTab, budget: Duration) {
        let deadline = Instant::now() + budget;
        loop {
            match tab.evaluate("document.readyState", false).await {
                Ok(v) if v.as_str() == Some("complete") => return,
                Ok(_) => {}
                Err(e) => debug!("readyState check failed: {}", e),
            }
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            sleep(self.poll_interval.min(deadline - now)).await;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use anyhow::Result;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Reports `loading` for the first `ready_after` checks.
    struct LoadingTab {
        checks: AtomicUsize,
        ready_after: usize,
    }

    #[async_trait]
    impl PageTab for LoadingTab {
        async fn navigate(&self, _url: &str, _timeout: Duration) -> Result<()> {
            Ok(())
        }
        async fn evaluate(&self, _script: &str, _await_promise: bool) -> Result<Value> {
            let n = self.checks.fetch_add(1, Ordering::SeqCst);
            let state = if n >= self.ready_after { "complete" } else { "loading" };
            Ok(Value::String(state.into()))
        }
        async fn screenshot(&self) -> Result<Vec<u8>> {
            Ok(vec![])
        }
        async fn content(&self) -> Result<String> {
            Ok(String::new())
        }
        async fn url(&self) -> Result<String> {
            Ok(String::new())
        }
        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn ready_state_returns_once_complete() {
        let tab = LoadingTab {
            checks: AtomicUsize::new(0),
            ready_after: 2,
        };
        let policy = ReadyStateSettle {
            poll_interval: Duration::from_millis(1),
        };
        let started = std::time::Instant::now();
        tokio_test::block_on(policy.settle(&tab, Duration::from_secs(10)));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(tab.checks.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn ready_state_gives_up_at_budget() {
        let tab = LoadingTab {
            checks: AtomicUsize::new(0),
            ready_after: usize::MAX,
        };
        let policy = ReadyStateSettle {
            poll_interval: Duration::from_millis(5),
        };
        let started = std::time::Instant::now();
        tokio_test::block_on(policy.settle(&tab, Duration::from_millis(30)));
        assert!(started.elapsed() >= Duration::from_millis(30));
        assert!(tab.checks.load(Ordering::SeqCst) > 1);
    }
}
