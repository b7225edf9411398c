//! Bounded connect-with-backoff for startup dependencies.
//!
//! The retry loop is an explicit state machine: `Connecting { attempt }`
//! either becomes `Ready` or, after a failure, the next `Connecting` (with a
//! delay of `min(max_delay, base * 2^(attempt-1))`) until `max_attempts` is
//! spent, at which point it is `Failed` and the caller gives up.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
#[error("{dependency}: giving up after {attempts} attempt(s): {last_error}")]
pub struct ConnectError {
    pub dependency: String,
    pub attempts: u32,
    pub last_error: String,
}

/// Retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Backoff {
    #[serde(with = "millis")]
    pub base_delay: Duration,
    #[serde(with = "millis")]
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            max_attempts: 5,
        }
    }
}

impl Backoff {
    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exp)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectState {
    Connecting { attempt: u32 },
    Ready,
    Failed { attempts: u32 },
}

impl ConnectState {
    pub fn start() -> Self {
        ConnectState::Connecting { attempt: 1 }
    }

    pub fn on_success(self) -> Self {
        ConnectState::Ready
    }

    pub fn on_failure(self, policy: &Backoff) -> Self {
        match self {
            ConnectState::Connecting { attempt } if attempt < policy.max_attempts => {
                ConnectState::Connecting {
                    attempt: attempt + 1,
                }
            }
            ConnectState::Connecting { attempt } => ConnectState::Failed { attempts: attempt },
            other => other,
        }
    }
}

/// Drive `connect` through the state machine until it succeeds or fails for good.
pub async fn connect_with_backoff<T, E, F, Fut>(
    dependency: &str,
    policy: Backoff,
    mut connect: F,
) -> Result<T, ConnectError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut state = ConnectState::start();
    let mut last_error = String::new();

    while let ConnectState::Connecting { attempt } = state {
        match connect().await {
            Ok(conn) => {
                state = state.on_success();
                info!(%dependency, attempt, ?state, "Connected");
                return Ok(conn);
            }
            Err(e) => {
                last_error = e.to_string();
                state = state.on_failure(&policy);
                if let ConnectState::Connecting { .. } = state {
                    let delay = policy.delay_for(attempt);
                    warn!(%dependency, attempt, error = %last_error, ?delay, "Connect failed, retrying");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    let attempts = match state {
        ConnectState::Failed { attempts } => attempts,
        _ => policy.max_attempts,
    };
    Err(ConnectError {
        dependency: dependency.to_string(),
        attempts,
        last_error,
    })
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_attempts: u32) -> Backoff {
        Backoff {
            base_delay: Duration::from_millis(2),
            max_delay: Duration::from_millis(10),
            max_attempts,
        }
    }

    #[test]
    fn test_delay_doubles_then_caps() {
        let p = Backoff {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1_000),
            max_attempts: 10,
        };
        assert_eq!(p.delay_for(1), Duration::from_millis(100));
        assert_eq!(p.delay_for(2), Duration::from_millis(200));
        assert_eq!(p.delay_for(4), Duration::from_millis(800));
        assert_eq!(p.delay_for(5), Duration::from_millis(1_000));
        assert_eq!(p.delay_for(60), Duration::from_millis(1_000));
    }

    #[test]
    fn test_state_transitions() {
        let p = policy(2);
        let s = ConnectState::start();
        let s = s.on_failure(&p);
        assert_eq!(s, ConnectState::Connecting { attempt: 2 });
        let s = s.on_failure(&p);
        assert_eq!(s, ConnectState::Failed { attempts: 2 });
        assert_eq!(s.on_failure(&p), ConnectState::Failed { attempts: 2 });
        assert_eq!(ConnectState::start().on_success(), ConnectState::Ready);
    }

    #[tokio::test]
    async fn test_connect_succeeds_after_retries() {
        let calls = AtomicU32::new(0);
        let result = connect_with_backoff("test", policy(5), || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Err(format!("refused #{n}"))
                } else {
                    Ok(n)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 3);
    }

    #[tokio::test]
    async fn test_connect_gives_up() {
        let calls = AtomicU32::new(0);
        let err = connect_with_backoff("test", policy(3), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>("refused") }
        })
        .await
        .unwrap_err();
        assert_eq!(err.attempts, 3);
        assert_eq!(err.last_error, "refused");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
