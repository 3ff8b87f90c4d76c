//! Deliberate misbehaviour on the TCP command port: added latency, dropped
//! connections, truncated replies and bogus error lines.

use std::time::Duration;

use parse_display::{Display, FromStr};
use rand::{rngs::StdRng, Rng, SeedableRng};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Most latency the injector will add to a reply.
pub const MAX_LATENCY_MS: u64 = 5000;

/// What an `error` failure sends instead of the real reply.
pub const ERROR_REPLY: &[u8] = b"Error: simulated network failure\nok\n";

/// How an injected failure manifests.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Display, FromStr,
)]
#[serde(rename_all = "snake_case")]
#[display(style = "snake_case")]
pub enum FailureKind {
    /// Close the connection without replying.
    #[default]
    Drop,
    /// Send a third of the reply, stall, then close.
    Timeout,
    /// Reply with an error line and keep going.
    Error,
}

/// Network fault settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct NetworkFaultConfig {
    /// Delay every reply by `latency_ms`.
    pub latency_enabled: bool,
    /// Added delay, 0-5000 ms.
    pub latency_ms: u64,
    /// Fail a share of replies.
    pub failures_enabled: bool,
    /// Share of replies to fail, percent.
    pub failure_rate: u8,
    /// What a failure looks like.
    pub failure_kind: FailureKind,
    /// How long a `timeout` failure stalls before closing.
    pub timeout_stall_ms: u64,
}

impl Default for NetworkFaultConfig {
    fn default() -> Self {
        NetworkFaultConfig {
            latency_enabled: false,
            latency_ms: 0,
            failures_enabled: false,
            failure_rate: 0,
            failure_kind: FailureKind::Drop,
            timeout_stall_ms: 10_000,
        }
    }
}

impl NetworkFaultConfig {
    /// Check the settings are in range.
    pub fn validate(&self) -> Result<(), String> {
        if self.latency_ms > MAX_LATENCY_MS {
            return Err(format!("latency must be at most {MAX_LATENCY_MS} ms, got {}", self.latency_ms));
        }
        if self.failure_rate > 100 {
            return Err(format!("failure rate must be 0-100, got {}", self.failure_rate));
        }
        Ok(())
    }
}

/// What happened to a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Send it as is.
    Deliver,
    /// Inject this failure.
    Fail(FailureKind),
}

/// Whether the connection survives the reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Keep reading commands.
    KeepOpen,
    /// Close the connection.
    Close,
}

/// Applies [`NetworkFaultConfig`] to outgoing replies. One per connection.
#[derive(Debug)]
pub struct FaultInjector<R = StdRng> {
    rng: R,
}

impl FaultInjector<StdRng> {
    /// An injector seeded from the OS.
    pub fn new() -> Self {
        FaultInjector {
            rng: StdRng::from_os_rng(),
        }
    }
}

impl Default for FaultInjector<StdRng> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Rng> FaultInjector<R> {
    /// An injector drawing from the given generator.
    pub fn with_rng(rng: R) -> Self {
        FaultInjector { rng }
    }

    /// Roll for one reply.
    pub fn verdict(&mut self, config: &NetworkFaultConfig) -> Verdict {
        let roll: u8 = self.rng.random_range(1..=100);
        if config.failures_enabled && roll <= config.failure_rate {
            Verdict::Fail(config.failure_kind)
        } else {
            Verdict::Deliver
        }
    }

    /// Write a reply, or misbehave instead.
    pub async fn deliver<W>(
        &mut self,
        config: &NetworkFaultConfig,
        reply: &[u8],
        writer: &mut W,
    ) -> std::io::Result<Outcome>
    where
        W: AsyncWrite + Unpin,
    {
        if config.latency_enabled && config.latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(config.latency_ms.min(MAX_LATENCY_MS))).await;
        }

        match self.verdict(config) {
            Verdict::Deliver => {
                writer.write_all(reply).await?;
                writer.flush().await?;
                Ok(Outcome::KeepOpen)
            }
            Verdict::Fail(FailureKind::Drop) => {
                tracing::warn!("injected fault: dropping connection");
                Ok(Outcome::Close)
            }
            Verdict::Fail(FailureKind::Timeout) => {
                tracing::warn!(stall_ms = config.timeout_stall_ms, "injected fault: stalling reply");
                writer.write_all(&reply[..reply.len() / 3]).await?;
                writer.flush().await?;
                tokio::time::sleep(Duration::from_millis(config.timeout_stall_ms)).await;
                Ok(Outcome::Close)
            }
            Verdict::Fail(FailureKind::Error) => {
                tracing::warn!("injected fault: error reply");
                writer.write_all(ERROR_REPLY).await?;
                writer.flush().await?;
                Ok(Outcome::KeepOpen)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tokio::io::AsyncReadExt;

    use super::*;

    fn failing(kind: FailureKind) -> NetworkFaultConfig {
        NetworkFaultConfig {
            failures_enabled: true,
            failure_rate: 100,
            failure_kind: kind,
            timeout_stall_ms: 10,
            ..Default::default()
        }
    }

    #[test]
    fn test_verdict_rates() {
        let mut injector = FaultInjector::with_rng(StdRng::seed_from_u64(5));

        let never = NetworkFaultConfig::default();
        let always = failing(FailureKind::Error);
        for _ in 0..200 {
            assert_eq!(injector.verdict(&never), Verdict::Deliver);
            assert_eq!(injector.verdict(&always), Verdict::Fail(FailureKind::Error));
        }

        let disabled = NetworkFaultConfig {
            failures_enabled: false,
            ..failing(FailureKind::Drop)
        };
        assert_eq!(injector.verdict(&disabled), Verdict::Deliver);
    }

    #[tokio::test]
    async fn test_drop_writes_nothing() {
        let mut injector = FaultInjector::with_rng(StdRng::seed_from_u64(1));
        let (mut client, mut server) = tokio::io::duplex(1024);

        let outcome = injector
            .deliver(&failing(FailureKind::Drop), b"CMD M115 Received.\nok\n", &mut server)
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Close);
        drop(server);

        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        assert!(received.is_empty());
    }

    #[tokio::test]
    async fn test_timeout_sends_a_third() {
        let mut injector = FaultInjector::with_rng(StdRng::seed_from_u64(1));
        let (mut client, mut server) = tokio::io::duplex(1024);

        let outcome = injector
            .deliver(&failing(FailureKind::Timeout), b"123456789", &mut server)
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Close);
        drop(server);

        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"123");
    }

    #[tokio::test]
    async fn test_error_keeps_open() {
        let mut injector = FaultInjector::with_rng(StdRng::seed_from_u64(1));
        let (mut client, mut server) = tokio::io::duplex(1024);

        let outcome = injector
            .deliver(&failing(FailureKind::Error), b"CMD M27 Received.\nok\n", &mut server)
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::KeepOpen);
        drop(server);

        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, ERROR_REPLY);
    }

    #[test]
    fn test_validate() {
        assert!(NetworkFaultConfig::default().validate().is_ok());
        let slow = NetworkFaultConfig {
            latency_ms: 6000,
            ..Default::default()
        };
        assert!(slow.validate().is_err());
        let flaky = NetworkFaultConfig {
            failure_rate: 101,
            ..Default::default()
        };
        assert!(flaky.validate().is_err());
    }
}
