// src/supervisor.rs - Bounded connect/reconnect and heartbeat liveness checks
use crate::config::{ConnectionConfig, MIN_RECONNECT_COOLDOWN_MS};
use crate::error::{MonitorError, Result};
use crate::protocol::ProtocolDriver;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Bounded retry policy shared by the initial connect and every reconnect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub reconnect_cooldown: Duration,
}

impl From<&ConnectionConfig> for RetryPolicy {
    fn from(config: &ConnectionConfig) -> Self {
        Self {
            max_attempts: config.max_retries.max(1),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            reconnect_cooldown: Duration::from_millis(
                config.reconnect_cooldown_ms.max(MIN_RECONNECT_COOLDOWN_MS),
            ),
        }
    }
}

/// Result of one heartbeat read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Healthy,
    Unhealthy,
}

/// Owns connection policy for a driver
#[derive(Debug, Clone)]
pub struct ConnectionSupervisor {
    policy: RetryPolicy,
    heartbeat_node: String,
    last_reconnect: Option<Instant>,
}

impl ConnectionSupervisor {
    pub fn new(config: &ConnectionConfig) -> Self {
        Self {
            policy: RetryPolicy::from(config),
            heartbeat_node: config.heartbeat_node.clone(),
            last_reconnect: None,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Connect with at most `max_attempts` tries, `retry_delay` apart
    pub async fn connect<D>(&self, driver: &mut D) -> Result<()>
    where
        D: ProtocolDriver + ?Sized,
    {
        let attempts = self.policy.max_attempts;
        for attempt in 1..=attempts {
            match driver.connect().await {
                Ok(()) => {
                    info!("Connected via {} (attempt {}/{})", driver.protocol_name(), attempt, attempts);
                    return Ok(());
                }
                Err(e) => {
                    warn!("Connection attempt {}/{} failed: {}", attempt, attempts, e);
                    if attempt < attempts {
                        tokio::time::sleep(self.policy.retry_delay).await;
                    }
                }
            }
        }

        error!("Failed to connect after {} attempts", attempts);
        Err(MonitorError::ConnectionExhausted { attempts })
    }

    /// Tear down the current session and run a fresh bounded connect
    ///
    /// Subscriptions are not restored here; the caller resubscribes.
    pub async fn reconnect<D>(&mut self, driver: &mut D) -> Result<()>
    where
        D: ProtocolDriver + ?Sized,
    {
        info!("Attempting to reconnect...");
        if let Err(e) = driver.disconnect().await {
            debug!("Ignoring disconnect error before reconnect: {}", e);
        }
        let result = self.connect(driver).await;
        self.last_reconnect = Some(Instant::now());
        result
    }

    /// True while the post-reconnect cooldown is running
    pub fn in_cooldown(&self) -> bool {
        self.last_reconnect
            .map(|at| at.elapsed() < self.policy.reconnect_cooldown)
            .unwrap_or(false)
    }

    /// Read the heartbeat node
    ///
    /// An access-denied answer still proves the server is reachable.
    pub async fn check_liveness<D>(&self, driver: &mut D) -> Liveness
    where
        D: ProtocolDriver + ?Sized,
    {
        match driver.read_value(&self.heartbeat_node).await {
            Ok(_) => Liveness::Healthy,
            Err(MonitorError::AccessDenied(node)) => {
                warn!("[PERMISSION ERROR] Cannot read heartbeat node {}", node);
                Liveness::Healthy
            }
            Err(e) => {
                warn!("Connection lost: {}", e);
                Liveness::Unhealthy
            }
        }
    }
}
