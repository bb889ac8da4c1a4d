//! Heartbeat loop with bounded retries and exponential backoff.
//!
//! Every cycle waits, then either pings the mesh (link up) or tries to
//! re-establish the link (link down). Failed cycles grow the wait
//! exponentially up to a cap. After `max_retries` consecutive failures the
//! loop reports a heartbeat timeout, drops the link, and starts counting
//! again. It only stops when the session is cancelled or dropped, and only
//! between cycles.

use std::sync::Weak;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::session::{Inner, SessionConfig, SessionEvent};

/// Whether `reply` answers a ping of `sent`
pub fn is_pong(sent: u8, reply: &[u8]) -> bool {
    reply.first() == Some(&sent.wrapping_add(1))
}

/// `base * 2^failures`, capped at `cap` and never below `base`
pub fn backoff(base: Duration, failures: u32, cap: Duration) -> Duration {
    let factor = 1u32.checked_shl(failures).unwrap_or(u32::MAX);
    base.saturating_mul(factor).min(cap).max(base)
}

/// Retry settings of the heartbeat loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Wait between healthy cycles
    pub interval: Duration,
    /// Upper bound on the wait after failures
    pub max_backoff: Duration,
    /// Consecutive failures before a heartbeat timeout
    pub max_retries: u32,
}

impl RetryPolicy {
    /// Wait before the next cycle
    pub fn delay(&self, failures: u32) -> Duration {
        backoff(self.interval, failures, self.max_backoff)
    }
}

impl From<&SessionConfig> for RetryPolicy {
    fn from(config: &SessionConfig) -> Self {
        Self {
            interval: config.retry_interval,
            max_backoff: config.max_backoff,
            max_retries: config.max_retries.max(1),
        }
    }
}

/// Run the heartbeat until `cancel` fires or the session is dropped
pub(crate) async fn heartbeat(session: Weak<Inner>, cancel: CancellationToken) {
    let policy = match session.upgrade() {
        Some(inner) => RetryPolicy::from(inner.config()),
        None => return,
    };
    info!(
        "Heartbeat started (interval {:?}, {} retries)",
        policy.interval, policy.max_retries
    );

    let mut failures = 0u32;
    loop {
        let delay = policy.delay(failures);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }

        let Some(inner) = session.upgrade() else {
            break;
        };

        // Runs to completion so no transport call is cut off midway
        let healthy = cycle(&inner).await;
        if cancel.is_cancelled() {
            break;
        }

        if healthy {
            if failures > 0 {
                info!("Mesh heartbeat recovered after {} failures", failures);
            }
            failures = 0;
            continue;
        }

        failures += 1;
        debug!(
            "Heartbeat failure {}/{}, next attempt in {:?}",
            failures,
            policy.max_retries,
            policy.delay(failures)
        );
        if failures >= policy.max_retries {
            warn!("Heartbeat timeout after {} consecutive failures", failures);
            inner.emit(SessionEvent::HeartbeatTimeout { failures });
            inner.drop_link().await;
            failures = 0;
        }
    }
    debug!("Heartbeat stopped");
}

async fn cycle(inner: &Inner) -> bool {
    if inner.link_alive().await {
        let ok = inner.ping().await;
        if !ok {
            inner.emit(SessionEvent::PingFailed);
        }
        ok
    } else {
        debug!("Link down, reconnecting");
        inner.establish().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mem::{MemoryTransport, PingMode};
    use crate::session::MeshSession;
    use crate::transport::BleTransport;
    use crate::ConnectionState;
    use plejd_wire::SharedKey;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn config() -> SessionConfig {
        SessionConfig {
            scan_time: Duration::from_secs(1),
            max_retries: 3,
            retry_interval: Duration::from_secs(10),
            max_backoff: Duration::from_secs(60),
            operation_timeout: Duration::from_secs(5),
        }
    }

    fn transport() -> MemoryTransport {
        MemoryTransport::new().with_peer("hub", -50, "11:22:33:44:55:66".parse().unwrap())
    }

    fn key() -> SharedKey {
        SharedKey::new([7u8; 16])
    }

    #[test]
    fn test_is_pong() {
        assert!(is_pong(0x10, &[0x11]));
        assert!(is_pong(0xFF, &[0x00]));
        assert!(!is_pong(0x10, &[0x10]));
        assert!(!is_pong(0x10, &[]));
    }

    #[test]
    fn test_backoff_growth_and_cap() {
        let base = Duration::from_secs(10);
        let cap = Duration::from_secs(60);
        assert_eq!(backoff(base, 0, cap), Duration::from_secs(10));
        assert_eq!(backoff(base, 1, cap), Duration::from_secs(20));
        assert_eq!(backoff(base, 2, cap), Duration::from_secs(40));
        assert_eq!(backoff(base, 3, cap), cap);
        assert_eq!(backoff(base, 40, cap), cap);
    }

    #[test]
    fn test_backoff_never_below_base() {
        let base = Duration::from_secs(10);
        assert_eq!(backoff(base, 5, Duration::from_secs(1)), base);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_pings_while_healthy() {
        let transport = transport();
        let session = MeshSession::new(Arc::new(transport.clone()), key(), config());
        assert!(session.connect(true).await);

        tokio::time::sleep(Duration::from_secs(35)).await;

        let pings = transport.writes_to(crate::Channel::Ping);
        assert_eq!(pings.len(), 3);
        assert!(session.is_connected());
        session.disconnect().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_timeout_resets_and_continues() {
        let transport = transport();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session =
            MeshSession::with_events(Arc::new(transport.clone()), key(), config(), tx);
        assert!(session.connect(true).await);
        transport.set_ping_mode(None);
        transport.clear_peers();

        // Pings fail: waits of 10s, 20s, 40s before the third failure
        tokio::time::sleep(Duration::from_secs(75)).await;

        let mut timeouts = 0;
        let mut ping_failures = 0;
        while let Ok(event) = rx.try_recv() {
            match event {
                SessionEvent::HeartbeatTimeout { failures } => {
                    assert_eq!(failures, 3);
                    timeouts += 1;
                }
                SessionEvent::PingFailed => ping_failures += 1,
                _ => {}
            }
        }
        assert_eq!(ping_failures, 3);
        assert_eq!(timeouts, 1);
        assert_eq!(session.state(), ConnectionState::Disconnected);

        // The loop keeps going and reconnects once the hub is back
        transport.add_peer("hub", -50, "11:22:33:44:55:66".parse().unwrap());
        transport.set_ping_mode(Some(PingMode::Echo));
        tokio::time::sleep(Duration::from_secs(15)).await;
        assert!(session.is_connected());
        session.disconnect().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_timeout_from_failed_reconnects() {
        let transport = transport();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session =
            MeshSession::with_events(Arc::new(transport.clone()), key(), config(), tx);
        assert!(session.connect(true).await);
        transport.clear_peers();
        transport.drop_link();

        // Reconnects fail after 10s, 20s and 40s waits plus a 1s scan each
        tokio::time::sleep(Duration::from_secs(80)).await;

        let mut timeouts = Vec::new();
        let mut connect_failures = 0;
        let mut ping_failures = 0;
        while let Ok(event) = rx.try_recv() {
            match event {
                SessionEvent::HeartbeatTimeout { failures } => timeouts.push(failures),
                SessionEvent::ConnectFailed { .. } => connect_failures += 1,
                SessionEvent::PingFailed => ping_failures += 1,
                _ => {}
            }
        }
        assert_eq!(timeouts, vec![3]);
        assert_eq!(connect_failures, 3);
        assert_eq!(ping_failures, 0);
        assert_eq!(transport.scan_count(), 4);
        assert_eq!(transport.connect_count(), 1);
        assert_eq!(session.state(), ConnectionState::Disconnected);
        session.disconnect().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_lets_reconnect_finish_then_closes_it() {
        let transport = transport();
        let session = MeshSession::new(Arc::new(transport.clone()), key(), config());
        assert!(session.connect(true).await);
        transport.drop_link();
        transport.set_link_setup(Duration::from_secs(3));

        // Heartbeat wakes at 11s, scans until 12s, links at 15s
        tokio::time::sleep(Duration::from_secs(12)).await;
        session.disconnect().await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(transport.connect_count(), 2);
        assert_eq!(transport.writes_to(crate::Channel::Auth).len(), 4);
        assert!(!transport.is_connected().await);
        assert_eq!(session.state(), ConnectionState::Disconnected);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(transport.connect_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_reconnects_dropped_link() {
        let transport = transport();
        let session = MeshSession::new(Arc::new(transport.clone()), key(), config());
        assert!(session.connect(true).await);
        assert_eq!(transport.connect_count(), 1);

        transport.drop_link();
        tokio::time::sleep(Duration::from_secs(12)).await;

        assert_eq!(transport.connect_count(), 2);
        assert!(session.is_connected());
        session.disconnect().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_stops_after_disconnect() {
        let transport = transport();
        let session = MeshSession::new(Arc::new(transport.clone()), key(), config());
        assert!(session.connect(true).await);
        session.disconnect().await.unwrap();

        tokio::time::sleep(Duration::from_secs(120)).await;

        assert!(transport.writes_to(crate::Channel::Ping).is_empty());
        assert_eq!(transport.connect_count(), 1);
    }
}
