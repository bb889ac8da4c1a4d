//! Periodic mesh clock correction.
//!
//! The mesh keeps its own clock, used by schedules stored on the devices.
//! Every `update_interval` the sync takes a reference time (system clock or
//! NTP), asks the devices in turn for the mesh time, and compares the first
//! answer against the reference. If the drift exceeds `update_threshold`,
//! that device is used to set the mesh time.

use chrono::{DateTime, Local, Utc};
use chrono_tz::Tz;
use std::sync::Weak;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::session::{Inner, MeshSession, SessionEvent};

/// Where the reference time comes from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ClockSource {
    /// The host clock
    #[default]
    System,
    /// An SNTP server, falling back to the host clock when it does not answer
    Ntp {
        /// Server address, `host` or `host:port`
        server: String,
    },
}

/// Time sync settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeSyncConfig {
    /// Wait between sync rounds
    pub update_interval: Duration,
    /// Drift tolerated before the mesh clock is set
    pub update_threshold: Duration,
    /// Reference clock
    pub source: ClockSource,
    /// Zone used when reporting times, the host zone when unset
    pub timezone: Option<Tz>,
}

impl Default for TimeSyncConfig {
    fn default() -> Self {
        Self {
            update_interval: Duration::from_secs(60 * 60),
            update_threshold: Duration::from_secs(10),
            source: ClockSource::System,
            timezone: None,
        }
    }
}

impl TimeSyncConfig {
    fn display(&self, time: DateTime<Utc>) -> String {
        match self.timezone {
            Some(zone) => time.with_timezone(&zone).to_string(),
            None => time.with_timezone(&Local).to_string(),
        }
    }
}

/// Result of one sync round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Clock was off and has been set through `device`
    Updated {
        /// Device that answered
        device: u8,
        /// Drift in seconds before the update
        drift_secs: u64,
    },
    /// Clock was within the threshold
    InSync {
        /// Device that answered
        device: u8,
    },
    /// No device answered
    NoAnswer,
}

async fn query_ntp(server: &str, timeout: Duration) -> Result<DateTime<Utc>, String> {
    let mut client = rsntp::AsyncSntpClient::new();
    client.set_timeout(timeout);
    let result = client
        .synchronize(server)
        .await
        .map_err(|e| e.to_string())?;
    result
        .datetime()
        .into_chrono_datetime()
        .map_err(|e| e.to_string())
}

/// Current time from `source`. NTP failures fall back to the host clock.
pub async fn reference_time(source: &ClockSource, timeout: Duration) -> DateTime<Utc> {
    match source {
        ClockSource::System => Utc::now(),
        ClockSource::Ntp { server } => {
            debug!("Getting time from NTP server {}", server);
            match query_ntp(server, timeout).await {
                Ok(time) => time,
                Err(e) => {
                    warn!(
                        "Failed to get time from NTP server {}: {}, using system time instead",
                        server, e
                    );
                    Utc::now()
                }
            }
        }
    }
}

/// Run one sync round over `devices` against `reference`
pub async fn sync_mesh_time(
    session: &MeshSession,
    devices: &[u8],
    reference: DateTime<Utc>,
    config: &TimeSyncConfig,
) -> SyncOutcome {
    for &device in devices {
        let mesh_time = match session.get_mesh_time(device).await {
            Ok(time) => time,
            Err(e) => {
                debug!("Device {} did not report mesh time: {}", device, e);
                continue;
            }
        };

        let drift_secs = (mesh_time.timestamp() - reference.timestamp()).unsigned_abs();
        if drift_secs <= config.update_threshold.as_secs() {
            debug!(
                "Mesh time {} is within {:?} of {}",
                config.display(mesh_time),
                config.update_threshold,
                config.display(reference)
            );
            return SyncOutcome::InSync { device };
        }

        match session.set_mesh_time(device, reference).await {
            Ok(()) => {
                info!(
                    "Updated mesh time to {} using device {} (was off by {}s)",
                    config.display(reference),
                    device,
                    drift_secs
                );
                return SyncOutcome::Updated { device, drift_secs };
            }
            Err(e) => warn!("Failed to set mesh time using device {}: {}", device, e),
        }
    }
    warn!("Failed to update mesh time, no devices available");
    SyncOutcome::NoAnswer
}

pub(crate) async fn run(
    session: Weak<Inner>,
    devices: Vec<u8>,
    config: TimeSyncConfig,
    cancel: CancellationToken,
) {
    info!(
        "Mesh time sync every {:?} over {} devices ({:?})",
        config.update_interval,
        devices.len(),
        config.source
    );
    loop {
        let Some(inner) = session.upgrade() else {
            break;
        };
        let session = MeshSession::from_inner(inner);
        if session.is_connected() {
            let timeout = session.config().operation_timeout;
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                outcome = async {
                    let reference = reference_time(&config.source, timeout).await;
                    sync_mesh_time(&session, &devices, reference, &config).await
                } => outcome,
            };
            if let SyncOutcome::Updated { device, drift_secs } = outcome {
                session.inner().emit(SessionEvent::TimeUpdated { device, drift_secs });
            }
        } else {
            debug!("Skipping mesh time sync while disconnected");
        }
        drop(session);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(config.update_interval) => {}
        }
    }
    debug!("Mesh time sync stopped");
}
