//! UpsDevice: per-device polling of a NUT server
//!
//! Every tick opens a fresh connection, logs in, reads all variables,
//! reconciles capabilities and closes the connection again, whatever the
//! outcome. A failed tick marks the device unavailable until the next
//! successful one.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, Instant, MissedTickBehavior};

use crate::capability::{reconcile, ReconcileReport};
use crate::error::UpsError;
use crate::host::{DeviceCapabilities, DeviceStore};
use crate::models::{DeviceIdentity, DeviceSettings};
use crate::nut::{translate, UpsClient, UpsConnector};

/// Result of one tick
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Available(ReconcileReport),
    Unavailable(UpsError),
    /// Previous tick still running
    Skipped,
}

/// Run one blocking protocol step under a deadline
pub(crate) async fn with_deadline<T, F>(
    step: &'static str,
    secs: u64,
    fut: F,
) -> Result<T, UpsError>
where
    F: Future<Output = Result<T, UpsError>>,
{
    let secs = secs.max(1);
    time::timeout(Duration::from_secs(secs), fut)
        .await
        .map_err(|_| UpsError::Timeout { step, secs })?
}

struct DeviceInner {
    identity: DeviceIdentity,
    settings: RwLock<DeviceSettings>,
    connector: Arc<dyn UpsConnector>,
    device: Arc<dyn DeviceCapabilities>,
    store: Arc<dyn DeviceStore>,
    /// Held for the duration of a tick
    tick: Mutex<()>,
}

impl DeviceInner {
    async fn poll_once(&self) -> PollOutcome {
        let Ok(_tick) = self.tick.try_lock() else {
            tracing::debug!(
                "[UpsPoller] {}: previous poll still running, skipping",
                self.identity.name
            );
            return PollOutcome::Skipped;
        };

        let settings = self.settings.read().await.clone();
        let mut client = self.connector.client(&settings);

        let result = self.read_and_reconcile(client.as_mut(), &settings).await;
        client.close().await;

        match result {
            Ok(report) => {
                self.device.set_available().await;
                tracing::debug!(
                    "[UpsPoller] {} ({}) polled: {} values written",
                    self.identity.name,
                    settings.ups_name,
                    report.written
                );
                PollOutcome::Available(report)
            }
            Err(e) => {
                tracing::warn!(
                    "[UpsPoller] {} ({}@{}:{}) poll failed: {}",
                    self.identity.name,
                    settings.ups_name,
                    settings.ip,
                    settings.port,
                    e
                );
                self.device.set_unavailable(&e.reason()).await;
                PollOutcome::Unavailable(e)
            }
        }
    }

    async fn read_and_reconcile(
        &self,
        client: &mut dyn UpsClient,
        settings: &DeviceSettings,
    ) -> Result<ReconcileReport, UpsError> {
        with_deadline("connecting", settings.timeout, client.connect()).await?;
        with_deadline(
            "authenticating",
            settings.timeout,
            client.authenticate(&settings.username, &settings.password),
        )
        .await?;
        let raw = with_deadline(
            "fetching variables",
            settings.timeout,
            client.fetch_variables(&settings.ups_name),
        )
        .await?;

        let status = translate(&raw);
        reconcile(&status, self.store.as_ref(), self.device.as_ref()).await
    }
}

/// Repeating poll timer owned by a device. Stopping it lets an in-flight
/// tick finish but no further tick starts.
pub struct PollTask {
    period: Duration,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl PollTask {
    fn spawn(inner: Arc<DeviceInner>, period: Duration, first_tick_now: bool) -> Self {
        let (shutdown, mut stopped) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let start = if first_tick_now {
                Instant::now()
            } else {
                Instant::now() + period
            };
            let mut timer = time::interval_at(start, period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = stopped.changed() => break,
                    _ = timer.tick() => {}
                }
                inner.poll_once().await;
            }
        });

        Self {
            period,
            shutdown,
            handle,
        }
    }

    fn stop(self) -> JoinHandle<()> {
        let _ = self.shutdown.send(true);
        self.handle
    }
}

/// A UPS device instance and its lifecycle hooks
pub struct UpsDevice {
    inner: Arc<DeviceInner>,
    task: Mutex<Option<PollTask>>,
}

impl UpsDevice {
    pub fn new(
        identity: DeviceIdentity,
        settings: DeviceSettings,
        connector: Arc<dyn UpsConnector>,
        device: Arc<dyn DeviceCapabilities>,
        store: Arc<dyn DeviceStore>,
    ) -> Self {
        Self {
            inner: Arc::new(DeviceInner {
                identity,
                settings: RwLock::new(settings),
                connector,
                device,
                store,
                tick: Mutex::new(()),
            }),
            task: Mutex::new(None),
        }
    }

    /// Device added or app started: poll now, then every `interval` seconds
    pub async fn on_init(&self) {
        let interval = self.inner.settings.read().await.interval;
        tracing::info!(
            "[UpsPoller] {} initialized (interval: {}s)",
            self.inner.identity.name,
            interval
        );
        self.restart_timer(interval, true).await;
    }

    /// Apply new settings. Connection settings are used from the next tick on;
    /// an interval change replaces the running timer.
    pub async fn on_settings(&self, new_settings: DeviceSettings) -> Result<(), UpsError> {
        if new_settings.interval == 0 {
            return Err(UpsError::Settings("interval must be at least 1 second".into()));
        }
        if new_settings.ip.trim().is_empty() {
            return Err(UpsError::Settings("ip must not be empty".into()));
        }

        let interval_changed = {
            let mut settings = self.inner.settings.write().await;
            let changed = settings.interval != new_settings.interval;
            *settings = new_settings;
            changed
        };

        if interval_changed && self.task.lock().await.is_some() {
            let interval = self.inner.settings.read().await.interval;
            tracing::info!(
                "[UpsPoller] {} poll interval changed to {}s",
                self.inner.identity.name,
                interval
            );
            self.restart_timer(interval, false).await;
        }

        Ok(())
    }

    /// Device removed: stop polling. Waits for an in-flight tick to finish.
    pub async fn on_deleted(&self) {
        let task = self.task.lock().await.take();
        if let Some(task) = task {
            let _ = task.stop().await;
        }
        tracing::info!("[UpsPoller] {} removed, polling stopped", self.inner.identity.name);
    }

    /// Manual poll, outside the timer
    #[cfg(test)]
    pub async fn poll_once(&self) -> PollOutcome {
        self.inner.poll_once().await
    }

    pub async fn settings(&self) -> DeviceSettings {
        self.inner.settings.read().await.clone()
    }

    /// Period of the running timer, `None` when not polling
    #[cfg(test)]
    pub async fn poll_interval(&self) -> Option<Duration> {
        self.task.lock().await.as_ref().map(|t| t.period)
    }

    async fn restart_timer(&self, interval_secs: u64, first_tick_now: bool) {
        let period = Duration::from_secs(interval_secs.max(1));
        let mut task = self.task.lock().await;
        if let Some(old) = task.take() {
            tracing::debug!(
                "[UpsPoller] {}: stopping {}s timer",
                self.inner.identity.name,
                old.period.as_secs()
            );
            // Not awaited: an in-flight tick keeps running to completion
            drop(old.stop());
        }
        *task = Some(PollTask::spawn(self.inner.clone(), period, first_tick_now));
    }
}
