//! Restart supervisor: keeps exactly one registered plugin alive across
//! kubelet restarts and reload signals.
//!
//! ```text
//!   kubelet.sock created ──┐
//!   SIGHUP ────────────────┼──> needs_restart ──> stop old ──> create ──> serve
//!   serve failed ──────────┘                                       │
//!   SIGINT/SIGTERM/SIGQUIT ──> stop current ──> exit               └─ ok: clear flag
//! ```

use super::lifecycle::{LifecycleFactory, PluginLifecycle};
use crate::clienv;
use crate::error::{PluginError, Result};
use crate::watchers::OsSignal;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Where the advertised unit count comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum UnitSource {
    /// A configured count (`--accel-nbunits`)
    #[default]
    Fixed,
    /// One unit per Intel FPGA port found in sysfs
    Sysfs,
}

/// Capped exponential delay between failed serve attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryBackoff {
    pub initial: Duration,
    pub max: Duration,
    current: Duration,
}

impl RetryBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Delay to wait now; doubles the next one up to `max`.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

impl Default for RetryBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30))
    }
}

/// Resolved daemon settings.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub plugin_dir: PathBuf,
    pub resource_name: String,
    pub unit_source: UnitSource,
    pub accel_nbunits: usize,
    pub sysfs_root: PathBuf,
    /// `None` retries only when an external event wakes the loop
    pub retry: Option<RetryBackoff>,
}

impl DaemonConfig {
    pub fn kubelet_socket(&self) -> PathBuf {
        clienv::kubelet_socket(&self.plugin_dir)
    }
}

/// The three wake sources of the supervisor loop.
pub struct EventSources {
    /// Paths created in the plugin directory
    pub fs_events: mpsc::UnboundedReceiver<PathBuf>,
    /// Watcher delivery errors
    pub fs_errors: mpsc::UnboundedReceiver<PluginError>,
    pub signals: mpsc::UnboundedReceiver<OsSignal>,
}

pub struct Supervisor<F: LifecycleFactory> {
    factory: F,
    kubelet_socket: PathBuf,
    retry: Option<RetryBackoff>,
}

impl<F: LifecycleFactory> Supervisor<F> {
    pub fn new(factory: F, kubelet_socket: impl Into<PathBuf>) -> Self {
        Self {
            factory,
            kubelet_socket: kubelet_socket.into(),
            retry: None,
        }
    }

    pub fn with_retry(mut self, retry: Option<RetryBackoff>) -> Self {
        self.retry = retry;
        self
    }

    /// Run until a termination signal arrives or every event source closes.
    pub async fn run(mut self, mut sources: EventSources) -> Result<()> {
        let mut restart = true;
        let mut current: Option<F::Controller> = None;
        let mut retry_in: Option<Duration> = None;

        loop {
            if restart {
                if let Some(mut controller) = current.take() {
                    debug!("restart: first stop device plugin");
                    if let Err(e) = controller.stop().await {
                        warn!("Failed to stop previous device plugin: {}", e);
                    }
                }

                match self.factory.create() {
                    Ok(mut controller) => {
                        match controller.serve().await {
                            Ok(()) => {
                                restart = false;
                                retry_in = None;
                                if let Some(retry) = self.retry.as_mut() {
                                    retry.reset();
                                }
                            }
                            Err(e) if e.is_retryable() => {
                                error!(
                                    "Could not contact Kubelet, retrying. Did you enable the device plugin feature gate? ({})",
                                    e
                                );
                                retry_in = self.retry.as_mut().map(RetryBackoff::next_delay);
                            }
                            Err(e) => {
                                error!("Could not serve device plugin: {}", e);
                                retry_in = self.retry.as_mut().map(RetryBackoff::next_delay);
                            }
                        }
                        current = Some(controller);
                    }
                    Err(e) => {
                        error!("Could not create device plugin: {}", e);
                        retry_in = self.retry.as_mut().map(RetryBackoff::next_delay);
                    }
                }
            }

            tokio::select! {
                Some(path) = sources.fs_events.recv() => {
                    if path == self.kubelet_socket {
                        info!("inotify: {} created, restarting.", path.display());
                        restart = true;
                    }
                }

                Some(err) = sources.fs_errors.recv() => {
                    error!("inotify: {}", err);
                }

                Some(signal) = sources.signals.recv() => {
                    if signal.is_reload() {
                        info!("Received {}, restarting.", signal);
                        restart = true;
                    } else {
                        info!("Received signal \"{}\", shutting down.", signal);
                        break;
                    }
                }

                _ = tokio::time::sleep(retry_in.unwrap_or_default()), if retry_in.is_some() => {
                    debug!("Retrying device plugin registration");
                }

                else => {
                    warn!("All event sources closed, shutting down.");
                    break;
                }
            }
        }

        if let Some(mut controller) = current.take() {
            if let Err(e) = controller.stop().await {
                error!("Failed to stop device plugin: {}", e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Call {
        Serve(usize, bool),
        Stop(usize),
    }

    struct FakeController {
        index: usize,
        succeed: bool,
        calls: mpsc::UnboundedSender<Call>,
    }

    #[async_trait]
    impl PluginLifecycle for FakeController {
        async fn serve(&mut self) -> Result<()> {
            let _ = self.calls.send(Call::Serve(self.index, self.succeed));
            if self.succeed {
                Ok(())
            } else {
                Err(PluginError::Registration("kubelet not listening".into()))
            }
        }

        async fn stop(&mut self) -> Result<()> {
            let _ = self.calls.send(Call::Stop(self.index));
            Ok(())
        }
    }

    struct FakeFactory {
        outcomes: VecDeque<bool>,
        created: usize,
        calls: mpsc::UnboundedSender<Call>,
    }

    impl LifecycleFactory for FakeFactory {
        type Controller = FakeController;

        fn create(&mut self) -> Result<FakeController> {
            let controller = FakeController {
                index: self.created,
                succeed: self.outcomes.pop_front().unwrap_or(true),
                calls: self.calls.clone(),
            };
            self.created += 1;
            Ok(controller)
        }
    }

    struct Harness {
        fs_events: mpsc::UnboundedSender<PathBuf>,
        fs_errors: mpsc::UnboundedSender<PluginError>,
        signals: mpsc::UnboundedSender<OsSignal>,
        calls: mpsc::UnboundedReceiver<Call>,
        task: tokio::task::JoinHandle<Result<()>>,
    }

    const KUBELET: &str = "/var/lib/kubelet/device-plugins/kubelet.sock";

    fn spawn(outcomes: &[bool]) -> Harness {
        let (calls_tx, calls) = mpsc::unbounded_channel();
        let (fs_events, fs_events_rx) = mpsc::unbounded_channel();
        let (fs_errors, fs_errors_rx) = mpsc::unbounded_channel();
        let (signals, signals_rx) = mpsc::unbounded_channel();

        let factory = FakeFactory {
            outcomes: outcomes.iter().copied().collect(),
            created: 0,
            calls: calls_tx,
        };
        let supervisor = Supervisor::new(factory, KUBELET);
        let task = tokio::spawn(supervisor.run(EventSources {
            fs_events: fs_events_rx,
            fs_errors: fs_errors_rx,
            signals: signals_rx,
        }));

        Harness {
            fs_events,
            fs_errors,
            signals,
            calls,
            task,
        }
    }

    impl Harness {
        async fn expect(&mut self, call: Call) {
            assert_eq!(self.calls.recv().await, Some(call));
        }
    }

    #[tokio::test]
    async fn retries_until_registered_then_restarts_and_terminates() {
        let mut h = spawn(&[false, false, true]);

        h.expect(Call::Serve(0, false)).await;

        h.fs_errors
            .send(PluginError::Watcher("queue overflow".into()))
            .unwrap();
        h.expect(Call::Stop(0)).await;
        h.expect(Call::Serve(1, false)).await;

        h.fs_errors
            .send(PluginError::Watcher("queue overflow".into()))
            .unwrap();
        h.expect(Call::Stop(1)).await;
        h.expect(Call::Serve(2, true)).await;

        h.fs_events.send(PathBuf::from(KUBELET)).unwrap();
        h.expect(Call::Stop(2)).await;
        h.expect(Call::Serve(3, true)).await;

        h.signals.send(OsSignal::Terminate).unwrap();
        h.expect(Call::Stop(3)).await;

        h.task.await.unwrap().unwrap();
        assert_eq!(h.calls.recv().await, None);
    }

    #[tokio::test]
    async fn unrelated_files_and_errors_do_not_restart() {
        let mut h = spawn(&[true]);
        h.expect(Call::Serve(0, true)).await;

        h.fs_events
            .send(PathBuf::from("/var/lib/kubelet/device-plugins/other.sock"))
            .unwrap();
        h.fs_errors
            .send(PluginError::Watcher("transient".into()))
            .unwrap();
        h.signals.send(OsSignal::Interrupt).unwrap();

        h.expect(Call::Stop(0)).await;
        h.task.await.unwrap().unwrap();
        assert_eq!(h.calls.recv().await, None);
    }

    #[tokio::test]
    async fn hangup_restarts_the_plugin() {
        let mut h = spawn(&[true, true]);
        h.expect(Call::Serve(0, true)).await;

        h.signals.send(OsSignal::Hangup).unwrap();
        h.expect(Call::Stop(0)).await;
        h.expect(Call::Serve(1, true)).await;

        h.signals.send(OsSignal::Quit).unwrap();
        h.expect(Call::Stop(1)).await;
        h.task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_retries_without_external_events() {
        let (calls_tx, mut calls) = mpsc::unbounded_channel();
        let (_fs_events, fs_events_rx) = mpsc::unbounded_channel();
        let (_fs_errors, fs_errors_rx) = mpsc::unbounded_channel();
        let (signals, signals_rx) = mpsc::unbounded_channel();

        let factory = FakeFactory {
            outcomes: [false, true].into_iter().collect(),
            created: 0,
            calls: calls_tx,
        };
        let supervisor = Supervisor::new(factory, KUBELET).with_retry(Some(RetryBackoff::default()));
        let task = tokio::spawn(supervisor.run(EventSources {
            fs_events: fs_events_rx,
            fs_errors: fs_errors_rx,
            signals: signals_rx,
        }));

        assert_eq!(calls.recv().await, Some(Call::Serve(0, false)));
        assert_eq!(calls.recv().await, Some(Call::Stop(0)));
        assert_eq!(calls.recv().await, Some(Call::Serve(1, true)));

        signals.send(OsSignal::Terminate).unwrap();
        assert_eq!(calls.recv().await, Some(Call::Stop(1)));
        task.await.unwrap().unwrap();
    }

    struct StuckSocketController;

    #[async_trait]
    impl PluginLifecycle for StuckSocketController {
        async fn serve(&mut self) -> Result<()> {
            Ok(())
        }

        async fn stop(&mut self) -> Result<()> {
            Err(PluginError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "cannot remove socket",
            )))
        }
    }

    struct StuckSocketFactory;

    impl LifecycleFactory for StuckSocketFactory {
        type Controller = StuckSocketController;

        fn create(&mut self) -> Result<StuckSocketController> {
            Ok(StuckSocketController)
        }
    }

    #[tokio::test]
    async fn shutdown_succeeds_even_if_final_stop_fails() {
        let (_fs_events, fs_events_rx) = mpsc::unbounded_channel();
        let (_fs_errors, fs_errors_rx) = mpsc::unbounded_channel();
        let (signals, signals_rx) = mpsc::unbounded_channel();
        signals.send(OsSignal::Terminate).unwrap();

        let result = Supervisor::new(StuckSocketFactory, KUBELET)
            .run(EventSources {
                fs_events: fs_events_rx,
                fs_errors: fs_errors_rx,
                signals: signals_rx,
            })
            .await;
        assert!(result.is_ok());
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        let mut backoff = RetryBackoff::new(Duration::from_secs(1), Duration::from_secs(5));
        let delays: Vec<_> = (0..5).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 5, 5]);
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }
}
