//! External wake sources for the supervisor: the kubelet socket directory
//! and OS signals.

use std::fmt;
use std::path::{Path, PathBuf};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::error::{PluginError, Result};

/// Signals the daemon reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsSignal {
    Hangup,
    Interrupt,
    Terminate,
    Quit,
}

impl OsSignal {
    /// SIGHUP re-registers; everything else shuts down.
    pub fn is_reload(&self) -> bool {
        matches!(self, OsSignal::Hangup)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OsSignal::Hangup => "SIGHUP",
            OsSignal::Interrupt => "SIGINT",
            OsSignal::Terminate => "SIGTERM",
            OsSignal::Quit => "SIGQUIT",
        }
    }
}

impl fmt::Display for OsSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Keeps the inotify watch alive; dropping it ends both channels.
pub struct FsWatcher {
    _watcher: RecommendedWatcher,
}

/// Watch `dir` (non-recursively). Created paths arrive on the first
/// channel, watcher failures on the second.
pub fn watch_dir(
    dir: &Path,
) -> Result<(
    FsWatcher,
    mpsc::UnboundedReceiver<PathBuf>,
    mpsc::UnboundedReceiver<PluginError>,
)> {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (error_tx, error_rx) = mpsc::unbounded_channel();

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            trace!(?event, "fs event");
            if matches!(event.kind, EventKind::Create(_)) {
                for path in event.paths {
                    let _ = event_tx.send(path);
                }
            }
        }
        Err(e) => {
            let _ = error_tx.send(PluginError::from(e));
        }
    })?;
    watcher.watch(dir, RecursiveMode::NonRecursive)?;
    debug!(dir = %dir.display(), "Watching plugin directory");

    Ok((FsWatcher { _watcher: watcher }, event_rx, error_rx))
}

/// Forward SIGHUP, SIGINT, SIGTERM and SIGQUIT into a channel.
pub fn signal_channel() -> Result<mpsc::UnboundedReceiver<OsSignal>> {
    let mut hangup = signal(SignalKind::hangup())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut quit = signal(SignalKind::quit())?;

    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        loop {
            let received = tokio::select! {
                Some(()) = hangup.recv() => OsSignal::Hangup,
                Some(()) = interrupt.recv() => OsSignal::Interrupt,
                Some(()) = terminate.recv() => OsSignal::Terminate,
                Some(()) = quit.recv() => OsSignal::Quit,
                else => break,
            };
            if tx.send(received).is_err() {
                break;
            }
        }
    });

    Ok(rx)
}
