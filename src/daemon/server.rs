use super::client::{self, DIAL_TIMEOUT};
use super::health::{self, HealthReporter, HealthWatch, SnapshotResult};
use super::inventory::{parse_device_id, DeviceInventory};
use super::protocol::{
    AllocateRequest, AllocateResponse, ContainerAllocateRequest, ContainerAllocateResponse,
    DevicePlugin, DevicePluginOptions, DevicePluginServer, Empty, PreStartContainerRequest,
    PreStartContainerResponse, ALLOCATED_UNITS_ENV,
};
use crate::error::{PluginError, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UnixListener;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::{ReceiverStream, UnixListenerStream};
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tonic::{Request, Response, Status};
use tracing::{debug, info, trace, warn};

/// How long `stop()` waits for the final snapshot and server shutdown.
pub const STOP_GRACE: Duration = Duration::from_secs(1);

const STREAM_BUFFER: usize = 16;

/// RPC half of the plugin: the kubelet-facing DevicePlugin service.
#[derive(Clone)]
pub struct DevicePluginService {
    unit_count: usize,
    watch: Arc<Mutex<HealthWatch>>,
    subscription: Arc<Mutex<Option<CancellationToken>>>,
    stop: CancellationToken,
}

impl DevicePluginService {
    fn new(inventory: DeviceInventory, stop: CancellationToken) -> (Self, HealthReporter) {
        let unit_count = inventory.len();
        let (reporter, watch) = health::channel(inventory);
        let service = Self {
            unit_count,
            watch: Arc::new(Mutex::new(watch)),
            subscription: Arc::new(Mutex::new(None)),
            stop,
        };
        (service, reporter)
    }
}

/// Build the Allocate answer for `requests` against `unit_count` units.
///
/// Every id of every container request must name a unit, otherwise the whole
/// call fails. Each container gets the same comma-joined list of all ids
/// requested in the call.
pub fn allocate_units(
    requests: &[ContainerAllocateRequest],
    unit_count: usize,
) -> Result<AllocateResponse> {
    let mut ids: Vec<&str> = Vec::new();
    for req in requests {
        debug!("Request IDs: {:?}", req.devices_ids);
        for id in &req.devices_ids {
            if parse_device_id(id, unit_count).is_none() {
                return Err(PluginError::unknown_device(id.as_str()));
            }
            ids.push(id);
        }
    }

    let joined = ids.join(",");
    info!("Allocate IDs: {}", joined);

    let container_responses = requests
        .iter()
        .map(|_| ContainerAllocateResponse {
            envs: HashMap::from([(ALLOCATED_UNITS_ENV.to_string(), joined.clone())]),
            ..Default::default()
        })
        .collect();

    Ok(AllocateResponse {
        container_responses,
    })
}

#[tonic::async_trait]
impl DevicePlugin for DevicePluginService {
    type ListAndWatchStream = ReceiverStream<SnapshotResult>;

    async fn get_device_plugin_options(
        &self,
        _request: Request<Empty>,
    ) -> std::result::Result<Response<DevicePluginOptions>, Status> {
        Ok(Response::new(DevicePluginOptions::default()))
    }

    async fn list_and_watch(
        &self,
        _request: Request<Empty>,
    ) -> std::result::Result<Response<Self::ListAndWatchStream>, Status> {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let watch = Arc::clone(&self.watch);
        let stop = self.stop.clone();

        // Only the newest subscriber is served
        let superseded = CancellationToken::new();
        if let Some(previous) = self.subscription.lock().await.replace(superseded.clone()) {
            debug!("New ListAndWatch subscriber, ending the previous one");
            previous.cancel();
        }

        tokio::spawn(async move {
            // Holding the lock makes this task the only health consumer
            let mut watch = watch.lock_owned().await;
            let end = watch.run(&stop, &superseded, &tx).await;
            debug!(?end, "ListAndWatch finished");
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }

    async fn allocate(
        &self,
        request: Request<AllocateRequest>,
    ) -> std::result::Result<Response<AllocateResponse>, Status> {
        let request = request.into_inner();
        let response = allocate_units(&request.container_requests, self.unit_count)?;
        Ok(Response::new(response))
    }

    async fn pre_start_container(
        &self,
        _request: Request<PreStartContainerRequest>,
    ) -> std::result::Result<Response<PreStartContainerResponse>, Status> {
        Ok(Response::new(PreStartContainerResponse {}))
    }
}

/// One device-plugin gRPC server bound to a Unix socket.
///
/// `start` binds and serves; `stop` tears everything down and may be called
/// any number of times. A stopped instance is not restarted; build a new one.
pub struct AcceleratorDevicePlugin {
    socket: PathBuf,
    service: DevicePluginService,
    reporter: HealthReporter,
    stop: CancellationToken,
    server: Option<JoinHandle<std::result::Result<(), tonic::transport::Error>>>,
}

impl AcceleratorDevicePlugin {
    pub fn new(socket: impl Into<PathBuf>, unit_count: usize) -> Self {
        let stop = CancellationToken::new();
        let (service, reporter) =
            DevicePluginService::new(DeviceInventory::build(unit_count), stop.clone());
        Self {
            socket: socket.into(),
            service,
            reporter,
            stop,
            server: None,
        }
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    pub fn unit_count(&self) -> usize {
        self.service.unit_count
    }

    pub fn is_running(&self) -> bool {
        self.server.is_some()
    }

    /// Handle for feeding health transitions into the ListAndWatch stream.
    pub fn health_reporter(&self) -> HealthReporter {
        self.reporter.clone()
    }

    /// Bind the socket, serve in the background, and wait until the server
    /// accepts a connection.
    pub async fn start(&mut self) -> Result<()> {
        if self.server.is_some() {
            return Ok(());
        }
        if self.stop.is_cancelled() {
            return Err(PluginError::Startup(
                "device plugin instance was already stopped".to_string(),
            ));
        }

        cleanup(&self.socket)?;
        let listener = UnixListener::bind(&self.socket)?;
        let incoming = UnixListenerStream::new(listener);
        trace!(socket = %self.socket.display(), "Listener bound");

        let svc = DevicePluginServer::new(self.service.clone());
        let shutdown = self.stop.clone();
        self.server = Some(tokio::spawn(async move {
            Server::builder()
                .add_service(svc)
                .serve_with_incoming_shutdown(incoming, async move { shutdown.cancelled().await })
                .await
        }));

        // The accept loop runs in another task; make sure it is live before
        // the kubelet is told to dial us.
        if let Err(e) = client::dial(&self.socket, DIAL_TIMEOUT).await {
            warn!("Device plugin server did not come up: {}", e);
            self.stop().await?;
            return Err(e);
        }

        Ok(())
    }

    /// Stop serving: wake ListAndWatch for its final snapshot, shut the gRPC
    /// server down and remove the socket. No-op when not running.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(server) = self.server.take() else {
            return Ok(());
        };

        let deadline = tokio::time::Instant::now() + STOP_GRACE;
        self.stop.cancel();

        // The stream task holds the watch lock until its final send is done
        if tokio::time::timeout_at(deadline, self.service.watch.lock())
            .await
            .is_err()
        {
            warn!("ListAndWatch did not drain within {:?}", STOP_GRACE);
        }

        let abort = server.abort_handle();
        match tokio::time::timeout_at(deadline, server).await {
            Ok(Ok(Ok(()))) => debug!("gRPC server stopped"),
            Ok(Ok(Err(e))) => warn!("gRPC server exited with error: {}", e),
            Ok(Err(e)) => warn!("gRPC server task failed: {}", e),
            Err(_) => {
                warn!("gRPC server still busy after {:?}, aborting", STOP_GRACE);
                abort.abort();
            }
        }

        cleanup(&self.socket)
    }

    /// Register this server's socket with the kubelet.
    pub async fn register(&self, kubelet_socket: &Path, resource_name: &str) -> Result<()> {
        let endpoint = self
            .socket
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                PluginError::Registration(format!(
                    "socket path {} has no file name",
                    self.socket.display()
                ))
            })?;
        client::register(kubelet_socket, &endpoint, resource_name).await
    }
}

/// Remove a stale socket file; a missing file is fine.
fn cleanup(socket: &Path) -> Result<()> {
    match std::fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
