//! Outbound gRPC connections over Unix-domain sockets.

use std::path::{Path, PathBuf};
use std::time::Duration;

use hyper_util::rt::TokioIo;
use tokio::net::UnixStream;
use tonic::transport::{Channel, Endpoint, Uri};
use tower::service_fn;
use tracing::{debug, trace};

use super::protocol::{RegisterRequest, RegistrationClient, VERSION};
use crate::error::{PluginError, Result};

/// Bound on every outbound dial.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(5);

// Ignored by the connector; tonic only needs a syntactically valid URI.
const UDS_PLACEHOLDER_URI: &str = "http://[::]:50051";

/// Connect to the gRPC server listening on `socket`, failing after `timeout`.
pub async fn dial(socket: &Path, timeout: Duration) -> Result<Channel> {
    trace!(socket = %socket.display(), "Dialing");
    let path: PathBuf = socket.to_path_buf();

    let endpoint = Endpoint::try_from(UDS_PLACEHOLDER_URI)?.connect_timeout(timeout);
    let connect = endpoint.connect_with_connector(service_fn(move |_: Uri| {
        let path = path.clone();
        async move { Ok::<_, std::io::Error>(TokioIo::new(UnixStream::connect(path).await?)) }
    }));

    match tokio::time::timeout(timeout, connect).await {
        Ok(channel) => Ok(channel?),
        Err(_) => Err(PluginError::Io(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            format!("dial {} timed out after {:?}", socket.display(), timeout),
        ))),
    }
}

/// Register `endpoint` (a socket file name inside the kubelet plugin
/// directory) for `resource_name` with the kubelet at `kubelet_socket`.
pub async fn register(kubelet_socket: &Path, endpoint: &str, resource_name: &str) -> Result<()> {
    let channel = dial(kubelet_socket, DIAL_TIMEOUT)
        .await
        .map_err(|e| PluginError::Registration(e.to_string()))?;

    let mut client = RegistrationClient::new(channel);
    let request = RegisterRequest {
        version: VERSION.to_string(),
        endpoint: endpoint.to_string(),
        resource_name: resource_name.to_string(),
        options: None,
    };
    debug!(?request, "Sending registration");

    match tokio::time::timeout(DIAL_TIMEOUT, client.register(request)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(status)) => Err(PluginError::Registration(status.to_string())),
        Err(_) => Err(PluginError::Registration(format!(
            "Register call timed out after {:?}",
            DIAL_TIMEOUT
        ))),
    }
}
