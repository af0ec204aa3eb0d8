use thiserror::Error;
use tonic::Status;

#[derive(Error, Debug)]
pub enum PluginError {
    /// Fatal condition detected before the supervisor loop is entered.
    #[error("startup failed: {0}")]
    Startup(String),

    /// Dial or Register call against the kubelet failed.
    #[error("registration with kubelet failed: {0}")]
    Registration(String),

    /// Allocate named a device this plugin does not advertise.
    #[error("invalid allocation request: unknown device: {id}")]
    Allocation { id: String },

    #[error("filesystem watcher error: {0}")]
    Watcher(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),
}

impl PluginError {
    pub fn unknown_device(id: impl Into<String>) -> Self {
        PluginError::Allocation { id: id.into() }
    }

    /// Errors the supervisor absorbs and retries on its next wake.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PluginError::Registration(_) | PluginError::Io(_) | PluginError::Transport(_)
        )
    }
}

impl From<notify::Error> for PluginError {
    fn from(e: notify::Error) -> Self {
        PluginError::Watcher(e.to_string())
    }
}

impl From<PluginError> for Status {
    fn from(err: PluginError) -> Self {
        match &err {
            PluginError::Allocation { .. } => Status::invalid_argument(err.to_string()),
            PluginError::Registration(_) | PluginError::Transport(_) => {
                Status::unavailable(err.to_string())
            }
            _ => Status::internal(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, PluginError>;
