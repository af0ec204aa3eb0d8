use super::server::AcceleratorDevicePlugin;
use super::supervisor::{DaemonConfig, UnitSource};
use crate::clienv;
use crate::error::{PluginError, Result};
use crate::topology::IntelPorts;
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::{error, info};

/// Start/stop/register sequencing for one plugin server.
#[async_trait]
pub trait PluginLifecycle: Send {
    /// Bring the server up and register it. On error nothing is left bound.
    async fn serve(&mut self) -> Result<()>;

    /// Tear the server down. Idempotent.
    async fn stop(&mut self) -> Result<()>;
}

/// Builds a fresh controller (and with it a fresh inventory) per restart.
pub trait LifecycleFactory {
    type Controller: PluginLifecycle;

    fn create(&mut self) -> Result<Self::Controller>;
}

/// Lifecycle controller around an [`AcceleratorDevicePlugin`].
pub struct PluginController {
    plugin: AcceleratorDevicePlugin,
    kubelet_socket: PathBuf,
    resource_name: String,
}

impl PluginController {
    pub fn new(
        plugin: AcceleratorDevicePlugin,
        kubelet_socket: impl Into<PathBuf>,
        resource_name: impl Into<String>,
    ) -> Self {
        Self {
            plugin,
            kubelet_socket: kubelet_socket.into(),
            resource_name: resource_name.into(),
        }
    }

    pub fn plugin(&self) -> &AcceleratorDevicePlugin {
        &self.plugin
    }
}

#[async_trait]
impl PluginLifecycle for PluginController {
    async fn serve(&mut self) -> Result<()> {
        if let Err(e) = self.plugin.start().await {
            error!("Could not start device plugin: {}", e);
            return Err(e);
        }
        info!("Starting to serve on {}", self.plugin.socket().display());

        if let Err(e) = self
            .plugin
            .register(&self.kubelet_socket, &self.resource_name)
            .await
        {
            error!("Could not register device plugin: {}", e);
            if let Err(stop_err) = self.plugin.stop().await {
                error!("Failed to stop unregistered device plugin: {}", stop_err);
            }
            return Err(e);
        }
        info!("Registered device plugin with Kubelet");

        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.plugin.stop().await
    }
}

/// Creates [`PluginController`]s from the daemon settings.
pub struct PluginControllerFactory {
    config: DaemonConfig,
}

impl PluginControllerFactory {
    pub fn new(config: DaemonConfig) -> Self {
        Self { config }
    }

    /// Units to advertise for the next controller.
    fn unit_count(&self) -> Result<usize> {
        match self.config.unit_source {
            UnitSource::Fixed => Ok(self.config.accel_nbunits),
            UnitSource::Sysfs => {
                let ports = IntelPorts::enumerate(&self.config.sysfs_root)?;
                if ports.is_empty() {
                    return Err(PluginError::Startup(format!(
                        "no accelerator ports found under {}",
                        self.config.sysfs_root.display()
                    )));
                }
                Ok(ports.len())
            }
        }
    }
}

impl LifecycleFactory for PluginControllerFactory {
    type Controller = PluginController;

    fn create(&mut self) -> Result<PluginController> {
        let units = self.unit_count()?;
        info!("FPGA contains {} accelerator device units", units);

        let plugin =
            AcceleratorDevicePlugin::new(clienv::plugin_socket(&self.config.plugin_dir), units);
        Ok(PluginController::new(
            plugin,
            self.config.kubelet_socket(),
            self.config.resource_name.clone(),
        ))
    }
}
