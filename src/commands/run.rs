use accel_devplugin::clienv;
use accel_devplugin::daemon::{EventSources, PluginControllerFactory, Supervisor};
use accel_devplugin::logging::{self, LogSettings};
use accel_devplugin::plugin_config::{Overrides, PluginConfig};
use accel_devplugin::watchers;
use anyhow::Context;
use tracing::{error, info};

use crate::args::{Cli, RunArgs};

const DEFAULT_LOG_LEVEL: &str = "info";

pub(crate) async fn cmd_run(cli: &Cli, args: &RunArgs) -> anyhow::Result<()> {
    let config_path = cli.config.clone().unwrap_or_else(clienv::config_path);
    let file_config = PluginConfig::load_from(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    logging::init(&LogSettings {
        level: cli
            .log_level
            .clone()
            .or_else(|| file_config.log_level.clone())
            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
        file: Some(
            cli.log_file
                .clone()
                .or_else(|| file_config.log_file.clone())
                .unwrap_or_else(|| clienv::DEFAULT_LOG_FILE.into()),
        ),
    });

    let overrides = Overrides {
        accel_nbunits: args.accel_nbunits,
        resource_name: args.resource_name.clone(),
        plugin_dir: args.plugin_dir.clone(),
        unit_source: args.unit_source,
        sysfs_root: args.sysfs_root.clone(),
    };
    let config = file_config.into_daemon_config(overrides).map_err(|e| {
        error!("{}", e);
        e
    })?;
    info!(
        plugin_dir = %config.plugin_dir.display(),
        resource = %config.resource_name,
        source = ?config.unit_source,
        "Device plugin configured"
    );

    info!("Starting FS watcher.");
    let (_watcher, fs_events, fs_errors) = watchers::watch_dir(&config.plugin_dir).map_err(|e| {
        error!("Failed to create FS watcher: {}", e);
        e
    })?;

    info!("Starting OS watcher.");
    let signals = watchers::signal_channel()?;

    let supervisor = Supervisor::new(
        PluginControllerFactory::new(config.clone()),
        config.kubelet_socket(),
    )
    .with_retry(config.retry.clone());

    supervisor
        .run(EventSources {
            fs_events,
            fs_errors,
            signals,
        })
        .await?;

    info!("Device plugin stopped");
    Ok(())
}
