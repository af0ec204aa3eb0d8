use std::path::PathBuf;

use accel_devplugin::clienv;
use accel_devplugin::logging::{self, LogSettings};
use accel_devplugin::topology::IntelPorts;
use anyhow::Context;

use crate::args::Cli;

pub(crate) fn cmd_ports(cli: &Cli, sysfs_root: Option<PathBuf>, json: bool) -> anyhow::Result<()> {
    logging::init(&LogSettings {
        level: cli.log_level.clone().unwrap_or_else(|| "warn".to_string()),
        file: cli.log_file.clone(),
    });

    let root = sysfs_root.unwrap_or_else(clienv::sysfs_root);
    let ports = IntelPorts::enumerate(&root)
        .with_context(|| format!("Failed to enumerate ports under {}", root.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&ports)?);
        return Ok(());
    }

    if ports.is_empty() {
        println!("No accelerator ports found under {}", root.display());
        return Ok(());
    }

    for port in &ports.ports {
        println!(
            "{:<20} instance {:<3} bdf {}",
            port.name,
            port.instance_id,
            port.bdf.label()
        );
    }
    println!("{} port(s)", ports.len());
    Ok(())
}
