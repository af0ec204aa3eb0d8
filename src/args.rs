use accel_devplugin::clienv::EnvVar;
use accel_devplugin::daemon::UnitSource;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "accel-devplugin")]
#[command(version)]
#[command(about = "Kubernetes device plugin for FPGA accelerator units", long_about = None)]
pub(crate) struct Cli {
    /// Logging level: error, warn, info, debug, trace
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Append logs to this file
    #[arg(long, global = true, env = EnvVar::LogFile.as_str())]
    pub log_file: Option<PathBuf>,

    /// Plugin configuration file (TOML)
    #[arg(long, global = true, env = EnvVar::ConfigPath.as_str())]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Serve the device plugin and keep it registered with the kubelet (default)
    Run(RunArgs),

    /// List the Intel FPGA accelerator ports found in sysfs
    Ports {
        /// sysfs FPGA class directory
        #[arg(long, env = EnvVar::SysfsRoot.as_str())]
        sysfs_root: Option<PathBuf>,

        /// Print JSON instead of one line per port
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Default)]
pub(crate) struct RunArgs {
    /// Total number of accelerator units of the FPGA
    #[arg(long)]
    pub accel_nbunits: Option<usize>,

    /// Kubelet device-plugin socket directory
    #[arg(long, env = EnvVar::PluginDir.as_str())]
    pub plugin_dir: Option<PathBuf>,

    /// Extended resource name advertised to the kubelet
    #[arg(long)]
    pub resource_name: Option<String>,

    /// Where the advertised unit count comes from
    #[arg(long, value_enum)]
    pub unit_source: Option<UnitSource>,

    /// sysfs FPGA class directory used with --unit-source sysfs
    #[arg(long, env = EnvVar::SysfsRoot.as_str())]
    pub sysfs_root: Option<PathBuf>,
}
