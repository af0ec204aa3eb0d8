use std::path::PathBuf;

/// Environment variables understood by the plugin.
#[derive(Debug, Clone, Copy)]
pub enum EnvVar {
    ConfigPath,
    PluginDir,
    LogFile,
    SysfsRoot,
}

impl EnvVar {
    pub const fn as_str(self) -> &'static str {
        match self {
            EnvVar::ConfigPath => "ACCEL_PLUGIN_CONFIG",
            EnvVar::PluginDir => "ACCEL_PLUGIN_DIR",
            EnvVar::LogFile => "ACCEL_LOG_FILE",
            EnvVar::SysfsRoot => "ACCEL_SYSFS_ROOT",
        }
    }
}

/// Directory where the kubelet expects device-plugin sockets.
pub const DEVICE_PLUGIN_PATH: &str = "/var/lib/kubelet/device-plugins/";
/// Socket file name of the kubelet registration service.
pub const KUBELET_SOCKET_NAME: &str = "kubelet.sock";
/// Socket file name this plugin listens on.
pub const PLUGIN_SOCKET_NAME: &str = "accelerator.sock";

pub const DEFAULT_RESOURCE_NAME: &str = "b-com.com/accelerator";
pub const DEFAULT_UNIT_COUNT: usize = 40;
pub const DEFAULT_LOG_FILE: &str = "/var/log/k8s-accelerator-devplugin.log";
pub const DEFAULT_CONFIG_PATH: &str = "/etc/accel-devplugin/config.toml";
pub const SYSFS_FPGA_CLASS_PATH: &str = "/sys/class/fpga";

fn env_opt(var: EnvVar) -> Option<String> {
    std::env::var(var.as_str())
        .ok()
        .filter(|v| !v.trim().is_empty())
}

/// Plugin socket directory ($ACCEL_PLUGIN_DIR or the kubelet default)
pub fn plugin_dir() -> PathBuf {
    let dir = env_opt(EnvVar::PluginDir)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEVICE_PLUGIN_PATH));
    tracing::trace!(dir = %dir.display(), "Resolved plugin directory");
    dir
}

/// Config file path ($ACCEL_PLUGIN_CONFIG or /etc/accel-devplugin/config.toml)
pub fn config_path() -> PathBuf {
    let path = env_opt(EnvVar::ConfigPath)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    tracing::trace!(path = %path.display(), "Resolved config path");
    path
}

/// sysfs FPGA class directory ($ACCEL_SYSFS_ROOT or /sys/class/fpga)
pub fn sysfs_root() -> PathBuf {
    env_opt(EnvVar::SysfsRoot)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(SYSFS_FPGA_CLASS_PATH))
}

pub fn kubelet_socket(plugin_dir: &std::path::Path) -> PathBuf {
    plugin_dir.join(KUBELET_SOCKET_NAME)
}

pub fn plugin_socket(plugin_dir: &std::path::Path) -> PathBuf {
    plugin_dir.join(PLUGIN_SOCKET_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn socket_paths_live_in_plugin_dir() {
        let dir = Path::new(DEVICE_PLUGIN_PATH);
        assert_eq!(
            kubelet_socket(dir),
            PathBuf::from("/var/lib/kubelet/device-plugins/kubelet.sock")
        );
        assert_eq!(
            plugin_socket(dir),
            PathBuf::from("/var/lib/kubelet/device-plugins/accelerator.sock")
        );
    }
}
