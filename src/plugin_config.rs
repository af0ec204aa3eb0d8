use crate::clienv;
use crate::daemon::supervisor::{DaemonConfig, RetryBackoff, UnitSource};
use crate::error::{PluginError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// On-disk plugin settings. Every field is optional; command-line flags
/// win over the file, and the file wins over built-in defaults.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PluginConfig {
    /// Number of accelerator units to advertise when `unit_source = "fixed"`
    pub accel_nbunits: Option<usize>,
    /// Extended resource name, e.g. "b-com.com/accelerator"
    pub resource_name: Option<String>,
    /// Kubelet device-plugin socket directory
    pub plugin_dir: Option<PathBuf>,
    /// Where the advertised unit count comes from
    pub unit_source: Option<UnitSource>,
    /// sysfs FPGA class directory scanned when `unit_source = "sysfs"`
    pub sysfs_root: Option<PathBuf>,
    /// Retry failed registrations on a capped timer (default true)
    pub retry_backoff: Option<bool>,
    pub log_level: Option<String>,
    pub log_file: Option<PathBuf>,
}

/// Values taken from the command line, applied on top of the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub accel_nbunits: Option<usize>,
    pub resource_name: Option<String>,
    pub plugin_dir: Option<PathBuf>,
    pub unit_source: Option<UnitSource>,
    pub sysfs_root: Option<PathBuf>,
}

impl PluginConfig {
    /// Load the file at `path`; a missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        tracing::trace!(path = %path.display(), "Loading plugin config");

        if !path.exists() {
            tracing::trace!("Config file does not exist, using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content).map_err(|e| {
            PluginError::Config(format!("failed to parse {}: {}", path.display(), e))
        })?;

        tracing::trace!(?config, "Plugin config loaded");
        Ok(config)
    }

    /// Merge with command-line overrides and validate into the settings
    /// handed to the supervisor.
    pub fn into_daemon_config(self, overrides: Overrides) -> Result<DaemonConfig> {
        let resource_name = overrides
            .resource_name
            .or(self.resource_name)
            .unwrap_or_else(|| clienv::DEFAULT_RESOURCE_NAME.to_string());
        validate_resource_name(&resource_name)?;

        let plugin_dir = overrides
            .plugin_dir
            .or(self.plugin_dir)
            .unwrap_or_else(clienv::plugin_dir);

        let unit_source = match overrides.unit_source.or(self.unit_source) {
            Some(UnitSource::Sysfs) => UnitSource::Sysfs,
            _ => UnitSource::Fixed,
        };

        let accel_nbunits = overrides
            .accel_nbunits
            .or(self.accel_nbunits)
            .unwrap_or(clienv::DEFAULT_UNIT_COUNT);
        if unit_source == UnitSource::Fixed && accel_nbunits == 0 {
            return Err(PluginError::Startup(
                "no accelerator device units configured".to_string(),
            ));
        }

        let sysfs_root = overrides
            .sysfs_root
            .or(self.sysfs_root)
            .unwrap_or_else(clienv::sysfs_root);

        let retry = match self.retry_backoff {
            Some(false) => None,
            _ => Some(RetryBackoff::default()),
        };

        Ok(DaemonConfig {
            plugin_dir,
            resource_name,
            unit_source,
            accel_nbunits,
            sysfs_root,
            retry,
        })
    }
}

fn validate_resource_name(name: &str) -> Result<()> {
    match name.split_once('/') {
        Some((vendor, resource)) if !vendor.is_empty() && !resource.is_empty() => Ok(()),
        _ => Err(PluginError::Config(format!(
            "resource name '{}' must look like <vendor>/<resource>",
            name
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = PluginConfig::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, PluginConfig::default());
    }

    #[test]
    fn parses_toml_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "accel_nbunits = 8\nunit_source = \"sysfs\"\nretry_backoff = false\n",
        )
        .unwrap();

        let config = PluginConfig::load_from(&path).unwrap();
        assert_eq!(config.accel_nbunits, Some(8));
        assert_eq!(config.unit_source, Some(UnitSource::Sysfs));
        assert_eq!(config.retry_backoff, Some(false));
    }

    #[test]
    fn rejects_unknown_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "nbunits = 8\n").unwrap();
        assert!(matches!(
            PluginConfig::load_from(&path),
            Err(PluginError::Config(_))
        ));
    }

    #[test]
    fn overrides_win_over_file() {
        let file = PluginConfig {
            accel_nbunits: Some(8),
            resource_name: Some("acme.io/fpga".into()),
            plugin_dir: Some(PathBuf::from("/tmp/from-file")),
            ..Default::default()
        };
        let overrides = Overrides {
            accel_nbunits: Some(2),
            plugin_dir: Some(PathBuf::from("/tmp/from-cli")),
            ..Default::default()
        };

        let config = file.into_daemon_config(overrides).unwrap();
        assert_eq!(config.accel_nbunits, 2);
        assert_eq!(config.resource_name, "acme.io/fpga");
        assert_eq!(config.plugin_dir, PathBuf::from("/tmp/from-cli"));
        assert_eq!(config.unit_source, UnitSource::Fixed);
        assert!(config.retry.is_some());
    }

    #[test]
    fn zero_fixed_units_is_a_startup_error() {
        let overrides = Overrides {
            accel_nbunits: Some(0),
            plugin_dir: Some(PathBuf::from("/tmp")),
            ..Default::default()
        };
        let err = PluginConfig::default()
            .into_daemon_config(overrides)
            .unwrap_err();
        assert!(matches!(err, PluginError::Startup(_)));
    }

    #[test]
    fn zero_units_allowed_when_discovered() {
        let overrides = Overrides {
            accel_nbunits: Some(0),
            unit_source: Some(UnitSource::Sysfs),
            plugin_dir: Some(PathBuf::from("/tmp")),
            ..Default::default()
        };
        let config = PluginConfig::default()
            .into_daemon_config(overrides)
            .unwrap();
        assert_eq!(config.unit_source, UnitSource::Sysfs);
    }

    #[test]
    fn resource_name_needs_vendor_prefix() {
        let overrides = Overrides {
            resource_name: Some("accelerator".into()),
            plugin_dir: Some(PathBuf::from("/tmp")),
            ..Default::default()
        };
        assert!(matches!(
            PluginConfig::default().into_daemon_config(overrides),
            Err(PluginError::Config(_))
        ));
    }

    #[test]
    fn disabling_backoff_drops_retry_timer() {
        let file = PluginConfig {
            retry_backoff: Some(false),
            plugin_dir: Some(PathBuf::from("/tmp")),
            ..Default::default()
        };
        let config = file.into_daemon_config(Overrides::default()).unwrap();
        assert!(config.retry.is_none());
    }
}
