//! Intel FPGA port discovery from sysfs.
//!
//! Each `intel-fpga-dev.<n>` entry under the FPGA class directory that has
//! an `intel-fpga-port.<n>` child is an accelerator port. Its PCI address is
//! read from the `device` symlink, e.g. `device -> ../../../0000:06:00.0`.

use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use tracing::{error, info};

use crate::error::{PluginError, Result};

const DEVICE_ENTRY_PREFIX: &str = "intel-fpga-dev.";
const PORT_DEVICE_PREFIX: &str = "intel-fpga-port.";
const DEVICE_LINK: &str = "device";

/// PCI bus/device/function triple.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PciBdf {
    pub bus: u8,
    pub device: u8,
    pub function: u8,
}

impl PciBdf {
    pub fn label(&self) -> String {
        format!("{:02x}:{:02x}.{:x}", self.bus, self.device, self.function)
    }
}

impl fmt::Display for PciBdf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntelPort {
    pub instance_id: u32,
    pub name: String,
    pub bdf: PciBdf,
}

/// Ports found by one scan, sorted by instance id.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IntelPorts {
    pub ports: Vec<IntelPort>,
}

fn component_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^/:.]+").expect("static regex"))
}

fn parse_hex(s: &str, what: &str, target: &str) -> Result<u8> {
    u8::from_str_radix(s, 16)
        .map_err(|_| PluginError::Config(format!("bad PCI {} '{}' in {}", what, s, target)))
}

/// Parse the trailing `bus:device.function` of a resolved sysfs path.
pub fn bdf_from_path(target: &str) -> Result<PciBdf> {
    let items: Vec<&str> = component_re()
        .find_iter(target)
        .map(|m| m.as_str())
        .collect();
    if items.len() < 3 {
        return Err(PluginError::Config(format!(
            "no bus/device/function in {}",
            target
        )));
    }

    let tail = &items[items.len() - 3..];
    Ok(PciBdf {
        bus: parse_hex(tail[0], "bus", target)?,
        device: parse_hex(tail[1], "device", target)?,
        function: parse_hex(tail[2], "function", target)?,
    })
}

/// Resolve `link` and parse the PCI address it points at.
pub fn bdf_from_symlink(link: &Path) -> Result<PciBdf> {
    let resolved = fs::canonicalize(link)?;
    bdf_from_path(&resolved.to_string_lossy())
}

fn instance_id(entry_name: &str) -> Option<u32> {
    entry_name
        .strip_prefix(DEVICE_ENTRY_PREFIX)
        .and_then(|n| n.parse().ok())
}

impl IntelPorts {
    /// Walk `class_dir` and collect every entry that exposes a port.
    pub fn enumerate(class_dir: &Path) -> Result<Self> {
        let entries = fs::read_dir(class_dir).map_err(|e| {
            error!(
                "[IntelPorts] Failed to read directory content from {}: {}",
                class_dir.display(),
                e
            );
            PluginError::Io(e)
        })?;

        let mut found: Vec<(u32, std::path::PathBuf)> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name();
                instance_id(&name.to_string_lossy()).map(|id| (id, entry.path()))
            })
            .collect();
        found.sort_by_key(|(id, _)| *id);

        let mut ports = Vec::new();
        for (instance_id, syspath) in found {
            let name = format!("{}{}", PORT_DEVICE_PREFIX, instance_id);
            if !syspath.join(&name).exists() {
                continue;
            }

            let link = syspath.join(DEVICE_LINK);
            let bdf = bdf_from_symlink(&link).unwrap_or_else(|e| {
                error!("Failed to get busdevfn from {}: {}", link.display(), e);
                PciBdf::default()
            });

            info!(
                "[IntelPorts] new AFU PORT: name {}, instance {}, bdf {}",
                name, instance_id, bdf
            );
            ports.push(IntelPort {
                instance_id,
                name,
                bdf,
            });
        }

        info!("[IntelPorts] Nb AFU ports {}", ports.len());
        Ok(Self { ports })
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;
    use tempfile::TempDir;

    fn make_entry(class_dir: &Path, pci_dir: &Path, instance: u32, bdf: &str, with_port: bool) {
        let entry = class_dir.join(format!("intel-fpga-dev.{instance}"));
        fs::create_dir_all(&entry).unwrap();

        let target = pci_dir.join(format!("0000:{bdf}"));
        fs::create_dir_all(&target).unwrap();
        symlink(&target, entry.join("device")).unwrap();

        if with_port {
            fs::write(entry.join(format!("intel-fpga-port.{instance}")), "").unwrap();
        }
    }

    #[test]
    fn finds_only_entries_with_a_port() {
        let tmp = TempDir::new().unwrap();
        let class_dir = tmp.path().join("class/fpga");
        let pci_dir = tmp.path().join("devices/pci0000:00");
        fs::create_dir_all(&class_dir).unwrap();

        make_entry(&class_dir, &pci_dir, 0, "06:00.0", true);
        make_entry(&class_dir, &pci_dir, 1, "07:00.1", false);

        let ports = IntelPorts::enumerate(&class_dir).unwrap();
        assert_eq!(ports.len(), 1);

        let port = &ports.ports[0];
        assert_eq!(port.instance_id, 0);
        assert_eq!(port.name, "intel-fpga-port.0");
        assert_eq!(
            port.bdf,
            PciBdf {
                bus: 6,
                device: 0,
                function: 0
            }
        );
        assert_eq!(port.bdf.label(), "06:00.0");
    }

    #[test]
    fn ports_sorted_numerically_by_instance() {
        let tmp = TempDir::new().unwrap();
        let class_dir = tmp.path().join("fpga");
        let pci_dir = tmp.path().join("pci");
        make_entry(&class_dir, &pci_dir, 10, "5e:00.0", true);
        make_entry(&class_dir, &pci_dir, 2, "3b:00.0", true);

        let ports = IntelPorts::enumerate(&class_dir).unwrap();
        let ids: Vec<_> = ports.ports.iter().map(|p| p.instance_id).collect();
        assert_eq!(ids, vec![2, 10]);
    }

    #[test]
    fn ignores_unrelated_entries() {
        let tmp = TempDir::new().unwrap();
        let class_dir = tmp.path().join("fpga");
        let pci_dir = tmp.path().join("pci");
        fs::create_dir_all(class_dir.join("intel-fpga-fme.0")).unwrap();
        make_entry(&class_dir, &pci_dir, 3, "3b:00.2", true);

        let ports = IntelPorts::enumerate(&class_dir).unwrap();
        assert_eq!(ports.len(), 1);
        assert_eq!(ports.ports[0].instance_id, 3);
        assert_eq!(ports.ports[0].bdf.bus, 0x3b);
        assert_eq!(ports.ports[0].bdf.function, 2);
    }

    #[test]
    fn missing_class_dir_is_an_error() {
        let tmp = TempDir::new().unwrap();
        assert!(IntelPorts::enumerate(&tmp.path().join("nope")).is_err());
    }

    #[test]
    fn parses_bdf_from_resolved_path() {
        let bdf = bdf_from_path("/sys/devices/pci0000:00/0000:00:03.0/0000:06:00.0").unwrap();
        assert_eq!(bdf.label(), "06:00.0");
        assert!(bdf_from_path("/sys").is_err());
    }
}
