//! Accelerator device plugin daemon
//!
//! Advertises a fixed pool of FPGA accelerator units to the kubelet and
//! answers its allocation calls:
//! - Device plugin gRPC server on a Unix socket (ListAndWatch, Allocate, ...)
//! - Registration with the kubelet
//! - Restart on kubelet restart (socket recreated) and on SIGHUP
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │                  Supervisor                   │
//! │   (fs watcher, signals, registration retry)   │
//! ├───────────────────────────────────────────────┤
//! │              PluginController                 │
//! │            (start → register)                 │
//! ├───────────────────────────────────────────────┤
//! │  AcceleratorDevicePlugin  │  HealthWatch      │
//! │  (gRPC on accelerator.sock) (inventory owner) │
//! └───────────────────────────────────────────────┘
//! ```

pub mod client;
pub mod health;
pub mod inventory;
pub mod lifecycle;
pub mod protocol;
pub mod server;
pub mod supervisor;

pub use health::HealthReporter;
pub use inventory::{DeviceHealth, DeviceInventory, DeviceRecord};
pub use lifecycle::{LifecycleFactory, PluginController, PluginControllerFactory, PluginLifecycle};
pub use server::AcceleratorDevicePlugin;
pub use supervisor::{DaemonConfig, EventSources, RetryBackoff, Supervisor, UnitSource};
