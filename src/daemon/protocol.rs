//! Kubelet device-plugin wire types.
//!
//! Messages and service stubs are generated from
//! `proto/deviceplugin/v1beta1/api.proto` by `build.rs`.

#[allow(clippy::all)]
pub mod v1beta1 {
    tonic::include_proto!("v1beta1");
}

pub use v1beta1::device_plugin_server::{DevicePlugin, DevicePluginServer};
pub use v1beta1::registration_client::RegistrationClient;
pub use v1beta1::{
    AllocateRequest, AllocateResponse, ContainerAllocateRequest, ContainerAllocateResponse,
    Device, DevicePluginOptions, Empty, ListAndWatchResponse, PreStartContainerRequest,
    PreStartContainerResponse, RegisterRequest,
};

/// API version sent in `RegisterRequest.version`.
pub const VERSION: &str = "v1beta1";

/// Health strings the kubelet understands.
pub const HEALTHY: &str = "Healthy";
pub const UNHEALTHY: &str = "Unhealthy";

/// Environment variable listing the granted units inside the container.
pub const ALLOCATED_UNITS_ENV: &str = "ACCELERATOR_UNITS";
