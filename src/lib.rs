pub mod clienv;
pub mod daemon;
pub mod error;
pub mod logging;
pub mod plugin_config;
pub mod topology;
pub mod watchers;

pub use error::{PluginError, Result};
pub use plugin_config::PluginConfig;
