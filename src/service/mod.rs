pub use app_error::{AppError, AppResult};
pub use config::{
    DebugConfig, DetectorConfig, NetworkConfig, ServerConfig, DEFAULT_CONFIG_FILE, ENV_PREFIX,
};
pub use node::{bind, serve, DetectionNode};
pub use server::{ConnectionState, Server};
pub use shutdown::Shutdown;
pub use tracing_config::{setup_local_tracing, setup_tracing};

mod app_error;
mod config;
mod node;
mod server;
mod shutdown;
mod tracing_config;
