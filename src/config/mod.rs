pub mod schema;

pub use schema::{
    resolve_config_dir, Config, ConfigResolutionSource, ConnectionConfig, ExecuteConfig,
    ManagerConfig, SessionConfig, StreamsConfig,
};
