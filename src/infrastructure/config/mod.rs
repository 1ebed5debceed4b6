mod settings;

pub use settings::{
    AuthConfig, ConnectionConfig, LoggingConfig, NotificationConfig, ReconnectConfig,
    ServerConfig, Settings,
};
