pub mod auth;
pub mod config;
pub mod logging;
pub mod models;
pub mod paths;
pub mod provider;
pub mod provider_contract;
pub mod redact;
pub mod secrets;
pub mod storage;

pub use auth::{LoginPoll, LoginState, LoginTicket, SessionEvent, SessionStatus};
pub use config::{
    CacheConfig, Config, ConfigError, LogLevel, LoggingConfig, LoginConfig, ProviderConfig,
    RetryConfig, SessionConfig, ValidationError,
};
pub use logging::{init_logging, LoggingError, LoggingGuard};
pub use models::*;
pub use paths::{AppDirs, DirsError};
pub use provider::{
    BrowseKind, CollectionItem, Provider, ProviderCapabilities, ProviderError, ProviderResult,
};
pub use redact::redact_secrets;
pub use secrets::{KeyringStorage, SecretsError};
pub use storage::{FileStorage, MemoryStorage, SessionStorage, StorageError, StorageResult};

pub const APP_NAME: &str = "ncloud";
pub const APP_AUTHOR: &str = "NCloud";
pub const APP_QUALIFIER: &str = "io";
