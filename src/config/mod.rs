mod settings;

pub use settings::{
    ApiConfig, ChatConfig, LoggingConfig, Settings, StorageBackend, StorageConfig, TitleConfig,
};
