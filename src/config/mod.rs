//! Configuration loading

pub mod settings;

pub use settings::{
    AuditConfig, GenerationConfig, LedgerConfig, LoggingConfig, ProviderConfig, RetentionConfig,
    Settings, StorageConfig, StylePresetConfig, WorkerPoolConfig,
};
