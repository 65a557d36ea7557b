//! Shared data model and error types.

pub mod error;
pub mod models;

pub use error::ApiError;
pub use models::{
    CacheMetadata, CommandCacheInfo, CredentialSource, DeviceConfig, ExecutionRequest,
    SshCredentials,
};
