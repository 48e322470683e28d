// 远端存储协议模块

pub mod client;
pub mod namespace;
pub mod types;

pub use client::{HttpRemoteStore, ProgressCallback, RemoteStore};
pub use namespace::{KeyNamespace, PrefixNamespace};
pub use types::{normalize_etag, CompletedPart, ObjectMetadata};
