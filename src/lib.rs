//! # log-seal: 自托管日志服务的混合加密传输层
//!
//! 客户端把任意 JSON 日志推送到 HTTP 接口，请求体与响应体都是不透明的二进制信封：
//! 每条消息随机生成一个 AES 密钥，用 AES-CBC (PKCS7) 加密载荷，再用接收方的 RSA 公钥
//! 封装这个 AES 密钥。
//!
//! ## Core Concepts
//!
//! - **`HybridTransportCodec`**: 组合密钥交换与对称加密，负责信封的编解码。
//! - **`EnvelopeVariant`**: 三种帧格式（Fixed / Versioned / StaticKey），由配置显式选择。
//! - **`KeyStore`**: 服务端长期 RSA 密钥对的来源（文件、环境变量、内存）。
//! - **`ClientKeyRegistry`**: 会话标识到客户端公钥的登记表。
//! - **`TransportServer`** / **`TransportClient`**: 与 Web 框架无关的两端处理逻辑。
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use log_seal::{HybridTransportCodec, Payload, RsaKeyPair, TransportConfig};
//! use serde_json::json;
//!
//! fn main() -> log_seal::Result<()> {
//!     let keys = RsaKeyPair::generate(2048)?;
//!     let codec = HybridTransportCodec::from_config(&TransportConfig::default())?;
//!
//!     let record = Payload::Json(json!({"level": "info", "message": "login ok", "user_id": 42}));
//!     let envelope = codec.encode(&record, Some(keys.public_key()))?;
//!     let decoded = codec.decode(&envelope, Some(keys.private_key()))?;
//!
//!     assert_eq!(decoded, record);
//!     Ok(())
//! }
//! ```
//!
//! 无填充 RSA（`KeyExchangeScheme::RsaRawLegacy`）与静态密钥信封只为兼容旧客户端保留，
//! 新的接入应使用默认的 Versioned + OAEP-SHA256。

pub mod asymmetric;
pub mod client;
pub mod codec;
pub mod common;
pub mod envelope;
pub mod error;
pub mod keystore;
pub mod registry;
pub mod server;
pub mod symmetric;

pub use asymmetric::KeyExchangeScheme;
pub use asymmetric::systems::rsa::{RsaKeyPair, RsaSystemError};
pub use client::{TransportClient, TransportResponse};
#[cfg(feature = "async")]
pub use client::LogTransport;
pub use codec::HybridTransportCodec;
pub use common::config::{
    ConfigEvent, ConfigFile, ConfigManager, ConfigSource, KeySource, KeyStoreConfig,
    StaticSecret, TransportConfig,
};
pub use envelope::{Envelope, EnvelopeVariant, Payload};
pub use error::{Error, ErrorKind, Result};
pub use keystore::{
    CachedKeyStore, EnvKeyStore, FileKeyStore, KeyStore, MemoryKeyStore, normalize_pem,
    open_key_store,
};
pub use registry::{ClientKeyRegistry, InMemoryClientKeyRegistry};
pub use server::{
    EncodeTarget, EncodedResponse, InMemoryLogStore, LogQuery, LogRecord, LogStore,
    Registration, TransportServer,
};
pub use symmetric::systems::aes_cbc::{AesCbcKey, AesCbcSystemError};

/// The version of the `log-seal` crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
