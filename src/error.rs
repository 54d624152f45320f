//! Defines the custom error type for the `log-seal` crate.
//!
//! 定义 `log-seal` 的统一错误类型。编解码层的失败被收敛为一个封闭的错误种类集合
//! ([`ErrorKind`])，调用方据此决定是重新认证还是普通重试。

use crate::asymmetric::systems::rsa::RsaSystemError;
use crate::symmetric::systems::aes_cbc::AesCbcSystemError;
use thiserror::Error;

/// Closed classification of every failure the crate can report.
///
/// 错误种类。HTTP 层（不在本库范围内）依据它映射状态码。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// 信封结构非法：长度不足或版本字节不受支持。
    MalformedEnvelope,
    /// RSA 解封对称密钥失败（私钥错误或密文损坏）。
    KeyExchangeFailure,
    /// AES 解密或 PKCS7 去填充失败。
    PayloadDecryptFailure,
    /// 未配置密钥对，或未提供所需的公钥/私钥。
    KeyUnavailable,
    /// 解密后的字节不是合法的 UTF-8，或载荷无法序列化。
    SerializationFailure,
    /// 静态密钥（Variant C）被请求，但未显式开启低安全模式。
    LowSecurityModeDisabled,
    /// 密钥材料无法解析。
    InvalidKey,
    /// 调用方提供的输入不合法。
    InvalidInput,
    /// 配置错误。
    Configuration,
    /// 加密侧的密码学错误（随机数源、RSA 加密等）。
    Cryptography,
    /// 日志存储协作方返回的错误。
    Storage,
    /// 客户端传输层错误。
    Transport,
    /// I/O 错误。
    Io,
}

/// The main error type for the `log-seal` crate.
#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("unsupported protocol version {found}, expected {expected}")]
    UnsupportedVersion { found: u8, expected: u8 },

    #[error("key exchange failed: {0}")]
    KeyExchange(#[source] RsaSystemError),

    #[error("payload decryption failed: {0}")]
    PayloadDecrypt(#[source] AesCbcSystemError),

    #[error("key unavailable: {0}")]
    KeyUnavailable(String),

    #[error("decrypted payload is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("low-security mode is disabled, refusing to use the static-key envelope")]
    LowSecurityModeDisabled,

    #[error("RSA error: {0}")]
    Rsa(#[from] RsaSystemError),

    #[error("AES-CBC error: {0}")]
    Cipher(#[from] AesCbcSystemError),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("log store error: {0}")]
    Storage(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("decoding from Base64 failed: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("I/O error")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Maps the error onto the closed [`ErrorKind`] taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::MalformedEnvelope(_) | Error::UnsupportedVersion { .. } => {
                ErrorKind::MalformedEnvelope
            }
            Error::KeyExchange(_) => ErrorKind::KeyExchangeFailure,
            Error::PayloadDecrypt(_) => ErrorKind::PayloadDecryptFailure,
            Error::KeyUnavailable(_) => ErrorKind::KeyUnavailable,
            Error::Utf8(_) | Error::Json(_) => ErrorKind::SerializationFailure,
            Error::LowSecurityModeDisabled => ErrorKind::LowSecurityModeDisabled,
            Error::Rsa(RsaSystemError::InvalidKey(_)) | Error::InvalidKey(_) => {
                ErrorKind::InvalidKey
            }
            Error::Rsa(_) | Error::Cipher(_) => ErrorKind::Cryptography,
            Error::InvalidInput(_) | Error::Base64(_) => ErrorKind::InvalidInput,
            Error::Configuration(_) => ErrorKind::Configuration,
            Error::Storage(_) => ErrorKind::Storage,
            Error::Transport(_) => ErrorKind::Transport,
            Error::Io(_) => ErrorKind::Io,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
