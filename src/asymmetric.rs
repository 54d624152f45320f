//! 非对称密钥交换核心模块

pub mod systems;
pub mod traits;

use crate::common::utils::ZeroizingVec;
use crate::error::Error;
use ::rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use systems::rsa::{RsaOaepSha256, RsaRawLegacy, RsaSystemError};
use tracing::warn;
use traits::KeyExchange;

/// 运行时可选择的密钥封装方案
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyExchangeScheme {
    /// RSA-OAEP (SHA-256)，新接入的唯一选择
    #[default]
    #[serde(alias = "oaep")]
    RsaOaepSha256,
    /// 无填充 RSA，已弃用，仅用于兼容旧客户端
    #[serde(alias = "raw")]
    RsaRawLegacy,
}

impl KeyExchangeScheme {
    pub fn name(&self) -> &'static str {
        match self {
            KeyExchangeScheme::RsaOaepSha256 => RsaOaepSha256::NAME,
            KeyExchangeScheme::RsaRawLegacy => RsaRawLegacy::NAME,
        }
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self, KeyExchangeScheme::RsaRawLegacy)
    }

    /// 用接收方公钥封装对称密钥
    pub fn wrap(&self, public_key: &RsaPublicKey, key: &[u8]) -> Result<Vec<u8>, RsaSystemError> {
        match self {
            KeyExchangeScheme::RsaOaepSha256 => RsaOaepSha256::wrap(public_key, key),
            KeyExchangeScheme::RsaRawLegacy => {
                warn!(scheme = RsaRawLegacy::NAME, "wrapping a key with the deprecated raw RSA scheme");
                RsaRawLegacy::wrap(public_key, key)
            }
        }
    }

    /// 用私钥解封对称密钥
    pub fn unwrap(
        &self,
        private_key: &RsaPrivateKey,
        wrapped: &[u8],
        key_len: usize,
    ) -> Result<ZeroizingVec, RsaSystemError> {
        match self {
            KeyExchangeScheme::RsaOaepSha256 => RsaOaepSha256::unwrap(private_key, wrapped, key_len),
            KeyExchangeScheme::RsaRawLegacy => RsaRawLegacy::unwrap(private_key, wrapped, key_len),
        }
    }
}

impl FromStr for KeyExchangeScheme {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "oaep" | "rsa-oaep-sha256" => Ok(KeyExchangeScheme::RsaOaepSha256),
            "raw" | "rsa-raw-legacy" => Ok(KeyExchangeScheme::RsaRawLegacy),
            other => Err(Error::Configuration(format!("unknown key exchange scheme: {other}"))),
        }
    }
}
