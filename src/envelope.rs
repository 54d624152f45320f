//! 信封（Envelope）的二进制帧格式以及载荷类型。
//!
//! 三种互不兼容的帧格式由配置显式选择，绝不从字节内容推断：
//!
//! ```text
//! Fixed     : [ wrapped key : k 字节 ][ IV : 16 ][ AES-CBC 密文 ]
//! Versioned : [ version : 1 ][ len : 4, BE ][ wrapped key : len ][ IV : 16 ][ 密文 ]
//! StaticKey : [ IV : 16 ][ 密文 ]
//! ```
//!
//! 这里只负责切分与拼接，不做任何密码学运算。

use crate::error::{Error, Result};
use crate::symmetric::systems::aes_cbc::IV_SIZE;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Versioned 帧中版本字节的长度
pub const VERSION_LEN: usize = 1;
/// Versioned 帧中密钥长度前缀的长度
pub const LENGTH_PREFIX_LEN: usize = 4;
/// Versioned 帧的固定头部长度
pub const VERSIONED_HEADER_LEN: usize = VERSION_LEN + LENGTH_PREFIX_LEN;

/// 信封格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnvelopeVariant {
    /// Variant A：定长封装密钥，无版本字节
    #[serde(alias = "a")]
    Fixed,
    /// Variant B：版本字节 + 长度前缀，新部署的首选
    #[serde(alias = "b")]
    Versioned,
    /// Variant C：预共享静态密钥，仅在低安全模式下可用
    #[serde(alias = "c")]
    StaticKey,
}

impl EnvelopeVariant {
    /// 该格式是否携带 RSA 封装的对称密钥
    pub fn wraps_key(&self) -> bool {
        !matches!(self, EnvelopeVariant::StaticKey)
    }

    pub fn name(&self) -> &'static str {
        match self {
            EnvelopeVariant::Fixed => "fixed",
            EnvelopeVariant::Versioned => "versioned",
            EnvelopeVariant::StaticKey => "static-key",
        }
    }
}

impl fmt::Display for EnvelopeVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EnvelopeVariant {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "a" | "fixed" => Ok(EnvelopeVariant::Fixed),
            "b" | "versioned" => Ok(EnvelopeVariant::Versioned),
            "c" | "static" | "static-key" | "static_key" => Ok(EnvelopeVariant::StaticKey),
            other => Err(Error::Configuration(format!("unknown envelope variant: {other}"))),
        }
    }
}

/// 切分后的信封视图，借用原始字节
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope<'a> {
    /// RSA 封装的对称密钥；StaticKey 格式下为 `None`
    pub wrapped_key: Option<&'a [u8]>,
    pub iv: &'a [u8],
    pub ciphertext: &'a [u8],
}

impl<'a> Envelope<'a> {
    /// 解析 Variant A。
    ///
    /// # 参数
    ///
    /// * `bytes` - 完整信封
    /// * `key_size` - RSA 模数的字节长度（RSA-2048 为 256）
    pub fn parse_fixed(bytes: &'a [u8], key_size: usize) -> Result<Self> {
        let min = key_size + IV_SIZE;
        if bytes.len() < min {
            return Err(Error::MalformedEnvelope(format!(
                "fixed envelope has {} bytes, need at least {min}",
                bytes.len()
            )));
        }
        let (wrapped_key, rest) = bytes.split_at(key_size);
        let (iv, ciphertext) = rest.split_at(IV_SIZE);
        Ok(Self {
            wrapped_key: Some(wrapped_key),
            iv,
            ciphertext,
        })
    }

    /// 解析 Variant B。版本字节在其余任何检查之前校验。
    pub fn parse_versioned(bytes: &'a [u8], expected_version: u8) -> Result<Self> {
        let Some(&version) = bytes.first() else {
            return Err(Error::MalformedEnvelope("empty envelope".to_string()));
        };
        if version != expected_version {
            return Err(Error::UnsupportedVersion {
                found: version,
                expected: expected_version,
            });
        }
        if bytes.len() < VERSIONED_HEADER_LEN {
            return Err(Error::MalformedEnvelope(format!(
                "versioned envelope has {} bytes, header needs {VERSIONED_HEADER_LEN}",
                bytes.len()
            )));
        }

        let mut prefix = [0u8; LENGTH_PREFIX_LEN];
        prefix.copy_from_slice(&bytes[VERSION_LEN..VERSIONED_HEADER_LEN]);
        let key_len = u32::from_be_bytes(prefix) as usize;
        if key_len == 0 {
            return Err(Error::MalformedEnvelope(
                "wrapped key length is zero".to_string(),
            ));
        }

        let min = VERSIONED_HEADER_LEN
            .checked_add(key_len)
            .and_then(|n| n.checked_add(IV_SIZE))
            .ok_or_else(|| Error::MalformedEnvelope("wrapped key length overflows".to_string()))?;
        if bytes.len() < min {
            return Err(Error::MalformedEnvelope(format!(
                "versioned envelope has {} bytes, need at least {min}",
                bytes.len()
            )));
        }

        let body = &bytes[VERSIONED_HEADER_LEN..];
        let (wrapped_key, rest) = body.split_at(key_len);
        let (iv, ciphertext) = rest.split_at(IV_SIZE);
        Ok(Self {
            wrapped_key: Some(wrapped_key),
            iv,
            ciphertext,
        })
    }

    /// 解析 Variant C
    pub fn parse_static(bytes: &'a [u8]) -> Result<Self> {
        if bytes.len() < IV_SIZE {
            return Err(Error::MalformedEnvelope(format!(
                "static-key envelope has {} bytes, need at least {IV_SIZE}",
                bytes.len()
            )));
        }
        let (iv, ciphertext) = bytes.split_at(IV_SIZE);
        Ok(Self {
            wrapped_key: None,
            iv,
            ciphertext,
        })
    }

    /// 按指定格式拼接为线上字节。`version` 只对 Versioned 有意义。
    pub fn to_vec(&self, variant: EnvelopeVariant, version: u8) -> Result<Vec<u8>> {
        if self.iv.len() != IV_SIZE {
            return Err(Error::InvalidInput(format!(
                "IV must be {IV_SIZE} bytes, got {}",
                self.iv.len()
            )));
        }

        let wrapped_key = match (variant.wraps_key(), self.wrapped_key) {
            (true, Some(key)) if !key.is_empty() => key,
            (true, _) => {
                return Err(Error::InvalidInput(format!(
                    "{variant} envelope requires a wrapped key"
                )));
            }
            (false, Some(_)) => {
                return Err(Error::InvalidInput(
                    "static-key envelope cannot carry a wrapped key".to_string(),
                ));
            }
            (false, None) => &[][..],
        };

        let mut out = Vec::with_capacity(
            VERSIONED_HEADER_LEN + wrapped_key.len() + IV_SIZE + self.ciphertext.len(),
        );
        if variant == EnvelopeVariant::Versioned {
            let len = u32::try_from(wrapped_key.len()).map_err(|_| {
                Error::InvalidInput("wrapped key does not fit a 32-bit length".to_string())
            })?;
            out.push(version);
            out.extend_from_slice(&len.to_be_bytes());
        }
        out.extend_from_slice(wrapped_key);
        out.extend_from_slice(self.iv);
        out.extend_from_slice(self.ciphertext);
        Ok(out)
    }
}

/// 传输的载荷：JSON 值或纯文本。
///
/// 字符串原样传输，不会被加上 JSON 引号；解码时能解析为 JSON 的文本得到 `Json`，
/// 其余得到 `Text`。因此 `Text(s)` 与 `Json(Value::String(s))` 被视为相等。
#[derive(Debug, Clone)]
pub enum Payload {
    Json(Value),
    Text(String),
}

impl Payload {
    /// 序列化为明文字节
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        match self {
            Payload::Text(text) | Payload::Json(Value::String(text)) => {
                Ok(text.as_bytes().to_vec())
            }
            Payload::Json(value) => Ok(serde_json::to_vec(value)?),
        }
    }

    /// 从解密后的明文恢复载荷。非 UTF-8 为错误，非 JSON 则退化为纯文本。
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let text = String::from_utf8(bytes)?;
        match serde_json::from_str::<Value>(&text) {
            Ok(value) => Ok(Payload::Json(value)),
            Err(_) => Ok(Payload::Text(text)),
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Payload::Json(value) => Some(value),
            Payload::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(text) | Payload::Json(Value::String(text)) => Some(text),
            Payload::Json(_) => None,
        }
    }

    pub fn into_string(self) -> String {
        match self {
            Payload::Text(text) | Payload::Json(Value::String(text)) => text,
            Payload::Json(value) => value.to_string(),
        }
    }
}

impl PartialEq for Payload {
    fn eq(&self, other: &Self) -> bool {
        match (self.as_text(), other.as_text()) {
            (Some(a), Some(b)) => a == b,
            (None, None) => self.as_json() == other.as_json(),
            _ => false,
        }
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::Json(value)
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}
