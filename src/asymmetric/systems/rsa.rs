//! RSA 密钥对管理以及两种密钥封装方案：
//!
//! - [`RsaOaepSha256`]：OAEP-SHA256 填充，推荐使用。
//! - [`RsaRawLegacy`]：无填充的教科书式 RSA，仅为兼容旧客户端保留。该构造可延展、
//!   不具备语义安全性，任何新的接入都不应选择它。

use crate::asymmetric::traits::KeyExchange;
use crate::common::utils::{ZeroizingVec, left_pad};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::rand_core::OsRng as RsaOsRng;
use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use rsa::{BigUint, Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use thiserror::Error;
use tracing::{info, warn};

/// SHA-256 摘要长度
const SHA256_LEN: usize = 32;

/// RSA 系统的独立错误类型
#[derive(Error, Debug)]
pub enum RsaSystemError {
    #[error("RSA key generation failed: {0}")]
    KeyGeneration(String),

    #[error("invalid RSA key: {0}")]
    InvalidKey(String),

    #[error("RSA key export failed: {0}")]
    Export(String),

    #[error("RSA encryption failed: {0}")]
    Encryption(String),

    #[error("RSA decryption failed: {0}")]
    Decryption(String),

    #[error("unwrapped key has length {actual}, expected {expected}")]
    KeyLength { expected: usize, actual: usize },

    #[error("value does not fit below the RSA modulus")]
    OutOfRange,
}

/// 从 PEM 导入公钥，接受 SPKI (`PUBLIC KEY`) 与 PKCS#1 (`RSA PUBLIC KEY`)。
pub fn import_public_key(pem: &str) -> Result<RsaPublicKey, RsaSystemError> {
    RsaPublicKey::from_public_key_pem(pem.trim())
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem.trim()))
        .map_err(|e| RsaSystemError::InvalidKey(format!("导入RSA公钥失败: {e}")))
}

/// 从 PEM 导入私钥，接受 PKCS#8 (`PRIVATE KEY`) 与 PKCS#1 (`RSA PRIVATE KEY`)。
pub fn import_private_key(pem: &str) -> Result<RsaPrivateKey, RsaSystemError> {
    RsaPrivateKey::from_pkcs8_pem(pem.trim())
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem.trim()))
        .map_err(|e| RsaSystemError::InvalidKey(format!("导入RSA私钥失败: {e}")))
}

/// 将公钥导出为 SPKI PEM
pub fn export_public_key(public_key: &RsaPublicKey) -> Result<String, RsaSystemError> {
    public_key
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| RsaSystemError::Export(format!("RSA公钥导出失败: {e}")))
}

/// 将私钥导出为 PKCS#8 PEM
pub fn export_private_key(private_key: &RsaPrivateKey) -> Result<String, RsaSystemError> {
    private_key
        .to_pkcs8_pem(LineEnding::LF)
        .map(|pem| pem.to_string())
        .map_err(|e| RsaSystemError::Export(format!("RSA私钥导出失败: {e}")))
}

/// 长期使用的 RSA 密钥对
#[derive(Clone, Debug)]
pub struct RsaKeyPair {
    public: RsaPublicKey,
    private: RsaPrivateKey,
}

impl RsaKeyPair {
    /// 生成新的密钥对
    pub fn generate(bits: usize) -> Result<Self, RsaSystemError> {
        let mut rng = RsaOsRng;
        let private = RsaPrivateKey::new(&mut rng, bits)
            .map_err(|e| RsaSystemError::KeyGeneration(format!("生成RSA密钥失败: {e}")))?;
        let public = RsaPublicKey::from(&private);
        info!(bits, "generated RSA key pair");
        Ok(Self { public, private })
    }

    /// 从一对 PEM 文本恢复密钥对，并校验两者匹配
    pub fn from_pem(public_pem: &str, private_pem: &str) -> Result<Self, RsaSystemError> {
        let public = import_public_key(public_pem)?;
        let private = import_private_key(private_pem)?;
        if RsaPublicKey::from(&private) != public {
            return Err(RsaSystemError::InvalidKey(
                "public key does not match private key".to_string(),
            ));
        }
        Ok(Self { public, private })
    }

    /// 仅从私钥恢复密钥对
    pub fn from_private_pem(private_pem: &str) -> Result<Self, RsaSystemError> {
        let private = import_private_key(private_pem)?;
        let public = RsaPublicKey::from(&private);
        Ok(Self { public, private })
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public
    }

    pub fn private_key(&self) -> &RsaPrivateKey {
        &self.private
    }

    pub fn public_key_pem(&self) -> Result<String, RsaSystemError> {
        export_public_key(&self.public)
    }

    pub fn private_key_pem(&self) -> Result<String, RsaSystemError> {
        export_private_key(&self.private)
    }

    /// 模数的字节长度（RSA-2048 为 256）
    pub fn modulus_bytes(&self) -> usize {
        self.public.size()
    }
}

/// RSA-OAEP (SHA-256) 密钥封装
pub struct RsaOaepSha256;

impl KeyExchange for RsaOaepSha256 {
    const NAME: &'static str = "rsa-oaep-sha256";
    type PublicKey = RsaPublicKey;
    type PrivateKey = RsaPrivateKey;
    type Error = RsaSystemError;

    fn wrap(public_key: &RsaPublicKey, key: &[u8]) -> Result<Vec<u8>, RsaSystemError> {
        if key.len() > Self::max_key_len(public_key) {
            return Err(RsaSystemError::OutOfRange);
        }
        let mut rng = RsaOsRng;
        public_key
            .encrypt(&mut rng, Oaep::new::<Sha256>(), key)
            .map_err(|e| RsaSystemError::Encryption(format!("RSA加密失败: {e}")))
    }

    fn unwrap(
        private_key: &RsaPrivateKey,
        wrapped: &[u8],
        key_len: usize,
    ) -> Result<ZeroizingVec, RsaSystemError> {
        let key = private_key
            .decrypt(Oaep::new::<Sha256>(), wrapped)
            .map(ZeroizingVec)
            .map_err(|e| RsaSystemError::Decryption(format!("RSA解密失败: {e}")))?;
        if key.len() != key_len {
            return Err(RsaSystemError::KeyLength {
                expected: key_len,
                actual: key.len(),
            });
        }
        Ok(key)
    }

    fn max_key_len(public_key: &RsaPublicKey) -> usize {
        public_key.size().saturating_sub(2 * SHA256_LEN + 2)
    }
}

/// 无填充 RSA 密钥封装（遗留方案，已弃用）。
///
/// 封装：把对称密钥当作大端整数 `m`，计算 `m^e mod n`，输出左侧补零至模数长度。
/// 解封：计算 `c^d mod n`，再把结果规整为恰好 `key_len` 字节。大整数运算会丢掉前导零字节，
/// 因此结果短于 `key_len` 时需要在左侧补零。
pub struct RsaRawLegacy;

impl KeyExchange for RsaRawLegacy {
    const NAME: &'static str = "rsa-raw-legacy";
    type PublicKey = RsaPublicKey;
    type PrivateKey = RsaPrivateKey;
    type Error = RsaSystemError;

    fn wrap(public_key: &RsaPublicKey, key: &[u8]) -> Result<Vec<u8>, RsaSystemError> {
        let modulus_len = public_key.size();
        if key.len() > Self::max_key_len(public_key) {
            return Err(RsaSystemError::OutOfRange);
        }
        let m = BigUint::from_bytes_be(key);
        if &m >= public_key.n() {
            return Err(RsaSystemError::OutOfRange);
        }
        let c = m.modpow(public_key.e(), public_key.n());
        Ok(left_pad(&c.to_bytes_be(), modulus_len))
    }

    fn unwrap(
        private_key: &RsaPrivateKey,
        wrapped: &[u8],
        key_len: usize,
    ) -> Result<ZeroizingVec, RsaSystemError> {
        let c = BigUint::from_bytes_be(wrapped);
        if &c >= private_key.n() {
            return Err(RsaSystemError::Decryption(
                "ciphertext is not below the modulus".to_string(),
            ));
        }
        let m = c.modpow(private_key.d(), private_key.n());
        let raw = ZeroizingVec(m.to_bytes_be());
        let significant = raw.iter().position(|&b| b != 0).unwrap_or(raw.len());
        let trimmed = &raw[significant..];

        if trimmed.len() > key_len {
            return Err(RsaSystemError::Decryption(format!(
                "raw unwrap produced {} significant bytes, expected at most {}",
                trimmed.len(),
                key_len
            )));
        }
        if trimmed.len() < key_len {
            warn!(
                restored = key_len - trimmed.len(),
                key_len,
                "raw RSA unwrap lost leading zero bytes; left-padding the key"
            );
        }
        Ok(ZeroizingVec(left_pad(trimmed, key_len)))
    }

    fn max_key_len(public_key: &RsaPublicKey) -> usize {
        public_key.size().saturating_sub(1)
    }
}
