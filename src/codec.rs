//! 混合传输编解码器：RSA 封装一次性 AES 密钥，AES-CBC 加密载荷。
//!
//! 同一个 [`HybridTransportCodec`] 只对应一种信封格式。客户端与服务端必须使用相同的
//! 格式，混用会导致解码失败。

use crate::asymmetric::KeyExchangeScheme;
use crate::common::config::TransportConfig;
use crate::envelope::{Envelope, EnvelopeVariant, Payload};
use crate::error::{Error, Result};
use crate::symmetric::systems::aes_cbc::{AesCbcKey, AesCbcSystem, AesVariant};
use crate::symmetric::traits::SymmetricCryptographicSystem;
use base64::{Engine as _, engine::general_purpose};
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use tracing::debug;

/// 混合加密信封编解码器
#[derive(Debug, Clone)]
pub struct HybridTransportCodec {
    variant: EnvelopeVariant,
    key_exchange: KeyExchangeScheme,
    aes_key_bytes: usize,
    protocol_version: u8,
    static_key: Option<AesCbcKey>,
}

impl HybridTransportCodec {
    /// 以指定格式创建编解码器。
    ///
    /// StaticKey 格式要求配置中显式开启 `low_security_mode`，否则返回
    /// [`Error::LowSecurityModeDisabled`]。
    pub fn new(variant: EnvelopeVariant, config: &TransportConfig) -> Result<Self> {
        if config.aes_key_bytes == 0 || config.aes_key_bytes > 32 {
            return Err(Error::Configuration(format!(
                "aes_key_bytes must be in 1..=32, got {}",
                config.aes_key_bytes
            )));
        }

        let static_key = if variant == EnvelopeVariant::StaticKey {
            if !config.low_security_mode {
                return Err(Error::LowSecurityModeDisabled);
            }
            let secret = config.static_secret.as_ref().ok_or_else(|| {
                Error::Configuration("low_security_mode requires a static_secret".to_string())
            })?;
            Some(AesCbcKey::derive_from_secret(
                secret.expose(),
                config.aes_key_bytes,
            )?)
        } else {
            None
        };

        Ok(Self {
            variant,
            key_exchange: config.key_exchange,
            aes_key_bytes: config.aes_key_bytes,
            protocol_version: config.protocol_version,
            static_key,
        })
    }

    /// 使用配置中的 `envelope_variant` 创建编解码器，先校验配置。
    pub fn from_config(config: &TransportConfig) -> Result<Self> {
        config.validate()?;
        Self::new(config.envelope_variant, config)
    }

    /// 低安全模式开启时返回 StaticKey 编解码器，否则返回 `None`。
    pub fn static_fallback(config: &TransportConfig) -> Result<Option<Self>> {
        if !config.low_security_mode {
            return Ok(None);
        }
        Self::new(EnvelopeVariant::StaticKey, config).map(Some)
    }

    pub fn variant(&self) -> EnvelopeVariant {
        self.variant
    }

    pub fn key_exchange(&self) -> KeyExchangeScheme {
        self.key_exchange
    }

    pub fn protocol_version(&self) -> u8 {
        self.protocol_version
    }

    /// 实际使用的 AES 密钥长度（已规整为 16/24/32）
    pub fn symmetric_key_len(&self) -> usize {
        AesVariant::for_key_len(self.aes_key_bytes).key_len()
    }

    /// 加密载荷。
    ///
    /// # 参数
    ///
    /// * `payload` - 待加密载荷；字符串原样传输
    /// * `recipient` - 接收方公钥，Fixed/Versioned 格式必须提供，StaticKey 格式忽略
    pub fn encode(&self, payload: &Payload, recipient: Option<&RsaPublicKey>) -> Result<Vec<u8>> {
        let plaintext = payload.to_bytes()?;
        let key = match &self.static_key {
            Some(key) => key.clone(),
            None => AesCbcSystem::generate_key(self.aes_key_bytes)?,
        };
        self.seal_with_key(&plaintext, &key, recipient)
    }

    /// 用给定的 AES 密钥加密明文并组帧。
    pub(crate) fn seal_with_key(
        &self,
        plaintext: &[u8],
        key: &AesCbcKey,
        recipient: Option<&RsaPublicKey>,
    ) -> Result<Vec<u8>> {
        let iv = AesCbcSystem::generate_iv()?;
        let ciphertext = AesCbcSystem::encrypt(key, &iv, plaintext)?;

        let wrapped = if self.variant.wraps_key() {
            let public_key = recipient.ok_or_else(|| {
                Error::KeyUnavailable(format!(
                    "{} envelope requires the recipient's public key",
                    self.variant
                ))
            })?;
            Some(self.key_exchange.wrap(public_key, key.as_bytes())?)
        } else {
            None
        };

        let envelope = Envelope {
            wrapped_key: wrapped.as_deref(),
            iv: &iv,
            ciphertext: &ciphertext,
        };
        let bytes = envelope.to_vec(self.variant, self.protocol_version)?;
        debug!(
            variant = %self.variant,
            scheme = self.key_exchange.name(),
            plaintext_len = plaintext.len(),
            envelope_len = bytes.len(),
            "encoded envelope"
        );
        Ok(bytes)
    }

    /// 解密信封。
    ///
    /// Fixed/Versioned 格式需要私钥；结构错误、密钥解封失败和载荷解密失败分别报告为
    /// 不同的错误种类。
    pub fn decode(&self, bytes: &[u8], private_key: Option<&RsaPrivateKey>) -> Result<Payload> {
        let plaintext = match self.variant {
            EnvelopeVariant::StaticKey => {
                let envelope = Envelope::parse_static(bytes)?;
                let key = self.static_key.as_ref().ok_or(Error::LowSecurityModeDisabled)?;
                Self::open(key, &envelope)?
            }
            EnvelopeVariant::Fixed => {
                let private_key = Self::require_private_key(private_key, self.variant)?;
                let envelope = Envelope::parse_fixed(bytes, private_key.size())?;
                self.unwrap_and_open(private_key, &envelope)?
            }
            EnvelopeVariant::Versioned => {
                let envelope = Envelope::parse_versioned(bytes, self.protocol_version)?;
                let private_key = Self::require_private_key(private_key, self.variant)?;
                self.unwrap_and_open(private_key, &envelope)?
            }
        };
        debug!(variant = %self.variant, envelope_len = bytes.len(), "decoded envelope");
        Payload::from_bytes(plaintext)
    }

    fn require_private_key(
        private_key: Option<&RsaPrivateKey>,
        variant: EnvelopeVariant,
    ) -> Result<&RsaPrivateKey> {
        private_key.ok_or_else(|| {
            Error::KeyUnavailable(format!("{variant} envelope requires a private key"))
        })
    }

    fn unwrap_and_open(&self, private_key: &RsaPrivateKey, envelope: &Envelope<'_>) -> Result<Vec<u8>> {
        let wrapped = envelope
            .wrapped_key
            .ok_or_else(|| Error::MalformedEnvelope("missing wrapped key".to_string()))?;
        let raw_key = self
            .key_exchange
            .unwrap(private_key, wrapped, self.symmetric_key_len())
            .map_err(Error::KeyExchange)?;
        let key = AesCbcKey::new(&raw_key).map_err(Error::PayloadDecrypt)?;
        Self::open(&key, envelope)
    }

    fn open(key: &AesCbcKey, envelope: &Envelope<'_>) -> Result<Vec<u8>> {
        AesCbcSystem::decrypt(key, envelope.iv, envelope.ciphertext).map_err(Error::PayloadDecrypt)
    }

    /// 旧版纯文本通道：加密后整体做标准 Base64 编码
    pub fn encode_to_base64(
        &self,
        payload: &Payload,
        recipient: Option<&RsaPublicKey>,
    ) -> Result<String> {
        let bytes = self.encode(payload, recipient)?;
        Ok(general_purpose::STANDARD.encode(bytes))
    }

    /// 旧版纯文本通道：先 Base64 解码，再走同一解码流程
    pub fn decode_from_base64(
        &self,
        encoded: &str,
        private_key: Option<&RsaPrivateKey>,
    ) -> Result<Payload> {
        let bytes = general_purpose::STANDARD.decode(encoded.trim())?;
        self.decode(&bytes, private_key)
    }

    /// 并行解码一批信封，结果顺序与输入一致；单个失败不影响其余信封。
    #[cfg(feature = "parallel")]
    pub fn par_decode_batch<B>(
        &self,
        envelopes: &[B],
        private_key: Option<&RsaPrivateKey>,
    ) -> Vec<Result<Payload>>
    where
        B: AsRef<[u8]> + Sync,
    {
        envelopes
            .par_iter()
            .map(|envelope| self.decode(envelope.as_ref(), private_key))
            .collect()
    }
}
