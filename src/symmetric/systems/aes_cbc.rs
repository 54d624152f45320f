//! AES-CBC (PKCS7) 对称加密实现
//!
//! 这是一个只加密、不认证的构造：没有 MAC，篡改只能通过 PKCS7 去填充失败被概率性地发现。
//! 线上格式必须保持为纯 CBC，以便与旧客户端互通。
use crate::common::utils::{ZeroizingVec, fill_random};
use crate::symmetric::traits::SymmetricCryptographicSystem;
use aes::{Aes128, Aes192, Aes256};
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub const IV_SIZE: usize = 16;
pub const BLOCK_SIZE: usize = 16;

/// AES-CBC 系统的独立错误类型
#[derive(Error, Debug)]
pub enum AesCbcSystemError {
    #[error("random generation failed: {0}")]
    Random(#[from] rand_core::OsError),

    #[error("invalid key size: {0}")]
    InvalidKeySize(usize),

    #[error("invalid IV size: expected 16, got {0}")]
    InvalidIvSize(usize),

    #[error("ciphertext length {0} is not a positive multiple of the block size")]
    InvalidCiphertextLength(usize),

    #[error("PKCS7 padding check failed")]
    Unpad,
}

/// AES 变体，由密钥长度决定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AesVariant {
    Aes128,
    Aes192,
    Aes256,
}

impl AesVariant {
    /// ≤16 字节 → AES-128，≤24 → AES-192，其余 → AES-256
    pub fn for_key_len(len: usize) -> Self {
        match len {
            0..=16 => AesVariant::Aes128,
            17..=24 => AesVariant::Aes192,
            _ => AesVariant::Aes256,
        }
    }

    pub fn key_len(&self) -> usize {
        match self {
            AesVariant::Aes128 => 16,
            AesVariant::Aes192 => 24,
            AesVariant::Aes256 => 32,
        }
    }
}

/// 规整后的 AES 密钥：长度恰为 16/24/32 字节，离开作用域时自动擦除
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AesCbcKey(ZeroizingVec);

impl AesCbcKey {
    /// 按长度选择 AES 变体，并把密钥零填充或截断到该变体的长度。
    pub fn new(bytes: &[u8]) -> Result<Self, AesCbcSystemError> {
        if bytes.is_empty() {
            return Err(AesCbcSystemError::InvalidKeySize(0));
        }
        let target = AesVariant::for_key_len(bytes.len()).key_len();
        let mut key = vec![0u8; target];
        let take = bytes.len().min(target);
        key[..take].copy_from_slice(&bytes[..take]);
        Ok(Self(ZeroizingVec(key)))
    }

    /// 从预共享的静态口令派生密钥：SHA-256 摘要截断到 `key_len` 对应的变体长度。
    pub fn derive_from_secret(secret: &str, key_len: usize) -> Result<Self, AesCbcSystemError> {
        if key_len == 0 {
            return Err(AesCbcSystemError::InvalidKeySize(0));
        }
        let digest = Sha256::digest(secret.as_bytes());
        let target = AesVariant::for_key_len(key_len).key_len();
        Self::new(&digest[..target])
    }

    pub fn variant(&self) -> AesVariant {
        AesVariant::for_key_len(self.0.len())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// AES-CBC 对称加密系统
#[derive(Debug)]
pub struct AesCbcSystem;

macro_rules! cbc_encrypt {
    ($cipher:ty, $key:expr, $iv:expr, $plaintext:expr) => {
        cbc::Encryptor::<$cipher>::new_from_slices($key, $iv)
            .map_err(|_| AesCbcSystemError::InvalidKeySize($key.len()))?
            .encrypt_padded_vec_mut::<Pkcs7>($plaintext)
    };
}

macro_rules! cbc_decrypt {
    ($cipher:ty, $key:expr, $iv:expr, $ciphertext:expr) => {
        cbc::Decryptor::<$cipher>::new_from_slices($key, $iv)
            .map_err(|_| AesCbcSystemError::InvalidKeySize($key.len()))?
            .decrypt_padded_vec_mut::<Pkcs7>($ciphertext)
            .map_err(|_| AesCbcSystemError::Unpad)?
    };
}

impl SymmetricCryptographicSystem for AesCbcSystem {
    const IV_SIZE: usize = IV_SIZE;
    type Key = AesCbcKey;
    type Error = AesCbcSystemError;

    fn generate_key(key_len: usize) -> Result<Self::Key, Self::Error> {
        if key_len == 0 {
            return Err(AesCbcSystemError::InvalidKeySize(0));
        }
        let mut key_bytes = ZeroizingVec(vec![0u8; AesVariant::for_key_len(key_len).key_len()]);
        fill_random(&mut key_bytes.0)?;
        AesCbcKey::new(&key_bytes)
    }

    fn generate_iv() -> Result<Vec<u8>, Self::Error> {
        let mut iv = vec![0u8; IV_SIZE];
        fill_random(&mut iv)?;
        Ok(iv)
    }

    fn encrypt(key: &Self::Key, iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, Self::Error> {
        if iv.len() != IV_SIZE {
            return Err(AesCbcSystemError::InvalidIvSize(iv.len()));
        }
        let key = key.as_bytes();
        let ciphertext = match AesVariant::for_key_len(key.len()) {
            AesVariant::Aes128 => cbc_encrypt!(Aes128, key, iv, plaintext),
            AesVariant::Aes192 => cbc_encrypt!(Aes192, key, iv, plaintext),
            AesVariant::Aes256 => cbc_encrypt!(Aes256, key, iv, plaintext),
        };
        Ok(ciphertext)
    }

    fn decrypt(key: &Self::Key, iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, Self::Error> {
        if iv.len() != IV_SIZE {
            return Err(AesCbcSystemError::InvalidIvSize(iv.len()));
        }
        if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
            return Err(AesCbcSystemError::InvalidCiphertextLength(ciphertext.len()));
        }
        let key = key.as_bytes();
        let plaintext = match AesVariant::for_key_len(key.len()) {
            AesVariant::Aes128 => cbc_decrypt!(Aes128, key, iv, ciphertext),
            AesVariant::Aes192 => cbc_decrypt!(Aes192, key, iv, ciphertext),
            AesVariant::Aes256 => cbc_decrypt!(Aes256, key, iv, ciphertext),
        };
        Ok(plaintext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_iv() -> Vec<u8> {
        (0..IV_SIZE as u8).collect()
    }

    #[test]
    fn test_key_length_selects_variant() {
        assert_eq!(AesCbcKey::new(&[1u8; 5]).unwrap().variant(), AesVariant::Aes128);
        assert_eq!(AesCbcKey::new(&[1u8; 16]).unwrap().as_bytes().len(), 16);
        assert_eq!(AesCbcKey::new(&[1u8; 20]).unwrap().variant(), AesVariant::Aes192);
        assert_eq!(AesCbcKey::new(&[1u8; 40]).unwrap().as_bytes().len(), 32);
        assert!(AesCbcKey::new(&[]).is_err());
    }

    #[test]
    fn test_short_key_is_zero_padded() {
        let key = AesCbcKey::new(&[0xAB; 10]).unwrap();
        assert_eq!(&key.as_bytes()[..10], &[0xAB; 10]);
        assert_eq!(&key.as_bytes()[10..], &[0u8; 6]);
    }

    #[test]
    fn test_encrypt_decrypt_all_variants() {
        for len in [16, 24, 32] {
            let key = AesCbcSystem::generate_key(len).unwrap();
            assert_eq!(key.as_bytes().len(), len);
            let iv = AesCbcSystem::generate_iv().unwrap();
            let plaintext = b"{\"level\":\"info\",\"message\":\"hello\"}";

            let ciphertext = AesCbcSystem::encrypt(&key, &iv, plaintext).unwrap();
            assert_eq!(ciphertext.len() % BLOCK_SIZE, 0);
            let decrypted = AesCbcSystem::decrypt(&key, &iv, &ciphertext).unwrap();

            assert_eq!(plaintext.as_slice(), decrypted.as_slice());
        }
    }

    #[test]
    fn test_pkcs7_adds_full_block_for_aligned_input() {
        let key = AesCbcKey::new(&[2u8; 32]).unwrap();
        let ciphertext = AesCbcSystem::encrypt(&key, &fixed_iv(), &[0u8; 32]).unwrap();
        assert_eq!(ciphertext.len(), 48);
    }

    #[test]
    fn test_empty_plaintext_roundtrip() {
        let key = AesCbcSystem::generate_key(32).unwrap();
        let iv = fixed_iv();
        let ciphertext = AesCbcSystem::encrypt(&key, &iv, b"").unwrap();
        assert_eq!(ciphertext.len(), BLOCK_SIZE);
        assert!(AesCbcSystem::decrypt(&key, &iv, &ciphertext).unwrap().is_empty());
    }

    #[test]
    fn test_tampered_padding_fails() {
        let key = AesCbcSystem::generate_key(32).unwrap();
        let mut iv = fixed_iv();
        let ciphertext = AesCbcSystem::encrypt(&key, &iv, b"short").unwrap();

        // 单块密文：翻转 IV 最后一个字节会直接翻转填充字节
        iv[IV_SIZE - 1] ^= 0xff;
        let result = AesCbcSystem::decrypt(&key, &iv, &ciphertext);
        assert!(matches!(result, Err(AesCbcSystemError::Unpad)));
    }

    #[test]
    fn test_invalid_lengths_rejected() {
        let key = AesCbcSystem::generate_key(16).unwrap();
        assert!(matches!(
            AesCbcSystem::encrypt(&key, &[0u8; 8], b"x"),
            Err(AesCbcSystemError::InvalidIvSize(8))
        ));
        assert!(matches!(
            AesCbcSystem::decrypt(&key, &fixed_iv(), &[0u8; 15]),
            Err(AesCbcSystemError::InvalidCiphertextLength(15))
        ));
        assert!(matches!(
            AesCbcSystem::decrypt(&key, &fixed_iv(), &[]),
            Err(AesCbcSystemError::InvalidCiphertextLength(0))
        ));
    }

    #[test]
    fn test_derive_from_secret_is_deterministic() {
        let a = AesCbcKey::derive_from_secret("shared secret", 32).unwrap();
        let b = AesCbcKey::derive_from_secret("shared secret", 32).unwrap();
        let c = AesCbcKey::derive_from_secret("other secret", 32).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(
            AesCbcKey::derive_from_secret("shared secret", 16).unwrap().as_bytes(),
            &a.as_bytes()[..16]
        );
    }

    #[test]
    fn test_ciphertext_uniqueness_with_fresh_iv() {
        let key = AesCbcSystem::generate_key(32).unwrap();
        let plaintext = b"this is the same message";
        let c1 = AesCbcSystem::encrypt(&key, &AesCbcSystem::generate_iv().unwrap(), plaintext).unwrap();
        let c2 = AesCbcSystem::encrypt(&key, &AesCbcSystem::generate_iv().unwrap(), plaintext).unwrap();
        assert_ne!(c1, c2);
    }
}
