//! # Symmetric Cryptographic Systems Module
//!
//! 对称加密系统集合。载荷统一使用 AES-CBC + PKCS7，密钥长度决定 AES 变体。
pub mod aes_cbc;

pub use self::aes_cbc::{AesCbcKey, AesCbcSystem, AesCbcSystemError};
