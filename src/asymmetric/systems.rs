//! 非对称算法系统集合
//!
//! 目前只包含 RSA：OAEP-SHA256 与遗留的无填充封装。
pub mod rsa;

pub use self::rsa::{RsaKeyPair, RsaOaepSha256, RsaRawLegacy, RsaSystemError};
