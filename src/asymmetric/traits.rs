//! 定义了非对称密钥交换的核心 Trait。
use crate::common::utils::ZeroizingVec;

/// `KeyExchange` 定义了用接收方公钥封装一个短对称密钥、再用对应私钥解封的能力。
///
/// 在 `log-seal` 中，非对称加密只用于密钥封装，从不直接加密载荷。
pub trait KeyExchange {
    /// 方案名称，用于日志
    const NAME: &'static str;

    /// 公钥类型
    type PublicKey;

    /// 私钥类型
    type PrivateKey;

    /// 错误类型
    type Error: std::error::Error + Send + Sync + 'static;

    /// 使用公钥封装对称密钥。
    fn wrap(public_key: &Self::PublicKey, key: &[u8]) -> Result<Vec<u8>, Self::Error>;

    /// 使用私钥解封对称密钥，`key_len` 为期望的对称密钥长度。
    fn unwrap(
        private_key: &Self::PrivateKey,
        wrapped: &[u8],
        key_len: usize,
    ) -> Result<ZeroizingVec, Self::Error>;

    /// 该方案在给定公钥下可封装的最大密钥长度。
    fn max_key_len(public_key: &Self::PublicKey) -> usize;
}
