use std::fmt::Debug;

/// 对称加密系统的公共特征
///
/// 与带认证的模式不同，这里的 IV 由调用方生成并单独传入，因为 IV 是信封中的独立字段。
pub trait SymmetricCryptographicSystem: Sized {
    /// IV 的长度（以字节为单位）。
    const IV_SIZE: usize;

    /// 用于加密和解密的单一密钥。
    type Key: Clone + Debug;

    /// 该系统的错误类型。
    type Error: std::error::Error + Send + Sync + 'static;

    /// 生成一个新的随机密钥。
    fn generate_key(key_len: usize) -> Result<Self::Key, Self::Error>;

    /// 生成一个新的随机 IV。
    fn generate_iv() -> Result<Vec<u8>, Self::Error>;

    /// 使用密钥和 IV 加密数据。
    fn encrypt(key: &Self::Key, iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, Self::Error>;

    /// 使用密钥和 IV 解密数据。
    fn decrypt(key: &Self::Key, iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, Self::Error>;
}
