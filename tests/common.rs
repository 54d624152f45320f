//!
//! 集成测试的通用辅助函数
//!
#![allow(dead_code)]

use log_seal::{
    InMemoryClientKeyRegistry, InMemoryLogStore, MemoryKeyStore, RsaKeyPair, TransportConfig,
    TransportServer,
};
use std::sync::OnceLock;

pub type TestServer = TransportServer<InMemoryLogStore, InMemoryClientKeyRegistry, MemoryKeyStore>;

/// 服务端密钥对；RSA-2048 生成较慢，所有测试共用一份。
pub fn server_keys() -> &'static RsaKeyPair {
    static KEYS: OnceLock<RsaKeyPair> = OnceLock::new();
    KEYS.get_or_init(|| RsaKeyPair::generate(2048).unwrap())
}

/// 客户端密钥对
pub fn client_keys() -> &'static RsaKeyPair {
    static KEYS: OnceLock<RsaKeyPair> = OnceLock::new();
    KEYS.get_or_init(|| RsaKeyPair::generate(2048).unwrap())
}

/// 开启低安全模式的配置
pub fn low_security_config() -> TransportConfig {
    TransportConfig::default().with_low_security_mode("integration shared secret")
}

/// 使用共享服务端密钥创建一个内存服务端
pub fn setup_server(config: &TransportConfig) -> TestServer {
    TransportServer::new(
        config,
        MemoryKeyStore::from_key_pair(server_keys()).unwrap(),
        InMemoryClientKeyRegistry::new(),
        InMemoryLogStore::new(),
    )
    .unwrap()
}
