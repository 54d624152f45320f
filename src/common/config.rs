//!
//! # 通用配置模块
//!
//! 包含传输层使用的核心配置结构：信封格式、密钥交换方案、AES 密钥长度、
//! 低安全模式开关以及密钥来源。配置可以来自内存默认值、JSON 文件或 `LOG_SEAL_*` 环境变量。
//!
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, PoisonError, RwLock};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

use crate::asymmetric::KeyExchangeScheme;
use crate::envelope::EnvelopeVariant;
use crate::error::Error;

/// 环境变量前缀
pub const ENV_PREFIX: &str = "LOG_SEAL_";

/// 当前实现支持的协议版本（Variant B 的首字节）
pub const DEFAULT_PROTOCOL_VERSION: u8 = 1;

/// 预共享的静态密钥（Variant C）。只在内存中保存，序列化时被跳过。
#[derive(Clone)]
pub struct StaticSecret(SecretString);

impl StaticSecret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(SecretString::from(secret.into()))
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for StaticSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StaticSecret([REDACTED])")
    }
}

impl PartialEq for StaticSecret {
    fn eq(&self, other: &Self) -> bool {
        self.expose() == other.expose()
    }
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<Option<StaticSecret>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.map(StaticSecret::new))
}

/// 传输层配置
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TransportConfig {
    /// 带密钥封装的信封格式（Fixed 或 Versioned）
    #[serde(default = "default_envelope_variant")]
    pub envelope_variant: EnvelopeVariant,
    /// 对称密钥的封装方案
    #[serde(default)]
    pub key_exchange: KeyExchangeScheme,
    /// 每条消息随机生成的 AES 密钥长度（16/24/32）
    #[serde(default = "default_aes_key_bytes")]
    pub aes_key_bytes: usize,
    /// Versioned 信封的协议版本号
    #[serde(default = "default_protocol_version")]
    pub protocol_version: u8,
    /// RSA 密钥位数
    #[serde(default = "default_rsa_key_bits")]
    pub rsa_key_bits: usize,
    /// 是否允许使用静态密钥信封（Variant C）
    #[serde(default)]
    pub low_security_mode: bool,
    /// Variant C 的预共享密钥
    #[serde(
        default,
        skip_serializing,
        deserialize_with = "deserialize_secret"
    )]
    pub static_secret: Option<StaticSecret>,
}

fn default_envelope_variant() -> EnvelopeVariant {
    EnvelopeVariant::Versioned
}

fn default_aes_key_bytes() -> usize {
    32
}

fn default_protocol_version() -> u8 {
    DEFAULT_PROTOCOL_VERSION
}

fn default_rsa_key_bits() -> usize {
    2048
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            envelope_variant: EnvelopeVariant::Versioned,
            key_exchange: KeyExchangeScheme::RsaOaepSha256,
            aes_key_bytes: 32,
            protocol_version: DEFAULT_PROTOCOL_VERSION,
            rsa_key_bits: 2048,
            low_security_mode: false,
            static_secret: None,
        }
    }
}

impl TransportConfig {
    /// 开启低安全模式并设置静态密钥
    pub fn with_low_security_mode(mut self, secret: impl Into<String>) -> Self {
        self.low_security_mode = true;
        self.static_secret = Some(StaticSecret::new(secret));
        self
    }

    /// 校验配置的一致性
    pub fn validate(&self) -> Result<(), Error> {
        if self.envelope_variant == EnvelopeVariant::StaticKey {
            return Err(Error::Configuration(
                "envelope_variant must be a key-wrapping variant (fixed or versioned); \
                 the static-key envelope is enabled through low_security_mode"
                    .to_string(),
            ));
        }
        if self.low_security_mode && self.static_secret.is_none() {
            return Err(Error::Configuration(
                "low_security_mode requires a static_secret".to_string(),
            ));
        }
        if self.aes_key_bytes == 0 || self.aes_key_bytes > 32 {
            return Err(Error::Configuration(format!(
                "aes_key_bytes must be in 1..=32, got {}",
                self.aes_key_bytes
            )));
        }
        if self.protocol_version == 0 {
            return Err(Error::Configuration(
                "protocol_version must be non-zero".to_string(),
            ));
        }
        if self.rsa_key_bits < 1024 {
            return Err(Error::Configuration(format!(
                "rsa_key_bits must be at least 1024, got {}",
                self.rsa_key_bits
            )));
        }
        if self.key_exchange == KeyExchangeScheme::RsaRawLegacy {
            warn!(
                scheme = self.key_exchange.name(),
                "legacy raw RSA key exchange configured; this scheme is malleable and must not be used for new integrations"
            );
        }
        Ok(())
    }
}

/// 密钥对的来源
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum KeySource {
    /// `key_dir` 下的 `public.pem` / `private.pem`
    File,
    /// 环境变量中的 PEM 文本
    Env,
    /// 环境变量中 Base64 编码后的 PEM 文本
    EnvBase64,
    /// 仅存在于进程内存
    Memory,
}

impl FromStr for KeySource {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "file" => Ok(KeySource::File),
            "env" => Ok(KeySource::Env),
            "env-base64" | "env_base64" | "base64" => Ok(KeySource::EnvBase64),
            "memory" => Ok(KeySource::Memory),
            other => Err(Error::Configuration(format!("unknown key source: {other}"))),
        }
    }
}

/// 密钥存储配置
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct KeyStoreConfig {
    /// 密钥来源
    pub source: KeySource,
    /// 密钥文件目录
    pub key_dir: String,
    /// 存放公钥的环境变量名
    pub public_key_var: String,
    /// 存放私钥的环境变量名
    pub private_key_var: String,
    /// 私钥文件权限（Unix文件模式，如0o600）
    #[serde(default = "default_file_permissions")]
    pub file_permissions: u32,
}

fn default_file_permissions() -> u32 {
    0o600
}

impl Default for KeyStoreConfig {
    fn default() -> Self {
        Self {
            source: KeySource::File,
            key_dir: "./keys".to_string(),
            public_key_var: format!("{ENV_PREFIX}PUBLIC_KEY"),
            private_key_var: format!("{ENV_PREFIX}PRIVATE_KEY"),
            file_permissions: 0o600,
        }
    }
}

/// 完整配置文件
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct ConfigFile {
    /// 传输配置
    #[serde(default)]
    pub transport: TransportConfig,
    /// 密钥存储配置
    #[serde(default)]
    pub key_store: KeyStoreConfig,
}

/// 配置来源
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigSource {
    /// 内存默认值
    Default,
    /// 文件
    File,
    /// 环境变量
    Environment,
}

/// 配置管理器事件类型
#[derive(Clone, Debug, PartialEq)]
pub enum ConfigEvent {
    /// 传输配置变更
    TransportConfigChanged,
    /// 密钥存储配置变更
    KeyStoreConfigChanged,
}

/// 配置监听器
pub type ConfigListener = Box<dyn Fn(&ConfigManager, ConfigEvent) + Send + Sync>;

/// 配置管理器
pub struct ConfigManager {
    transport: RwLock<TransportConfig>,
    key_store: RwLock<KeyStoreConfig>,
    config_source: ConfigSource,
    config_path: Option<PathBuf>,
    listeners: Mutex<Vec<ConfigListener>>,
}

impl ConfigManager {
    /// 创建默认配置管理器
    pub fn new() -> Self {
        Self::with_config(ConfigFile::default(), ConfigSource::Default)
    }

    fn with_config(config: ConfigFile, source: ConfigSource) -> Self {
        Self {
            transport: RwLock::new(config.transport),
            key_store: RwLock::new(config.key_store),
            config_source: source,
            config_path: None,
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// 从 JSON 文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let config: ConfigFile = serde_json::from_str(&contents)
            .map_err(|e| Error::Configuration(format!("解析配置文件失败: {e}")))?;
        config.transport.validate()?;

        let mut manager = Self::with_config(config, ConfigSource::File);
        manager.config_path = Some(path.to_path_buf());
        Ok(manager)
    }

    /// 从 `LOG_SEAL_*` 环境变量加载配置
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// 使用自定义查找函数加载配置；无法解析的值会被忽略并记录警告。
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| lookup(&format!("{ENV_PREFIX}{suffix}"));
        let mut config = ConfigFile::default();

        fn parse_or_warn<T: FromStr>(name: &str, value: &str) -> Option<T> {
            let parsed = value.parse::<T>().ok();
            if parsed.is_none() {
                warn!(variable = name, value, "ignoring unparsable configuration value");
            }
            parsed
        }

        let transport = &mut config.transport;
        if let Some(value) = var("ENVELOPE_VARIANT") {
            if let Some(variant) = parse_or_warn("ENVELOPE_VARIANT", &value) {
                transport.envelope_variant = variant;
            }
        }
        if let Some(value) = var("KEY_EXCHANGE") {
            if let Some(scheme) = parse_or_warn("KEY_EXCHANGE", &value) {
                transport.key_exchange = scheme;
            }
        }
        if let Some(value) = var("AES_KEY_BYTES") {
            if let Some(bytes) = parse_or_warn("AES_KEY_BYTES", &value) {
                transport.aes_key_bytes = bytes;
            }
        }
        if let Some(value) = var("PROTOCOL_VERSION") {
            if let Some(version) = parse_or_warn("PROTOCOL_VERSION", &value) {
                transport.protocol_version = version;
            }
        }
        if let Some(value) = var("RSA_BITS") {
            if let Some(bits) = parse_or_warn("RSA_BITS", &value) {
                transport.rsa_key_bits = bits;
            }
        }
        if let Some(value) = var("LOW_SECURITY_MODE") {
            transport.low_security_mode = value.to_lowercase() == "true";
        }
        if let Some(value) = var("STATIC_SECRET") {
            transport.static_secret = Some(StaticSecret::new(value));
        }

        let key_store = &mut config.key_store;
        if let Some(value) = var("KEY_SOURCE") {
            if let Some(source) = parse_or_warn("KEY_SOURCE", &value) {
                key_store.source = source;
            }
        }
        if let Some(value) = var("KEY_DIR") {
            key_store.key_dir = value;
        }
        if let Some(value) = var("PUBLIC_KEY_VAR") {
            key_store.public_key_var = value;
        }
        if let Some(value) = var("PRIVATE_KEY_VAR") {
            key_store.private_key_var = value;
        }
        if let Some(value) = var("FILE_PERMISSIONS") {
            if let Some(mode) = parse_or_warn("FILE_PERMISSIONS", &value) {
                key_store.file_permissions = mode;
            }
        }

        Self::with_config(config, ConfigSource::Environment)
    }

    /// 保存配置到文件（静态密钥不会被写出）
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), Error> {
        let config = ConfigFile {
            transport: self.transport_config(),
            key_store: self.key_store_config(),
        };
        let json = serde_json::to_string_pretty(&config)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// 添加配置变更监听器
    pub fn add_listener<F>(&self, listener: F)
    where
        F: Fn(&ConfigManager, ConfigEvent) + Send + Sync + 'static,
    {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(listener));
    }

    fn notify_listeners(&self, event: ConfigEvent) {
        let listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        for listener in listeners.iter() {
            listener(self, event.clone());
        }
    }

    /// 配置来源
    pub fn source(&self) -> &ConfigSource {
        &self.config_source
    }

    /// 获取传输配置
    pub fn transport_config(&self) -> TransportConfig {
        self.transport
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 获取密钥存储配置
    pub fn key_store_config(&self) -> KeyStoreConfig {
        self.key_store
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 更新传输配置；新配置必须通过校验，文件来源时还必须能写回文件
    pub fn update_transport_config(&self, config: TransportConfig) -> Result<(), Error> {
        config.validate()?;
        let pending = self.file_document(&config, &self.key_store_config())?;
        *self.transport.write().unwrap_or_else(PoisonError::into_inner) = config;
        self.notify_listeners(ConfigEvent::TransportConfigChanged);
        write_document(pending)
    }

    /// 更新密钥存储配置
    pub fn update_key_store_config(&self, config: KeyStoreConfig) -> Result<(), Error> {
        let pending = self.file_document(&self.transport_config(), &config)?;
        *self.key_store.write().unwrap_or_else(PoisonError::into_inner) = config;
        self.notify_listeners(ConfigEvent::KeyStoreConfigChanged);
        write_document(pending)
    }

    /// 文件来源时生成要写回的 JSON 文档。
    ///
    /// 静态密钥只写回原本就保存了密钥的文件；原文件没有密钥而新配置又开启了低安全模式时拒绝，
    /// 否则写出的文件在下次 `from_file` 时无法通过校验。
    fn file_document(
        &self,
        transport: &TransportConfig,
        key_store: &KeyStoreConfig,
    ) -> Result<Option<(PathBuf, serde_json::Value)>, Error> {
        let path = match (&self.config_source, &self.config_path) {
            (ConfigSource::File, Some(path)) => path,
            _ => return Ok(None),
        };

        let mut document = serde_json::to_value(ConfigFile {
            transport: transport.clone(),
            key_store: key_store.clone(),
        })?;
        let secret = transport.static_secret.as_ref().map(StaticSecret::expose);
        match secret {
            Some(secret) if file_stores_secret(path) => {
                document["transport"]["static_secret"] = serde_json::Value::from(secret);
            }
            _ if transport.low_security_mode => {
                return Err(Error::Configuration(format!(
                    "cannot persist low_security_mode to {}: the file does not hold a static_secret",
                    path.display()
                )));
            }
            _ => {}
        }
        Ok(Some((path.clone(), document)))
    }
}

fn file_stores_secret(path: &Path) -> bool {
    fs::read_to_string(path)
        .ok()
        .and_then(|contents| serde_json::from_str::<serde_json::Value>(&contents).ok())
        .is_some_and(|document| document["transport"]["static_secret"].is_string())
}

fn write_document(pending: Option<(PathBuf, serde_json::Value)>) -> Result<(), Error> {
    if let Some((path, document)) = pending {
        fs::write(path, serde_json::to_string_pretty(&document)?)?;
    }
    Ok(())
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    #[test]
    fn default_config_is_valid_and_prefers_versioned_oaep() {
        let config = TransportConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.envelope_variant, EnvelopeVariant::Versioned);
        assert_eq!(config.key_exchange, KeyExchangeScheme::RsaOaepSha256);
        assert_eq!(config.rsa_key_bits, 2048);
        assert!(!config.low_security_mode);
    }

    #[test]
    fn static_key_requires_explicit_opt_in() {
        let config = TransportConfig {
            envelope_variant: EnvelopeVariant::StaticKey,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));

        let config = TransportConfig {
            low_security_mode: true,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));

        let config = TransportConfig::default().with_low_security_mode("shared");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn invalid_aes_key_length_is_rejected() {
        for bytes in [0, 33] {
            let config = TransportConfig {
                aes_key_bytes: bytes,
                ..Default::default()
            };
            assert!(config.validate().is_err());
        }
    }

    #[test]
    fn from_lookup_reads_prefixed_variables() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("LOG_SEAL_ENVELOPE_VARIANT", "fixed"),
            ("LOG_SEAL_KEY_EXCHANGE", "raw"),
            ("LOG_SEAL_AES_KEY_BYTES", "16"),
            ("LOG_SEAL_RSA_BITS", "not-a-number"),
            ("LOG_SEAL_LOW_SECURITY_MODE", "TRUE"),
            ("LOG_SEAL_STATIC_SECRET", "s3cret"),
            ("LOG_SEAL_KEY_SOURCE", "env-base64"),
        ]);
        let manager = ConfigManager::from_lookup(|name| vars.get(name).map(|v| v.to_string()));
        let transport = manager.transport_config();

        assert_eq!(manager.source(), &ConfigSource::Environment);
        assert_eq!(transport.envelope_variant, EnvelopeVariant::Fixed);
        assert_eq!(transport.key_exchange, KeyExchangeScheme::RsaRawLegacy);
        assert_eq!(transport.aes_key_bytes, 16);
        assert_eq!(transport.rsa_key_bits, 2048);
        assert!(transport.low_security_mode);
        assert_eq!(transport.static_secret.unwrap().expose(), "s3cret");
        assert_eq!(manager.key_store_config().source, KeySource::EnvBase64);
    }

    #[test]
    fn file_roundtrip_never_writes_the_static_secret() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log-seal.json");

        let manager = ConfigManager::new();
        manager
            .update_transport_config(TransportConfig::default().with_low_security_mode("hidden"))
            .unwrap();
        manager.save_to_file(&path).unwrap();

        let written = fs::read_to_string(&path).unwrap();
        assert!(!written.contains("hidden"));
        assert!(written.contains("versioned"));
    }

    #[test]
    fn from_file_reads_secret_and_persists_updates() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log-seal.json");
        fs::write(
            &path,
            r#"{
                "transport": {
                    "envelope_variant": "fixed",
                    "low_security_mode": true,
                    "static_secret": "from-file"
                },
                "key_store": {
                    "source": "memory",
                    "key_dir": "/tmp/keys",
                    "public_key_var": "PUB",
                    "private_key_var": "PRIV"
                }
            }"#,
        )
        .unwrap();

        let manager = ConfigManager::from_file(&path).unwrap();
        let transport = manager.transport_config();
        assert_eq!(transport.envelope_variant, EnvelopeVariant::Fixed);
        assert_eq!(transport.static_secret.unwrap().expose(), "from-file");
        assert_eq!(manager.key_store_config().file_permissions, 0o600);

        let mut key_store = manager.key_store_config();
        key_store.key_dir = "/srv/keys".to_string();
        manager.update_key_store_config(key_store).unwrap();

        let reloaded = ConfigManager::from_file(&path).unwrap();
        assert_eq!(reloaded.key_store_config().key_dir, "/srv/keys");
        let transport = reloaded.transport_config();
        assert!(transport.low_security_mode);
        assert_eq!(transport.static_secret.unwrap().expose(), "from-file");
    }

    #[test]
    fn rotated_secret_is_written_to_a_file_that_already_holds_one() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log-seal.json");
        fs::write(
            &path,
            r#"{ "transport": { "low_security_mode": true, "static_secret": "old" } }"#,
        )
        .unwrap();

        let manager = ConfigManager::from_file(&path).unwrap();
        manager
            .update_transport_config(TransportConfig::default().with_low_security_mode("new"))
            .unwrap();

        let reloaded = ConfigManager::from_file(&path).unwrap();
        assert_eq!(reloaded.transport_config().static_secret.unwrap().expose(), "new");
    }

    #[test]
    fn low_security_mode_is_not_persisted_without_a_stored_secret() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log-seal.json");
        fs::write(&path, r#"{ "transport": { "envelope_variant": "versioned" } }"#).unwrap();
        let before = fs::read_to_string(&path).unwrap();

        let manager = ConfigManager::from_file(&path).unwrap();
        let err = manager
            .update_transport_config(TransportConfig::default().with_low_security_mode("env-only"))
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert!(!manager.transport_config().low_security_mode);
        assert_eq!(fs::read_to_string(&path).unwrap(), before);
        assert!(ConfigManager::from_file(&path).is_ok());
    }

    #[test]
    fn listeners_are_notified_on_update() {
        let manager = ConfigManager::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        manager.add_listener(move |_, event| {
            assert_eq!(event, ConfigEvent::TransportConfigChanged);
            seen.fetch_add(1, Ordering::SeqCst);
        });

        manager
            .update_transport_config(TransportConfig {
                aes_key_bytes: 24,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let rejected = manager.update_transport_config(TransportConfig {
            aes_key_bytes: 0,
            ..Default::default()
        });
        assert!(rejected.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
