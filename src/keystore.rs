//! 密钥来源：为服务端提供长期使用的 RSA 密钥对。
//!
//! 编解码器只通过 [`KeyStore`] 的四个操作获取密钥，具体来源（文件、环境变量、内存）可替换。

pub mod env;
pub mod file;
pub mod memory;

pub use self::env::EnvKeyStore;
pub use self::file::FileKeyStore;
pub use self::memory::MemoryKeyStore;

use crate::asymmetric::systems::rsa::RsaKeyPair;
use crate::common::config::{KeySource, KeyStoreConfig};
use crate::error::{Error, Result};
use arc_swap::ArcSwapOption;
use std::sync::Arc;
use tracing::debug;

pub const PUBLIC_KEY_LABEL: &str = "PUBLIC KEY";
pub const PRIVATE_KEY_LABEL: &str = "PRIVATE KEY";

const PEM_LINE_WIDTH: usize = 64;

/// 密钥对提供者
pub trait KeyStore: Send + Sync {
    /// 公钥 PEM；未配置时返回 [`Error::KeyUnavailable`]
    fn get_public_key(&self) -> Result<String>;

    /// 私钥 PEM；未配置时返回 [`Error::KeyUnavailable`]
    fn get_private_key(&self) -> Result<String>;

    /// 公钥与私钥是否都已存在
    fn has_existing_keys(&self) -> bool;

    /// 不存在密钥时生成一对新密钥。返回是否真的生成了新密钥。
    fn generate_if_absent(&self, bits: usize) -> Result<bool>;
}

impl<K: KeyStore + ?Sized> KeyStore for Arc<K> {
    fn get_public_key(&self) -> Result<String> {
        (**self).get_public_key()
    }

    fn get_private_key(&self) -> Result<String> {
        (**self).get_private_key()
    }

    fn has_existing_keys(&self) -> bool {
        (**self).has_existing_keys()
    }

    fn generate_if_absent(&self, bits: usize) -> Result<bool> {
        (**self).generate_if_absent(bits)
    }
}

/// 规整 PEM 文本。
///
/// 接受缺少换行的单行输入（例如来自环境变量）以及字面量 `\n` 转义，
/// 去掉原有的头尾与空白后按 64 列重新折行，并补上 `-----BEGIN/END-----`。
/// 输入自带头部时沿用其中的标签，否则使用 `default_label`。
pub fn normalize_pem(input: &str, default_label: &str) -> Result<String> {
    let text = input.trim().replace("\\r", "").replace("\\n", "\n");
    let (label, body) = split_armour(&text);
    let label = label.unwrap_or_else(|| default_label.to_string());

    if body.is_empty() {
        return Err(Error::InvalidKey(format!("{label} PEM has an empty body")));
    }
    if let Some(bad) = body
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '=')))
    {
        return Err(Error::InvalidKey(format!(
            "{label} PEM body contains invalid character {bad:?}"
        )));
    }

    let mut out = String::with_capacity(body.len() + body.len() / PEM_LINE_WIDTH + 64);
    out.push_str(&format!("-----BEGIN {label}-----\n"));
    for (i, c) in body.chars().enumerate() {
        if i > 0 && i % PEM_LINE_WIDTH == 0 {
            out.push('\n');
        }
        out.push(c);
    }
    out.push_str(&format!("\n-----END {label}-----\n"));
    Ok(out)
}

/// 拆出 `-----...-----` 标记，返回 BEGIN 标签与去除空白后的正文
fn split_armour(text: &str) -> (Option<String>, String) {
    let mut label = None;
    let mut body = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find("-----") {
        body.push_str(&rest[..start]);
        let after = &rest[start + 5..];
        let Some(end) = after.find("-----") else {
            rest = "";
            break;
        };
        let marker = after[..end].trim();
        if label.is_none() {
            if let Some(found) = marker.strip_prefix("BEGIN ") {
                label = Some(found.trim().to_string());
            }
        }
        rest = &after[end + 5..];
    }
    body.push_str(rest);

    let body = body.chars().filter(|c| !c.is_whitespace()).collect();
    (label, body)
}

/// 解析一次后缓存密钥对的包装器，避免每个请求都读文件并解析 PEM。
pub struct CachedKeyStore<S> {
    inner: S,
    cached: ArcSwapOption<RsaKeyPair>,
}

impl<S: KeyStore> CachedKeyStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            cached: ArcSwapOption::new(None),
        }
    }

    /// 获取解析后的密钥对，首次调用时从底层来源加载
    pub fn key_pair(&self) -> Result<Arc<RsaKeyPair>> {
        if let Some(pair) = self.cached.load_full() {
            return Ok(pair);
        }
        let public = self.inner.get_public_key()?;
        let private = self.inner.get_private_key()?;
        let pair = Arc::new(RsaKeyPair::from_pem(&public, &private)?);
        self.cached.store(Some(pair.clone()));
        debug!(modulus_bytes = pair.modulus_bytes(), "key store cache filled");
        Ok(pair)
    }

    /// 丢弃缓存，下次访问时重新加载
    pub fn invalidate(&self) {
        self.cached.store(None);
    }

    pub fn is_cached(&self) -> bool {
        self.cached.load().is_some()
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: KeyStore> KeyStore for CachedKeyStore<S> {
    fn get_public_key(&self) -> Result<String> {
        self.inner.get_public_key()
    }

    fn get_private_key(&self) -> Result<String> {
        self.inner.get_private_key()
    }

    fn has_existing_keys(&self) -> bool {
        self.inner.has_existing_keys()
    }

    fn generate_if_absent(&self, bits: usize) -> Result<bool> {
        let created = self.inner.generate_if_absent(bits)?;
        if created {
            self.invalidate();
        }
        Ok(created)
    }
}

/// 按配置打开密钥来源
pub fn open_key_store(config: &KeyStoreConfig) -> Box<dyn KeyStore> {
    match config.source {
        KeySource::File => Box::new(
            FileKeyStore::new(&config.key_dir).with_permissions(config.file_permissions),
        ),
        KeySource::Env => Box::new(EnvKeyStore::new(
            &config.public_key_var,
            &config.private_key_var,
        )),
        KeySource::EnvBase64 => Box::new(EnvKeyStore::base64(
            &config.public_key_var,
            &config.private_key_var,
        )),
        KeySource::Memory => Box::new(MemoryKeyStore::new()),
    }
}

impl<K: KeyStore + ?Sized> KeyStore for Box<K> {
    fn get_public_key(&self) -> Result<String> {
        (**self).get_public_key()
    }

    fn get_private_key(&self) -> Result<String> {
        (**self).get_private_key()
    }

    fn has_existing_keys(&self) -> bool {
        (**self).has_existing_keys()
    }

    fn generate_if_absent(&self, bits: usize) -> Result<bool> {
        (**self).generate_if_absent(bits)
    }
}
