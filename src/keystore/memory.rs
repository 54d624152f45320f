use std::sync::{PoisonError, RwLock};

use crate::asymmetric::systems::rsa::RsaKeyPair;
use crate::error::{Error, Result};
use crate::keystore::{KeyStore, PRIVATE_KEY_LABEL, PUBLIC_KEY_LABEL, normalize_pem};

#[derive(Clone)]
struct PemPair {
    public: String,
    private: String,
}

/// 仅保存在进程内存中的密钥来源，重启后丢失
#[derive(Default)]
pub struct MemoryKeyStore {
    keys: RwLock<Option<PemPair>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pem(public_pem: &str, private_pem: &str) -> Result<Self> {
        let pair = PemPair {
            public: normalize_pem(public_pem, PUBLIC_KEY_LABEL)?,
            private: normalize_pem(private_pem, PRIVATE_KEY_LABEL)?,
        };
        Ok(Self {
            keys: RwLock::new(Some(pair)),
        })
    }

    pub fn from_key_pair(pair: &RsaKeyPair) -> Result<Self> {
        Self::from_pem(&pair.public_key_pem()?, &pair.private_key_pem()?)
    }

    fn with_keys<T>(&self, f: impl FnOnce(&PemPair) -> T) -> Result<T> {
        let guard = self.keys.read().unwrap_or_else(PoisonError::into_inner);
        guard
            .as_ref()
            .map(f)
            .ok_or_else(|| Error::KeyUnavailable("no key pair in memory".to_string()))
    }
}

impl std::fmt::Debug for MemoryKeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryKeyStore")
            .field("has_keys", &self.has_existing_keys())
            .finish()
    }
}

impl KeyStore for MemoryKeyStore {
    fn get_public_key(&self) -> Result<String> {
        self.with_keys(|pair| pair.public.clone())
    }

    fn get_private_key(&self) -> Result<String> {
        self.with_keys(|pair| pair.private.clone())
    }

    fn has_existing_keys(&self) -> bool {
        self.keys
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn generate_if_absent(&self, bits: usize) -> Result<bool> {
        let mut guard = self.keys.write().unwrap_or_else(PoisonError::into_inner);
        if guard.is_some() {
            return Ok(false);
        }
        let pair = RsaKeyPair::generate(bits)?;
        *guard = Some(PemPair {
            public: pair.public_key_pem()?,
            private: pair.private_key_pem()?,
        });
        Ok(true)
    }
}
