use std::fmt;
use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose};

use crate::error::{Error, Result};
use crate::keystore::{KeyStore, PRIVATE_KEY_LABEL, PUBLIC_KEY_LABEL, normalize_pem};

type Lookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// 从环境变量读取密钥。
///
/// 变量内容可以是 PEM 文本（允许写成一行），也可以是整段 PEM 的 Base64 编码。
/// 环境变量对进程是只读的，因此这里不会生成密钥。
#[derive(Clone)]
pub struct EnvKeyStore {
    public_var: String,
    private_var: String,
    base64: bool,
    lookup: Lookup,
}

impl EnvKeyStore {
    /// 变量中直接存放 PEM 文本
    pub fn new(public_var: &str, private_var: &str) -> Self {
        Self::with_lookup(public_var, private_var, false, |name| std::env::var(name).ok())
    }

    /// 变量中存放 Base64 编码后的 PEM 文本
    pub fn base64(public_var: &str, private_var: &str) -> Self {
        Self::with_lookup(public_var, private_var, true, |name| std::env::var(name).ok())
    }

    /// 使用自定义的变量查找函数
    pub fn with_lookup<F>(public_var: &str, private_var: &str, base64: bool, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            public_var: public_var.to_string(),
            private_var: private_var.to_string(),
            base64,
            lookup: Arc::new(lookup),
        }
    }

    fn read(&self, var: &str, label: &str) -> Result<String> {
        let raw = (self.lookup)(var)
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| Error::KeyUnavailable(format!("environment variable {var} is not set")))?;

        let pem = if self.base64 {
            let bytes = general_purpose::STANDARD
                .decode(raw.trim())
                .map_err(|e| Error::InvalidKey(format!("{var} is not valid base64: {e}")))?;
            String::from_utf8(bytes)
                .map_err(|_| Error::InvalidKey(format!("{var} does not decode to UTF-8 text")))?
        } else {
            raw
        };
        normalize_pem(&pem, label)
    }
}

impl fmt::Debug for EnvKeyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvKeyStore")
            .field("public_var", &self.public_var)
            .field("private_var", &self.private_var)
            .field("base64", &self.base64)
            .finish()
    }
}

impl KeyStore for EnvKeyStore {
    fn get_public_key(&self) -> Result<String> {
        self.read(&self.public_var, PUBLIC_KEY_LABEL)
    }

    fn get_private_key(&self) -> Result<String> {
        self.read(&self.private_var, PRIVATE_KEY_LABEL)
    }

    fn has_existing_keys(&self) -> bool {
        let present = |var: &str| (self.lookup)(var).is_some_and(|v| !v.trim().is_empty());
        present(&self.public_var) && present(&self.private_var)
    }

    fn generate_if_absent(&self, _bits: usize) -> Result<bool> {
        if self.has_existing_keys() {
            return Ok(false);
        }
        Err(Error::KeyUnavailable(format!(
            "environment key source is read-only; set {} and {}",
            self.public_var, self.private_var
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asymmetric::systems::rsa::RsaKeyPair;
    use crate::asymmetric::systems::rsa::tests::shared_keys;
    use crate::error::ErrorKind;
    use std::collections::HashMap;

    fn store(vars: HashMap<&'static str, String>, base64: bool) -> EnvKeyStore {
        EnvKeyStore::with_lookup("PUB", "PRIV", base64, move |name| vars.get(name).cloned())
    }

    #[test]
    fn reads_single_line_pem() {
        let keys = shared_keys();
        let public = keys.public_key_pem().unwrap();
        let private = keys.private_key_pem().unwrap();
        let store = store(
            HashMap::from([("PUB", public.replace('\n', "")), ("PRIV", private.replace('\n', "\\n"))]),
            false,
        );

        assert!(store.has_existing_keys());
        assert_eq!(store.get_public_key().unwrap(), public);
        let pair = RsaKeyPair::from_pem(
            &store.get_public_key().unwrap(),
            &store.get_private_key().unwrap(),
        )
        .unwrap();
        assert_eq!(pair.public_key(), keys.public_key());
        assert!(!store.generate_if_absent(2048).unwrap());
    }

    #[test]
    fn reads_base64_wrapped_pem() {
        let keys = shared_keys();
        let public = keys.public_key_pem().unwrap();
        let private = keys.private_key_pem().unwrap();
        let store = store(
            HashMap::from([
                ("PUB", general_purpose::STANDARD.encode(&public)),
                ("PRIV", general_purpose::STANDARD.encode(&private)),
            ]),
            true,
        );
        assert_eq!(store.get_public_key().unwrap(), public);
        assert_eq!(store.get_private_key().unwrap(), private);
    }

    #[test]
    fn invalid_base64_is_an_invalid_key() {
        let store = store(HashMap::from([("PUB", "%%%".to_string())]), true);
        assert_eq!(store.get_public_key().unwrap_err().kind(), ErrorKind::InvalidKey);
    }

    #[test]
    fn missing_variables_cannot_be_generated() {
        let store = store(HashMap::from([("PUB", "  ".to_string())]), false);
        assert!(!store.has_existing_keys());
        assert_eq!(store.get_public_key().unwrap_err().kind(), ErrorKind::KeyUnavailable);
        assert_eq!(
            store.generate_if_absent(2048).unwrap_err().kind(),
            ErrorKind::KeyUnavailable
        );
    }
}
