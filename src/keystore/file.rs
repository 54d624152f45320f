use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::info;

use crate::asymmetric::systems::rsa::RsaKeyPair;
use crate::error::{Error, Result};
use crate::keystore::{KeyStore, PRIVATE_KEY_LABEL, PUBLIC_KEY_LABEL, normalize_pem};

pub const PUBLIC_KEY_FILE: &str = "public.pem";
pub const PRIVATE_KEY_FILE: &str = "private.pem";

/// 密钥文件存储
///
/// 在 `dir` 下保存 `public.pem` 与 `private.pem`，私钥文件在 Unix 上以受限权限写入。
#[derive(Debug, Clone)]
pub struct FileKeyStore {
    dir: PathBuf,
    file_permissions: u32,
}

impl FileKeyStore {
    /// 创建新的密钥文件存储；目录在首次生成密钥时才会创建
    ///
    /// # 参数
    ///
    /// * `dir` - 存放密钥文件的目录
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            file_permissions: 0o600,
        }
    }

    /// 设置私钥文件权限（Unix 文件模式）
    pub fn with_permissions(mut self, mode: u32) -> Self {
        self.file_permissions = mode;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn public_key_path(&self) -> PathBuf {
        self.dir.join(PUBLIC_KEY_FILE)
    }

    pub fn private_key_path(&self) -> PathBuf {
        self.dir.join(PRIVATE_KEY_FILE)
    }

    fn read_pem(&self, path: &Path, label: &str) -> Result<String> {
        if !path.exists() {
            return Err(Error::KeyUnavailable(format!(
                "no key file at {}",
                path.display()
            )));
        }
        let contents = fs::read_to_string(path).map_err(|e| {
            Error::Io(io::Error::new(
                e.kind(),
                format!("读取密钥文件失败 {}: {}", path.display(), e),
            ))
        })?;
        normalize_pem(&contents, label)
    }

    fn write_file(&self, path: &Path, contents: &str, mode: Option<u32>) -> Result<()> {
        let annotate = |e: io::Error| {
            Error::Io(io::Error::new(
                e.kind(),
                format!("写入密钥文件失败 {}: {}", path.display(), e),
            ))
        };
        let mut file = open_for_write(path, mode).map_err(annotate)?;
        file.write_all(contents.as_bytes()).map_err(annotate)?;
        Ok(())
    }
}

/// 以指定模式创建文件；文件已存在时先收紧权限再截断写入，内容从不以默认权限落盘。
#[cfg(unix)]
fn open_for_write(path: &Path, mode: Option<u32>) -> io::Result<fs::File> {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true);
    if let Some(mode) = mode {
        options.mode(mode);
    }
    let file = options.open(path)?;
    if let Some(mode) = mode {
        file.set_permissions(fs::Permissions::from_mode(mode))?;
    }
    file.set_len(0)?;
    Ok(file)
}

#[cfg(not(unix))]
fn open_for_write(path: &Path, _mode: Option<u32>) -> io::Result<fs::File> {
    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
}

impl KeyStore for FileKeyStore {
    fn get_public_key(&self) -> Result<String> {
        self.read_pem(&self.public_key_path(), PUBLIC_KEY_LABEL)
    }

    fn get_private_key(&self) -> Result<String> {
        self.read_pem(&self.private_key_path(), PRIVATE_KEY_LABEL)
    }

    fn has_existing_keys(&self) -> bool {
        self.public_key_path().is_file() && self.private_key_path().is_file()
    }

    fn generate_if_absent(&self, bits: usize) -> Result<bool> {
        if self.has_existing_keys() {
            return Ok(false);
        }

        fs::create_dir_all(&self.dir).map_err(|e| {
            Error::Io(io::Error::new(
                e.kind(),
                format!("无法创建密钥存储目录 {}: {}", self.dir.display(), e),
            ))
        })?;

        let pair = RsaKeyPair::generate(bits)?;
        self.write_file(&self.private_key_path(), &pair.private_key_pem()?, Some(self.file_permissions))?;
        self.write_file(&self.public_key_path(), &pair.public_key_pem()?, None)?;
        info!(dir = %self.dir.display(), bits, "wrote new RSA key pair");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asymmetric::systems::rsa::tests::shared_keys;
    use crate::error::ErrorKind;
    use tempfile::tempdir;

    #[test]
    fn missing_files_are_key_unavailable() {
        let dir = tempdir().unwrap();
        let store = FileKeyStore::new(dir.path().join("absent"));
        assert!(!store.has_existing_keys());
        assert_eq!(store.get_public_key().unwrap_err().kind(), ErrorKind::KeyUnavailable);
        assert_eq!(store.get_private_key().unwrap_err().kind(), ErrorKind::KeyUnavailable);
    }

    #[test]
    fn generate_if_absent_writes_once() {
        let dir = tempdir().unwrap();
        let store = FileKeyStore::new(dir.path().join("keys"));

        assert!(store.generate_if_absent(1024).unwrap());
        assert!(store.has_existing_keys());
        let public = store.get_public_key().unwrap();

        assert!(!store.generate_if_absent(1024).unwrap());
        assert_eq!(store.get_public_key().unwrap(), public);

        let pair = RsaKeyPair::from_pem(&public, &store.get_private_key().unwrap()).unwrap();
        assert_eq!(pair.modulus_bytes(), 128);
    }

    #[cfg(unix)]
    #[test]
    fn private_key_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempdir().unwrap();
        let store = FileKeyStore::new(dir.path());
        store.generate_if_absent(1024).unwrap();

        let mode = fs::metadata(store.private_key_path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[cfg(unix)]
    #[test]
    fn stale_private_key_file_is_tightened_before_rewrite() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempdir().unwrap();
        let store = FileKeyStore::new(dir.path()).with_permissions(0o640);
        fs::write(store.private_key_path(), "stale contents that are longer than nothing").unwrap();
        fs::set_permissions(store.private_key_path(), fs::Permissions::from_mode(0o644)).unwrap();

        assert!(store.generate_if_absent(1024).unwrap());
        let mode = fs::metadata(store.private_key_path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o640);
        assert!(!fs::read_to_string(store.private_key_path()).unwrap().contains("stale"));
        assert!(store.get_private_key().is_ok());
    }

    #[test]
    fn existing_single_line_files_are_normalized() {
        let dir = tempdir().unwrap();
        let pem = shared_keys().public_key_pem().unwrap();
        fs::write(dir.path().join(PUBLIC_KEY_FILE), pem.replace('\n', "")).unwrap();
        fs::write(
            dir.path().join(PRIVATE_KEY_FILE),
            shared_keys().private_key_pem().unwrap(),
        )
        .unwrap();

        let store = FileKeyStore::new(dir.path());
        assert!(store.has_existing_keys());
        assert_eq!(store.get_public_key().unwrap(), pem);
    }
}
