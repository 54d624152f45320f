//! 客户端公钥登记表：会话标识 → 客户端 RSA 公钥 (PEM)。
//!
//! 服务端据此决定响应是加密给某个客户端的公钥，还是回退到静态密钥信封。
//! 查不到登记并不是错误。

use crate::error::Result;
use dashmap::DashMap;

/// 可替换的登记表存储：内存并发表、分布式缓存或数据库表都可以实现它。
pub trait ClientKeyRegistry: Send + Sync {
    /// 登记或覆盖某个会话的公钥
    fn store(&self, session_id: &str, public_key_pem: &str) -> Result<()>;

    /// 查询会话的公钥；与并发的 `store` 竞争时可能返回 `None`，调用方应回退而不是报错
    fn lookup(&self, session_id: &str) -> Option<String>;

    /// 移除登记，返回之前是否存在
    fn remove(&self, session_id: &str) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 基于 `DashMap` 的进程内登记表，进程重启后登记全部丢失
#[derive(Debug, Default)]
pub struct InMemoryClientKeyRegistry {
    entries: DashMap<String, String>,
}

impl InMemoryClientKeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ClientKeyRegistry for InMemoryClientKeyRegistry {
    fn store(&self, session_id: &str, public_key_pem: &str) -> Result<()> {
        self.entries
            .insert(session_id.to_string(), public_key_pem.to_string());
        Ok(())
    }

    fn lookup(&self, session_id: &str) -> Option<String> {
        self.entries.get(session_id).map(|entry| entry.value().clone())
    }

    fn remove(&self, session_id: &str) -> bool {
        self.entries.remove(session_id).is_some()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

impl<R: ClientKeyRegistry + ?Sized> ClientKeyRegistry for std::sync::Arc<R> {
    fn store(&self, session_id: &str, public_key_pem: &str) -> Result<()> {
        (**self).store(session_id, public_key_pem)
    }

    fn lookup(&self, session_id: &str) -> Option<String> {
        (**self).lookup(session_id)
    }

    fn remove(&self, session_id: &str) -> bool {
        (**self).remove(session_id)
    }

    fn len(&self) -> usize {
        (**self).len()
    }
}
