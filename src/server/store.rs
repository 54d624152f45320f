//! 日志存储协作方。真实部署中它是一张带 JSONB 列的关系表，这里只定义接口与一个内存实现。

use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// 一条已入库的日志
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: u64,
    pub received_at: DateTime<Utc>,
    pub payload: Value,
}

/// 查询条件。结果按入库时间倒序排列。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogQuery {
    /// 在序列化后的 JSON 文本中做大小写不敏感的子串匹配
    pub search: Option<String>,
    /// 匹配载荷中的 `level` 字段（大小写不敏感）
    pub level: Option<String>,
    pub offset: usize,
    pub limit: usize,
}

impl Default for LogQuery {
    fn default() -> Self {
        Self {
            search: None,
            level: None,
            offset: 0,
            limit: 50,
        }
    }
}

impl LogQuery {
    pub fn matches(&self, record: &LogRecord) -> bool {
        if let Some(level) = &self.level {
            let found = record
                .payload
                .get("level")
                .and_then(Value::as_str)
                .is_some_and(|l| l.eq_ignore_ascii_case(level));
            if !found {
                return false;
            }
        }
        if let Some(term) = &self.search {
            let haystack = record.payload.to_string().to_lowercase();
            if !haystack.contains(&term.to_lowercase()) {
                return false;
            }
        }
        true
    }
}

/// 存储、查询、删除日志
pub trait LogStore: Send + Sync {
    fn store(&self, payload: Value) -> Result<LogRecord>;

    fn query(&self, query: &LogQuery) -> Result<Vec<LogRecord>>;

    /// 删除给定 id 的日志，返回实际删除的条数
    fn delete(&self, ids: &[u64]) -> Result<usize>;
}

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    records: Vec<LogRecord>,
}

/// 进程内日志存储
#[derive(Debug, Default)]
pub struct InMemoryLogStore {
    inner: RwLock<Inner>,
}

impl InMemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .records
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LogStore for InMemoryLogStore {
    fn store(&self, payload: Value) -> Result<LogRecord> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.next_id += 1;
        let record = LogRecord {
            id: inner.next_id,
            received_at: Utc::now(),
            payload,
        };
        inner.records.push(record.clone());
        Ok(record)
    }

    fn query(&self, query: &LogQuery) -> Result<Vec<LogRecord>> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        // 插入顺序即时间顺序，倒序遍历得到最新在前；id 单调递增可打破同一时刻的并列
        Ok(inner
            .records
            .iter()
            .rev()
            .filter(|record| query.matches(record))
            .skip(query.offset)
            .take(query.limit)
            .cloned()
            .collect())
    }

    fn delete(&self, ids: &[u64]) -> Result<usize> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let before = inner.records.len();
        inner.records.retain(|record| !ids.contains(&record.id));
        Ok(before - inner.records.len())
    }
}

impl<L: LogStore + ?Sized> LogStore for std::sync::Arc<L> {
    fn store(&self, payload: Value) -> Result<LogRecord> {
        (**self).store(payload)
    }

    fn query(&self, query: &LogQuery) -> Result<Vec<LogRecord>> {
        (**self).query(query)
    }

    fn delete(&self, ids: &[u64]) -> Result<usize> {
        (**self).delete(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn seeded() -> InMemoryLogStore {
        let store = InMemoryLogStore::new();
        store.store(json!({"level": "info", "message": "service started"})).unwrap();
        store.store(json!({"level": "ERROR", "message": "disk full"})).unwrap();
        store.store(json!({"level": "info", "message": "login ok", "user_id": 42})).unwrap();
        store.store(json!({"message": "no level here"})).unwrap();
        store
    }

    #[test]
    fn query_is_newest_first_with_paging() {
        let store = seeded();
        let all = store.query(&LogQuery::default()).unwrap();
        let ids: Vec<u64> = all.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![4, 3, 2, 1]);

        let page = store
            .query(&LogQuery {
                offset: 1,
                limit: 2,
                ..Default::default()
            })
            .unwrap();
        let ids: Vec<u64> = page.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![3, 2]);
    }

    #[test]
    fn query_filters_by_level_and_search() {
        let store = seeded();
        let errors = store
            .query(&LogQuery {
                level: Some("error".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].payload["message"], "disk full");

        let hits = store
            .query(&LogQuery {
                search: Some("LOGIN".into()),
                level: Some("info".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].payload["user_id"], 42);
    }

    #[test]
    fn delete_reports_count() {
        let store = seeded();
        assert_eq!(store.delete(&[1, 3, 99]).unwrap(), 2);
        assert_eq!(store.len(), 2);
        assert_eq!(store.delete(&[1]).unwrap(), 0);
    }

    #[test]
    fn query_parses_with_defaults() {
        let query: LogQuery = serde_json::from_str(r#"{"search":"disk"}"#).unwrap();
        assert_eq!(query.limit, 50);
        assert_eq!(query.offset, 0);
        assert!(query.level.is_none());
    }
}
