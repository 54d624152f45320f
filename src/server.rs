//! 与 Web 框架无关的服务端处理逻辑。
//!
//! 上传：客户端用服务端公钥加密 → [`TransportServer::ingest`] 解密 → 写入日志存储。
//! 下行：若会话登记过客户端公钥，则按配置的带密钥信封加密给该公钥；否则在低安全模式下
//! 回退到静态密钥信封，并记录警告。
//!
//! HTTP 路由、状态码映射与鉴权不在这里处理。

pub mod store;

pub use self::store::{InMemoryLogStore, LogQuery, LogRecord, LogStore};

use crate::asymmetric::systems::rsa::import_public_key;
use crate::codec::HybridTransportCodec;
use crate::common::config::TransportConfig;
use crate::envelope::{EnvelopeVariant, Payload};
use crate::error::{Error, Result};
use crate::keystore::{CachedKeyStore, KeyStore, PUBLIC_KEY_LABEL, normalize_pem};
use crate::registry::ClientKeyRegistry;
use rsa::RsaPublicKey;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 日志上传路径
pub const LOGS_PATH: &str = "/api/logs";
/// 客户端公钥登记路径
pub const SESSION_KEY_PATH: &str = "/api/session/key";
/// 会话 Cookie 名
pub const SESSION_COOKIE: &str = "log_seal_session";
/// 所有信封的内容类型
pub const OCTET_STREAM: &str = "application/octet-stream";
/// 标明响应所用信封格式的响应头，取值为 `EnvelopeVariant::name()`
pub const ENVELOPE_HEADER: &str = "X-Log-Seal-Envelope";
/// 会话标识的最大长度
pub const MAX_SESSION_ID_LEN: usize = 128;

/// 会话标识只允许 `[A-Za-z0-9_-]`，长度 1 到 `MAX_SESSION_ID_LEN`
pub fn is_valid_session_id(session_id: &str) -> bool {
    !session_id.is_empty()
        && session_id.len() <= MAX_SESSION_ID_LEN
        && session_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// 从 `Cookie` 请求头中取出会话标识
pub fn session_from_cookie(header: &str) -> Option<&str> {
    header
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| name.trim() == SESSION_COOKIE)
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty())
}

/// 生成 `Set-Cookie` 响应头的值
pub fn session_cookie(session_id: &str) -> String {
    format!("{SESSION_COOKIE}={session_id}; Path=/; HttpOnly; SameSite=Strict")
}

/// 一次下行加密的目标
#[derive(Debug, Clone)]
pub enum EncodeTarget {
    /// 会话登记过的客户端公钥
    Client(RsaPublicKey),
    /// 预共享静态密钥（低安全模式）
    Static,
}

/// 加密后的响应体
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedResponse {
    pub body: Vec<u8>,
    pub content_type: &'static str,
    pub variant: EnvelopeVariant,
}

impl EncodedResponse {
    /// `ENVELOPE_HEADER` 响应头的名称和取值
    pub fn envelope_header(&self) -> (&'static str, &'static str) {
        (ENVELOPE_HEADER, self.variant.name())
    }
}

/// 公钥登记的结果
#[derive(Debug, Clone)]
pub struct Registration {
    pub session_id: String,
    /// `Set-Cookie` 头的值
    pub set_cookie: String,
    /// 用客户端新登记的公钥加密的确认消息
    pub ack: EncodedResponse,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationRequest {
    pub client_public_key: String,
}

/// 服务端传输层
pub struct TransportServer<S, R, K> {
    codec: HybridTransportCodec,
    fallback: Option<HybridTransportCodec>,
    keys: CachedKeyStore<K>,
    registry: R,
    store: S,
    rsa_key_bits: usize,
}

impl<S, R, K> TransportServer<S, R, K>
where
    S: LogStore,
    R: ClientKeyRegistry,
    K: KeyStore,
{
    /// 创建服务端。配置先经过校验；密钥在首次使用时才加载。
    pub fn new(config: &TransportConfig, keys: K, registry: R, store: S) -> Result<Self> {
        let codec = HybridTransportCodec::from_config(config)?;
        let fallback = HybridTransportCodec::static_fallback(config)?;
        if fallback.is_some() {
            warn!("low-security mode enabled; responses to unregistered sessions use the static-key envelope");
        }
        Ok(Self {
            codec,
            fallback,
            keys: CachedKeyStore::new(keys),
            registry,
            store,
            rsa_key_bits: config.rsa_key_bits,
        })
    }

    /// 密钥不存在时按配置的位数生成。返回是否生成了新密钥。
    pub fn ensure_keys(&self) -> Result<bool> {
        self.keys.generate_if_absent(self.rsa_key_bits)
    }

    /// 供客户端下载的服务端公钥
    pub fn public_key_pem(&self) -> Result<String> {
        self.keys.get_public_key()
    }

    pub fn codec(&self) -> &HybridTransportCodec {
        &self.codec
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    pub fn log_store(&self) -> &S {
        &self.store
    }

    fn decode_upload(&self, body: &[u8]) -> Result<Payload> {
        let pair = self.keys.key_pair()?;
        self.codec
            .decode(body, Some(pair.private_key()))
            .inspect_err(|e| warn!(kind = ?e.kind(), error = %e, "rejected encrypted upload"))
    }

    /// 解密一条上传的日志并写入存储。解密失败时不会触碰存储。
    pub fn ingest(&self, body: &[u8]) -> Result<LogRecord> {
        let payload = self.decode_upload(body)?;
        self.store_payload(payload)
    }

    /// 批量上传：并行解密，按顺序入库。每条结果独立。
    #[cfg(feature = "parallel")]
    pub fn ingest_batch<B>(&self, bodies: &[B]) -> Result<Vec<Result<LogRecord>>>
    where
        B: AsRef<[u8]> + Sync,
    {
        let pair = self.keys.key_pair()?;
        let decoded = self.codec.par_decode_batch(bodies, Some(pair.private_key()));
        Ok(decoded
            .into_iter()
            .map(|payload| {
                payload
                    .inspect_err(|e| warn!(kind = ?e.kind(), error = %e, "rejected encrypted upload"))
                    .and_then(|payload| self.store_payload(payload))
            })
            .collect())
    }

    fn store_payload(&self, payload: Payload) -> Result<LogRecord> {
        let value = match payload {
            Payload::Json(value @ Value::Object(_)) => value,
            Payload::Json(Value::String(text)) | Payload::Text(text) => json!({ "message": text }),
            Payload::Json(other) => json!({ "message": other }),
        };
        let record = self.store.store(value)?;
        debug!(id = record.id, "ingested log record");
        Ok(record)
    }

    /// 查询日志并为调用方加密结果
    pub fn query(&self, session: Option<&str>, query: &LogQuery) -> Result<EncodedResponse> {
        let records = serde_json::to_value(self.store.query(query)?)?;
        let body = json!({
            "records": records,
            "offset": query.offset,
            "limit": query.limit,
        });
        self.respond(session, &Payload::Json(body))
    }

    /// 删除日志，响应中携带实际删除的条数
    pub fn delete(&self, session: Option<&str>, ids: &[u64]) -> Result<EncodedResponse> {
        let deleted = self.store.delete(ids)?;
        info!(requested = ids.len(), deleted, "deleted log records");
        self.respond(session, &Payload::Json(json!({ "deleted": deleted })))
    }

    /// 登记客户端公钥。
    ///
    /// # 参数
    ///
    /// * `cookie_session` - 请求 Cookie 中已有的会话标识；没有或不合法时生成新的 UUID
    /// * `body` - JSON `{ "clientPublicKey": PEM }`
    ///
    /// 确认消息总是加密给刚登记的公钥，从不使用静态密钥信封。
    pub fn register_client_key(
        &self,
        cookie_session: Option<&str>,
        body: &[u8],
    ) -> Result<Registration> {
        let request: RegistrationRequest = serde_json::from_slice(body)
            .map_err(|e| Error::InvalidInput(format!("invalid registration body: {e}")))?;
        let pem = normalize_pem(&request.client_public_key, PUBLIC_KEY_LABEL)?;
        let public_key = import_public_key(&pem)?;

        let session_id = match cookie_session.map(str::trim) {
            Some(id) if is_valid_session_id(id) => id.to_string(),
            Some(id) => {
                warn!(len = id.len(), "ignoring malformed session cookie");
                Uuid::new_v4().to_string()
            }
            None => Uuid::new_v4().to_string(),
        };
        self.registry.store(&session_id, &pem)?;
        info!(session = %session_id, "registered client public key");

        let ack = json!({ "status": "ok", "sessionId": session_id });
        let body = self.codec.encode(&Payload::Json(ack), Some(&public_key))?;
        Ok(Registration {
            set_cookie: session_cookie(&session_id),
            session_id,
            ack: EncodedResponse {
                body,
                content_type: OCTET_STREAM,
                variant: self.codec.variant(),
            },
        })
    }

    /// 决定下行消息的加密目标。
    ///
    /// 查不到登记（包括与登记并发的查询）时回退到静态密钥，前提是开启了低安全模式。
    pub fn resolve_target(&self, session: Option<&str>) -> Result<EncodeTarget> {
        if let Some(id) = session {
            if let Some(pem) = self.registry.lookup(id) {
                match import_public_key(&pem) {
                    Ok(key) => return Ok(EncodeTarget::Client(key)),
                    Err(e) => warn!(session = id, error = %e, "registered client key is unusable"),
                }
            }
        }

        if self.fallback.is_none() {
            return Err(Error::LowSecurityModeDisabled);
        }
        warn!(
            session = session.unwrap_or("-"),
            "no client key registered; falling back to the static-key envelope"
        );
        Ok(EncodeTarget::Static)
    }

    /// 为会话加密一条响应
    pub fn respond(&self, session: Option<&str>, payload: &Payload) -> Result<EncodedResponse> {
        let (codec, recipient) = match self.resolve_target(session)? {
            EncodeTarget::Client(key) => (&self.codec, Some(key)),
            EncodeTarget::Static => (
                self.fallback.as_ref().ok_or(Error::LowSecurityModeDisabled)?,
                None,
            ),
        };
        let body = codec.encode(payload, recipient.as_ref())?;
        Ok(EncodedResponse {
            body,
            content_type: OCTET_STREAM,
            variant: codec.variant(),
        })
    }
}
