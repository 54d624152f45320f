//! 客户端：用服务端公钥加密日志并上传，登记自己的公钥以接收加密给自己的响应。

use crate::asymmetric::systems::rsa::{RsaKeyPair, import_public_key};
use crate::codec::HybridTransportCodec;
use crate::common::config::TransportConfig;
use crate::envelope::{EnvelopeVariant, Payload};
use crate::error::{Error, Result};
use crate::keystore::{PUBLIC_KEY_LABEL, normalize_pem};
use rsa::RsaPublicKey;
use serde_json::json;
use tracing::debug;

#[cfg(feature = "async")]
use crate::server::{LOGS_PATH, OCTET_STREAM, SESSION_KEY_PATH, session_from_cookie};
#[cfg(feature = "async")]
use async_trait::async_trait;
#[cfg(feature = "async")]
use std::time::Duration;

/// 上传日志时视为成功的状态码
pub const SUCCESS_STATUSES: [u16; 4] = [200, 201, 202, 204];

/// 传输层返回的响应
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Vec<u8>,
    /// `Set-Cookie` 响应头
    pub set_cookie: Option<String>,
    /// `X-Log-Seal-Envelope` 响应头，标明响应体的信封格式
    pub envelope_variant: Option<EnvelopeVariant>,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        SUCCESS_STATUSES.contains(&self.status)
    }
}

/// HTTP 发送接口，由调用方用任意 HTTP 客户端实现
#[cfg(feature = "async")]
#[async_trait]
pub trait LogTransport: Send + Sync {
    async fn post(
        &self,
        path: &str,
        content_type: &str,
        body: Vec<u8>,
        session: Option<&str>,
    ) -> Result<TransportResponse>;
}

/// 混合加密客户端
pub struct TransportClient {
    codec: HybridTransportCodec,
    fallback: Option<HybridTransportCodec>,
    server_key: Option<RsaPublicKey>,
    client_keys: Option<RsaKeyPair>,
    session_id: Option<String>,
}

impl TransportClient {
    pub fn new(config: &TransportConfig) -> Result<Self> {
        Ok(Self {
            codec: HybridTransportCodec::from_config(config)?,
            fallback: HybridTransportCodec::static_fallback(config)?,
            server_key: None,
            client_keys: None,
            session_id: None,
        })
    }

    /// 设置服务端公钥，接受单行或缺少头尾的 PEM
    pub fn set_public_key(&mut self, public_key_pem: &str) -> Result<()> {
        let pem = normalize_pem(public_key_pem, PUBLIC_KEY_LABEL)?;
        self.server_key = Some(import_public_key(&pem)?);
        Ok(())
    }

    pub fn has_server_key(&self) -> bool {
        self.server_key.is_some()
    }

    /// 生成客户端自己的密钥对，用于接收加密给自己的响应
    pub fn generate_client_keys(&mut self, bits: usize) -> Result<()> {
        self.client_keys = Some(RsaKeyPair::generate(bits)?);
        Ok(())
    }

    /// 使用已有的客户端密钥对
    pub fn with_client_keys(mut self, keys: RsaKeyPair) -> Self {
        self.client_keys = Some(keys);
        self
    }

    pub fn client_public_key_pem(&self) -> Result<String> {
        let keys = self
            .client_keys
            .as_ref()
            .ok_or_else(|| Error::KeyUnavailable("no client key pair generated".to_string()))?;
        Ok(keys.public_key_pem()?)
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn set_session_id(&mut self, session_id: impl Into<String>) {
        self.session_id = Some(session_id.into());
    }

    /// 公钥登记请求体 `{"clientPublicKey": PEM}`
    pub fn registration_body(&self) -> Result<Vec<u8>> {
        let pem = self.client_public_key_pem()?;
        Ok(serde_json::to_vec(&json!({ "clientPublicKey": pem }))?)
    }

    /// 用服务端公钥加密载荷
    pub fn encrypt_payload(&self, payload: &Payload) -> Result<Vec<u8>> {
        let server_key = self.server_key.as_ref().ok_or_else(|| {
            Error::KeyUnavailable("server public key not set; call set_public_key first".to_string())
        })?;
        self.codec.encode(payload, Some(server_key))
    }

    /// 按服务端声明的信封格式解密响应。
    ///
    /// 服务端丢失登记（重启、与登记并发的查询）时会改用静态密钥信封，
    /// 所以即便持有自己的密钥对，也要以响应头给出的格式为准。
    pub fn decrypt_response(&self, body: &[u8], variant: EnvelopeVariant) -> Result<Payload> {
        if variant == EnvelopeVariant::StaticKey {
            let fallback = self.fallback.as_ref().ok_or(Error::LowSecurityModeDisabled)?;
            return fallback.decode(body, None);
        }
        if variant != self.codec.variant() {
            return Err(Error::MalformedEnvelope(format!(
                "response uses the {variant} envelope, client is configured for {}",
                self.codec.variant()
            )));
        }
        let keys = self.client_keys.as_ref().ok_or_else(|| {
            Error::KeyUnavailable(
                "response is encrypted for a client key pair this client does not hold".to_string(),
            )
        })?;
        self.codec.decode(body, Some(keys.private_key()))
    }

    /// 加密并上传一条日志
    #[cfg(feature = "async")]
    pub async fn submit_log<T>(&self, transport: &T, payload: &Payload) -> Result<TransportResponse>
    where
        T: LogTransport + ?Sized,
    {
        let body = self.encrypt_payload(payload)?;
        let response = transport
            .post(LOGS_PATH, OCTET_STREAM, body, self.session_id())
            .await?;
        if !response.is_success() {
            return Err(Error::Transport(format!(
                "log submission failed: server responded with status {}",
                response.status
            )));
        }
        debug!(status = response.status, "submitted log");
        Ok(response)
    }

    /// 带超时的上传。编解码本身不会阻塞，超时只约束传输层。
    #[cfg(feature = "async")]
    pub async fn submit_log_with_timeout<T>(
        &self,
        transport: &T,
        payload: &Payload,
        timeout: Duration,
    ) -> Result<TransportResponse>
    where
        T: LogTransport + ?Sized,
    {
        tokio::time::timeout(timeout, self.submit_log(transport, payload))
            .await
            .map_err(|_| Error::Transport(format!("log submission timed out after {timeout:?}")))?
    }

    /// 向服务端登记客户端公钥，记录返回的会话标识并解密确认消息
    #[cfg(feature = "async")]
    pub async fn register<T>(&mut self, transport: &T) -> Result<Payload>
    where
        T: LogTransport + ?Sized,
    {
        let body = self.registration_body()?;
        let response = transport
            .post(SESSION_KEY_PATH, "application/json", body, self.session_id())
            .await?;
        if !response.is_success() {
            return Err(Error::Transport(format!(
                "key registration failed: server responded with status {}",
                response.status
            )));
        }
        if let Some(session) = response.set_cookie.as_deref().and_then(session_from_cookie) {
            self.session_id = Some(session.to_string());
        }
        debug!(session = self.session_id().unwrap_or("-"), "registered client key");
        let variant = response.envelope_variant.unwrap_or(self.codec.variant());
        self.decrypt_response(&response.body, variant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asymmetric::systems::rsa::tests::{other_keys, shared_keys};
    use crate::error::ErrorKind;

    #[test]
    fn encrypt_requires_server_key() {
        let client = TransportClient::new(&TransportConfig::default()).unwrap();
        let err = client.encrypt_payload(&Payload::from("x")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::KeyUnavailable);
        assert_eq!(client.registration_body().unwrap_err().kind(), ErrorKind::KeyUnavailable);
    }

    #[test]
    fn set_public_key_validates_and_normalizes() {
        let mut client = TransportClient::new(&TransportConfig::default()).unwrap();
        assert!(client.set_public_key("not a key").is_err());
        assert!(!client.has_server_key());

        let single_line = shared_keys().public_key_pem().unwrap().replace('\n', "");
        client.set_public_key(&single_line).unwrap();
        assert!(client.has_server_key());

        let body = client.encrypt_payload(&Payload::from("hello")).unwrap();
        let codec = HybridTransportCodec::from_config(&TransportConfig::default()).unwrap();
        assert_eq!(
            codec.decode(&body, Some(shared_keys().private_key())).unwrap(),
            Payload::from("hello")
        );
    }

    #[test]
    fn registration_body_carries_client_key() {
        let client = TransportClient::new(&TransportConfig::default())
            .unwrap()
            .with_client_keys(other_keys().clone());
        let body: serde_json::Value =
            serde_json::from_slice(&client.registration_body().unwrap()).unwrap();
        assert_eq!(
            body["clientPublicKey"].as_str().unwrap(),
            other_keys().public_key_pem().unwrap()
        );
    }

    #[test]
    fn static_key_response_needs_low_security_mode() {
        let client = TransportClient::new(&TransportConfig::default())
            .unwrap()
            .with_client_keys(other_keys().clone());
        let err = client
            .decrypt_response(&[0u8; 32], EnvelopeVariant::StaticKey)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LowSecurityModeDisabled);
    }

    #[test]
    fn keyed_response_needs_client_keys() {
        let client = TransportClient::new(&TransportConfig::default()).unwrap();
        let err = client
            .decrypt_response(&[0u8; 300], EnvelopeVariant::Versioned)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::KeyUnavailable);
    }

    #[test]
    fn client_with_keys_reads_static_key_responses() {
        let config = TransportConfig::default().with_low_security_mode("shared");
        let client = TransportClient::new(&config)
            .unwrap()
            .with_client_keys(other_keys().clone());

        let server_fallback = HybridTransportCodec::new(EnvelopeVariant::StaticKey, &config).unwrap();
        let body = server_fallback.encode(&Payload::from("after restart"), None).unwrap();
        assert_eq!(
            client.decrypt_response(&body, EnvelopeVariant::StaticKey).unwrap(),
            Payload::from("after restart")
        );

        let keyed = HybridTransportCodec::from_config(&config).unwrap();
        let body = keyed
            .encode(&Payload::from("for my key"), Some(other_keys().public_key()))
            .unwrap();
        assert_eq!(
            client.decrypt_response(&body, EnvelopeVariant::Versioned).unwrap(),
            Payload::from("for my key")
        );
        let err = client.decrypt_response(&body, EnvelopeVariant::Fixed).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedEnvelope);
    }

    #[test]
    fn success_statuses() {
        for status in [200, 201, 202, 204] {
            assert!(TransportResponse { status, ..Default::default() }.is_success());
        }
        assert!(!TransportResponse { status: 400, ..Default::default() }.is_success());
    }
}
