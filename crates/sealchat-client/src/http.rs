//! [`Directory`] over HTTP/JSON with reqwest.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header::HeaderMap, header::HeaderValue, Client, Method, RequestBuilder, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use url::Url;

use sealchat_core::types::{
    AddParticipantRequest, AuthResponse, ChallengeRequest, ChallengeResponse,
    ConversationListResponse, ConversationResponse, CreateConversationRequest, MessageRecord,
    PublicKeyResponse, RegisterRequest, RotateSessionKeyRequest, SendMessageRequest,
    SendMessageResponse, VerifyRequest,
};
use sealchat_core::{ConversationId, TransportError};

use crate::transport::{AccessToken, Directory};

#[derive(Debug, Clone)]
pub struct HttpDirectory {
    base: Url,
    client: Client,
}

impl HttpDirectory {
    pub fn new(base: &Url, timeout: Duration) -> Result<Self, TransportError> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert("Content-Type", HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .default_headers(default_headers)
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Network(e.to_string()))?;

        // Url::join replaces the last path segment unless the base ends in '/'
        let mut base = base.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        Ok(Self { base, client })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> Result<Url, TransportError> {
        self.base
            .join(path.trim_start_matches('/'))
            .map_err(|e| TransportError::Network(format!("invalid endpoint {path}: {e}")))
    }

    fn request(
        &self,
        method: Method,
        path: &str,
        token: Option<&AccessToken>,
    ) -> Result<RequestBuilder, TransportError> {
        let builder = self.client.request(method, self.endpoint(path)?);
        Ok(match token {
            Some(token) => builder.bearer_auth(token.expose()),
            None => builder,
        })
    }

    async fn send(&self, builder: RequestBuilder) -> Result<reqwest::Response, TransportError> {
        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        tracing::debug!(status = status.as_u16(), "directory request rejected");
        Err(map_status(status, body))
    }

    async fn call<B, R>(
        &self,
        method: Method,
        path: &str,
        token: Option<&AccessToken>,
        body: Option<&B>,
    ) -> Result<R, TransportError>
    where
        B: Serialize + ?Sized + Sync,
        R: DeserializeOwned,
    {
        let mut builder = self.request(method, path, token)?;
        if let Some(body) = body {
            builder = builder.json(body);
        }
        let response = self.send(builder).await?;
        response
            .json::<R>()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))
    }

    async fn call_no_content<B>(
        &self,
        method: Method,
        path: &str,
        token: &AccessToken,
        body: &B,
    ) -> Result<(), TransportError>
    where
        B: Serialize + ?Sized + Sync,
    {
        let builder = self.request(method, path, Some(token))?.json(body);
        self.send(builder).await.map(|_| ())
    }
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_decode() {
        TransportError::Decode(err.to_string())
    } else {
        TransportError::Network(err.to_string())
    }
}

fn map_status(status: StatusCode, body: String) -> TransportError {
    if status == StatusCode::UNAUTHORIZED {
        TransportError::Unauthorized
    } else {
        TransportError::Status {
            code: status.as_u16(),
            message: body,
        }
    }
}

#[async_trait]
impl Directory for HttpDirectory {
    async fn register(&self, request: &RegisterRequest) -> Result<AuthResponse, TransportError> {
        self.call(Method::POST, "auth/register", None, Some(request))
            .await
    }

    async fn request_challenge(
        &self,
        request: &ChallengeRequest,
    ) -> Result<ChallengeResponse, TransportError> {
        self.call(Method::POST, "auth/challenge", None, Some(request))
            .await
    }

    async fn verify_challenge(
        &self,
        request: &VerifyRequest,
    ) -> Result<AuthResponse, TransportError> {
        self.call(Method::POST, "auth/verify", None, Some(request))
            .await
    }

    async fn fetch_public_key(
        &self,
        token: &AccessToken,
        username: &str,
    ) -> Result<PublicKeyResponse, TransportError> {
        let mut url = self.endpoint("users")?;
        url.path_segments_mut()
            .map_err(|_| TransportError::Network("base URL cannot carry a path".into()))?
            .push(username)
            .push("public_key");
        let builder = self.client.get(url).bearer_auth(token.expose());
        self.send(builder)
            .await?
            .json()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))
    }

    async fn list_conversations(
        &self,
        token: &AccessToken,
    ) -> Result<ConversationListResponse, TransportError> {
        self.call::<(), _>(Method::GET, "conversations", Some(token), None)
            .await
    }

    async fn create_conversation(
        &self,
        token: &AccessToken,
        request: &CreateConversationRequest,
    ) -> Result<ConversationResponse, TransportError> {
        self.call(Method::POST, "conversations", Some(token), Some(request))
            .await
    }

    async fn add_participant(
        &self,
        token: &AccessToken,
        conversation_id: ConversationId,
        request: &AddParticipantRequest,
    ) -> Result<(), TransportError> {
        let path = format!("conversations/{conversation_id}/participants");
        self.call_no_content(Method::POST, &path, token, request)
            .await
    }

    async fn rotate_session_key(
        &self,
        token: &AccessToken,
        conversation_id: ConversationId,
        request: &RotateSessionKeyRequest,
    ) -> Result<(), TransportError> {
        let path = format!("conversations/{conversation_id}/session_key");
        self.call_no_content(Method::PUT, &path, token, request)
            .await
    }

    async fn send_message(
        &self,
        token: &AccessToken,
        request: &SendMessageRequest,
    ) -> Result<SendMessageResponse, TransportError> {
        self.call(Method::POST, "messages", Some(token), Some(request))
            .await
    }

    async fn fetch_messages(
        &self,
        token: &AccessToken,
        conversation_id: ConversationId,
    ) -> Result<Vec<MessageRecord>, TransportError> {
        let path = format!("conversations/{conversation_id}/messages");
        self.call::<(), _>(Method::GET, &path, Some(token), None)
            .await
    }
}
