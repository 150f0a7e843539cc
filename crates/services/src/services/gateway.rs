//! HTTP client for the ledgerline API.
//!
//! One request per call, no retries, no caching. Deciding what to do about
//! a failure is the coordinator's job.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use models::{
    AuthSession, Client as ClientRecord, ClientDraft, LoginRequest, RegisterRequest, ServerStatus,
    SyncRequest, SyncResponse, Transaction, TransactionDraft,
};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use super::config::Config;

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("network error: {0}")]
    Transport(String),
    #[error("timeout")]
    Timeout,
    #[error("authentication rejected")]
    Unauthorized,
    #[error("record not found on the server")]
    NotFound,
    #[error("http {status}: {message}")]
    Http { status: u16, message: String },
    #[error("bad response body: {0}")]
    Decode(String),
}

impl GatewayError {
    /// True for failures that should clear up on their own once the server
    /// is reachable again. Deliberate rejections are not in this class.
    pub fn is_connectivity(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout => true,
            Self::Http { status, .. } => (500..=599).contains(status),
            _ => false,
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }

    /// The HTTP status this failure carried, if it got as far as a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Unauthorized => Some(401),
            Self::NotFound => Some(404),
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// The remote surface the coordinator works against. Production uses
/// [`ApiClient`]; tests drive the coordinator with their own implementation.
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    fn set_token(&self, token: Option<SecretString>);

    async fn login(&self, email: &str, password: &str) -> Result<AuthSession, GatewayError>;
    async fn register(&self, request: &RegisterRequest) -> Result<AuthSession, GatewayError>;

    async fn fetch_transactions(&self) -> Result<Vec<Transaction>, GatewayError>;
    async fn create_transaction(
        &self,
        draft: &TransactionDraft,
    ) -> Result<Transaction, GatewayError>;
    async fn update_transaction(
        &self,
        id: Uuid,
        draft: &TransactionDraft,
    ) -> Result<Transaction, GatewayError>;
    async fn delete_transaction(&self, id: Uuid) -> Result<(), GatewayError>;

    async fn fetch_clients(&self) -> Result<Vec<ClientRecord>, GatewayError>;
    async fn create_client(&self, draft: &ClientDraft) -> Result<ClientRecord, GatewayError>;
    async fn update_client(
        &self,
        id: Uuid,
        draft: &ClientDraft,
    ) -> Result<ClientRecord, GatewayError>;
    async fn delete_client(&self, id: Uuid) -> Result<(), GatewayError>;

    async fn sync(&self, snapshot: &SyncRequest) -> Result<SyncResponse, GatewayError>;
    async fn status(&self) -> Result<ServerStatus, GatewayError>;

    /// Point-in-time connectivity probe; any failure means "not online".
    async fn is_online(&self) -> bool {
        match self.status().await {
            Ok(status) => status.is_online(),
            Err(err) => {
                debug!(%err, "status probe failed");
                false
            }
        }
    }
}

/// Error body the server sends with non-2xx responses.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    token: Arc<RwLock<Option<SecretString>>>,
}

impl ApiClient {
    const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    pub fn new(config: &Config) -> Result<Self, GatewayError> {
        Self::with_timeout(&config.api_base_url, config.request_timeout)
    }

    pub fn with_base_url(base_url: &str) -> Result<Self, GatewayError> {
        Self::with_timeout(base_url, Self::DEFAULT_TIMEOUT)
    }

    fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, GatewayError> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("ledgerline/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: Arc::new(RwLock::new(None)),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut req = self.http.request(method, format!("{}{}", self.base_url, path));
        if let Ok(token) = self.token.read() {
            if let Some(token) = token.as_ref() {
                req = req.bearer_auth(token.expose_secret());
            }
        }
        req
    }

    async fn dispatch<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, GatewayError> {
        let res = req.send().await.map_err(map_reqwest_error)?;
        if res.status().is_success() {
            res.json::<T>()
                .await
                .map_err(|e| GatewayError::Decode(e.to_string()))
        } else {
            Err(response_error(res).await)
        }
    }

    /// Like [`Self::dispatch`] for endpoints that answer 204.
    async fn dispatch_no_content(&self, req: RequestBuilder) -> Result<(), GatewayError> {
        let res = req.send().await.map_err(map_reqwest_error)?;
        if res.status().is_success() {
            Ok(())
        } else {
            Err(response_error(res).await)
        }
    }
}

async fn response_error(res: reqwest::Response) -> GatewayError {
    match res.status() {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => GatewayError::Unauthorized,
        StatusCode::NOT_FOUND => GatewayError::NotFound,
        s => {
            let status = s.as_u16();
            let message = error_message(res.text().await.unwrap_or_default());
            warn!(status, %message, "server rejected request");
            GatewayError::Http { status, message }
        }
    }
}

#[async_trait]
impl RemoteGateway for ApiClient {
    fn set_token(&self, token: Option<SecretString>) {
        if let Ok(mut slot) = self.token.write() {
            *slot = token;
        }
    }

    async fn login(&self, email: &str, password: &str) -> Result<AuthSession, GatewayError> {
        let body = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        self.dispatch(self.request(Method::POST, "/api/auth/login").json(&body))
            .await
    }

    async fn register(&self, request: &RegisterRequest) -> Result<AuthSession, GatewayError> {
        self.dispatch(self.request(Method::POST, "/api/auth/register").json(request))
            .await
    }

    async fn fetch_transactions(&self) -> Result<Vec<Transaction>, GatewayError> {
        self.dispatch(self.request(Method::GET, "/api/transactions"))
            .await
    }

    async fn create_transaction(
        &self,
        draft: &TransactionDraft,
    ) -> Result<Transaction, GatewayError> {
        self.dispatch(self.request(Method::POST, "/api/transactions").json(draft))
            .await
    }

    async fn update_transaction(
        &self,
        id: Uuid,
        draft: &TransactionDraft,
    ) -> Result<Transaction, GatewayError> {
        self.dispatch(
            self.request(Method::PUT, &format!("/api/transactions/{id}"))
                .json(draft),
        )
        .await
    }

    async fn delete_transaction(&self, id: Uuid) -> Result<(), GatewayError> {
        self.dispatch_no_content(self.request(Method::DELETE, &format!("/api/transactions/{id}")))
            .await
    }

    async fn fetch_clients(&self) -> Result<Vec<ClientRecord>, GatewayError> {
        self.dispatch(self.request(Method::GET, "/api/clients")).await
    }

    async fn create_client(&self, draft: &ClientDraft) -> Result<ClientRecord, GatewayError> {
        self.dispatch(self.request(Method::POST, "/api/clients").json(draft))
            .await
    }

    async fn update_client(
        &self,
        id: Uuid,
        draft: &ClientDraft,
    ) -> Result<ClientRecord, GatewayError> {
        self.dispatch(
            self.request(Method::PUT, &format!("/api/clients/{id}"))
                .json(draft),
        )
        .await
    }

    async fn delete_client(&self, id: Uuid) -> Result<(), GatewayError> {
        self.dispatch_no_content(self.request(Method::DELETE, &format!("/api/clients/{id}")))
            .await
    }

    async fn sync(&self, snapshot: &SyncRequest) -> Result<SyncResponse, GatewayError> {
        self.dispatch(self.request(Method::POST, "/api/sync").json(snapshot))
            .await
    }

    async fn status(&self) -> Result<ServerStatus, GatewayError> {
        self.dispatch(self.request(Method::GET, "/api/status")).await
    }
}

fn map_reqwest_error(e: reqwest::Error) -> GatewayError {
    if e.is_timeout() {
        GatewayError::Timeout
    } else {
        GatewayError::Transport(e.to_string())
    }
}

/// Pulls the message out of an `{"error": …}` body, falling back to the raw
/// text for anything else.
fn error_message(body: String) -> String {
    match serde_json::from_str::<ErrorBody>(&body) {
        Ok(parsed) => parsed.error,
        Err(_) => body,
    }
}
