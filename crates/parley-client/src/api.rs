//! REST client for the Parley API.

use std::sync::RwLock;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use tracing::debug;

use parley_shared::api::{
    ChatDetail, ChatSummary, CreateChatRequest, ErrorBody, FindOrCreateResponse,
    NotificationCount, PostMessageRequest, ProfileUpdate, ReadChatRequest,
};
use parley_shared::{Chat, ChatId, Message, UserId, UserProfile};

use crate::config::ClientConfig;
use crate::error::ClientError;

/// The chat operations the UI needs from the server.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn list_chats(&self) -> Result<Vec<ChatSummary>, ClientError>;

    /// Fetch a chat. The server acknowledges it for the caller.
    async fn get_chat(&self, chat_id: ChatId) -> Result<ChatDetail, ClientError>;

    async fn create_chat(&self, receiver: &UserId) -> Result<Chat, ClientError>;

    async fn find_or_create_chat(
        &self,
        receiver: &UserId,
    ) -> Result<FindOrCreateResponse, ClientError>;

    async fn mark_seen(&self, chat_id: ChatId) -> Result<Chat, ClientError>;

    async fn post_message(&self, chat_id: ChatId, text: &str) -> Result<Message, ClientError>;

    async fn unread_count(&self) -> Result<u64, ClientError>;

    async fn update_profile(&self, update: &ProfileUpdate) -> Result<UserProfile, ClientError>;
}

pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    token: RwLock<Option<String>>,
}

impl ApiClient {
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            token: RwLock::new(config.token.clone()),
        })
    }

    pub fn set_token(&self, token: impl Into<String>) {
        if let Ok(mut slot) = self.token.write() {
            *slot = Some(token.into());
        }
    }

    pub fn clear_token(&self) {
        if let Ok(mut slot) = self.token.write() {
            *slot = None;
        }
    }

    pub fn has_token(&self) -> bool {
        self.token.read().map(|t| t.is_some()).unwrap_or(false)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, ClientError> {
        let token = self
            .token
            .read()
            .ok()
            .and_then(|t| t.clone())
            .ok_or(ClientError::NotLoggedIn)?;
        Ok(self.http.request(method, self.url(path)).bearer_auth(token))
    }

    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, ClientError> {
        let resp = req.send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp.json::<T>().await?);
        }

        let body = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .map(|b| b.error)
            .unwrap_or(body);
        debug!(status = status.as_u16(), %message, "API call failed");
        Err(ClientError::from_status(status.as_u16(), message))
    }
}

#[async_trait]
impl ChatBackend for ApiClient {
    async fn list_chats(&self) -> Result<Vec<ChatSummary>, ClientError> {
        self.send(self.request(Method::GET, "/chats")?).await
    }

    async fn get_chat(&self, chat_id: ChatId) -> Result<ChatDetail, ClientError> {
        self.send(self.request(Method::GET, &format!("/chats/{chat_id}"))?)
            .await
    }

    async fn create_chat(&self, receiver: &UserId) -> Result<Chat, ClientError> {
        let body = CreateChatRequest {
            receiver_id: receiver.clone(),
        };
        self.send(self.request(Method::POST, "/chats")?.json(&body))
            .await
    }

    async fn find_or_create_chat(
        &self,
        receiver: &UserId,
    ) -> Result<FindOrCreateResponse, ClientError> {
        let body = CreateChatRequest {
            receiver_id: receiver.clone(),
        };
        self.send(self.request(Method::PUT, "/chats")?.json(&body))
            .await
    }

    async fn mark_seen(&self, chat_id: ChatId) -> Result<Chat, ClientError> {
        let body = ReadChatRequest { seen: true };
        self.send(
            self.request(Method::PUT, &format!("/chats/read/{chat_id}"))?
                .json(&body),
        )
        .await
    }

    async fn post_message(&self, chat_id: ChatId, text: &str) -> Result<Message, ClientError> {
        let body = PostMessageRequest {
            text: text.to_string(),
        };
        self.send(
            self.request(Method::POST, &format!("/messages/{chat_id}"))?
                .json(&body),
        )
        .await
    }

    async fn unread_count(&self) -> Result<u64, ClientError> {
        let count: NotificationCount = self
            .send(self.request(Method::GET, "/user/notification")?)
            .await?;
        Ok(count.count)
    }

    async fn update_profile(&self, update: &ProfileUpdate) -> Result<UserProfile, ClientError> {
        self.send(self.request(Method::PUT, "/user/profile")?.json(update))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(token: Option<&str>) -> ApiClient {
        let config = ClientConfig {
            api_url: "http://127.0.0.1:1/api/".into(),
            token: token.map(str::to_string),
            ..ClientConfig::default()
        };
        ApiClient::new(&config).unwrap()
    }

    #[test]
    fn urls_are_joined_under_the_prefix() {
        assert_eq!(client(None).url("/chats"), "http://127.0.0.1:1/api/chats");
    }

    #[tokio::test]
    async fn calls_without_token_fail_fast() {
        let api = client(None);
        assert!(matches!(api.list_chats().await, Err(ClientError::NotLoggedIn)));
    }

    #[test]
    fn token_can_be_set_and_cleared() {
        let api = client(None);
        assert!(!api.has_token());
        api.set_token("t");
        assert!(api.has_token());
        api.clear_token();
        assert!(!api.has_token());
    }

    #[tokio::test]
    async fn unreachable_server_is_an_http_error() {
        let api = client(Some("t"));
        assert!(matches!(api.unread_count().await, Err(ClientError::Http(_))));
    }
}
