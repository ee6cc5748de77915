//! Sign-in lifecycle: wires the REST client, the badge and the relay.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;

use parley_shared::protocol::ServerEvent;
use parley_shared::UserId;

use crate::api::ApiClient;
use crate::config::ClientConfig;
use crate::controller::ChatController;
use crate::error::ClientError;
use crate::notification::NotificationCounter;
use crate::relay::RelayHandle;

pub type LiveController = ChatController<ApiClient, RelayHandle>;

/// What the UI drives after a successful login.
pub struct LoggedIn {
    pub controller: LiveController,
    pub events: mpsc::Receiver<ServerEvent>,
}

pub struct Session {
    api: Arc<ApiClient>,
    counter: NotificationCounter,
    ws_url: String,
    relay: Option<Arc<RelayHandle>>,
    user: Option<UserId>,
}

impl Session {
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        let api = ApiClient::new(config)?;
        api.clear_token();
        Ok(Self {
            api: Arc::new(api),
            counter: NotificationCounter::new(),
            ws_url: config.ws_url.clone(),
            relay: None,
            user: None,
        })
    }

    pub fn counter(&self) -> &NotificationCounter {
        &self.counter
    }

    pub fn user(&self) -> Option<&UserId> {
        self.user.as_ref()
    }

    /// Store the token, seed the badge and the chat list, then connect the
    /// relay. Nothing is kept if any REST step fails.
    pub async fn login(&mut self, token: &str, user: UserId) -> Result<LoggedIn, ClientError> {
        if self.user.is_some() {
            self.logout().await;
        }

        self.api.set_token(token);
        if let Err(e) = self.counter.fetch(self.api.as_ref()).await {
            self.api.clear_token();
            return Err(e);
        }

        let (relay, events) =
            RelayHandle::spawn(self.ws_url.clone(), Some(token), user.clone());
        let relay = Arc::new(relay);
        let mut controller = ChatController::new(
            user.clone(),
            self.api.clone(),
            relay.clone(),
            self.counter.clone(),
        );
        if let Err(e) = controller.refresh_list().await {
            relay.shutdown().await;
            self.counter.reset();
            self.api.clear_token();
            return Err(e);
        }

        info!(user = %user, unread = self.counter.get(), "Logged in");
        self.relay = Some(relay);
        self.user = Some(user);
        Ok(LoggedIn { controller, events })
    }

    /// Reset the badge, forget the token and stop the relay.
    pub async fn logout(&mut self) {
        self.counter.reset();
        self.api.clear_token();
        if let Some(relay) = self.relay.take() {
            relay.shutdown().await;
        }
        if let Some(user) = self.user.take() {
            info!(user = %user, "Logged out");
        }
    }
}
