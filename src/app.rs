//! Process-wide application root.
//!
//! Owns the stores, the fetcher and the dispatcher, and is handed to the
//! scheduler and command adapter explicitly.

use crate::commands;
use crate::config::{self, Config};
use crate::data::UserId;
use crate::integrations::archipelago::ArchipelagoFetcher;
use crate::integrations::discord::DiscordMessenger;
use crate::integrations::{self, Messenger, RemoteStateFetcher};
use crate::notify::NotificationDispatcher;
use crate::store::{JsonFileStorage, SubscriptionStore, TrackerStateStore};
use anyhow::{Context, Result};
use std::sync::Arc;

pub struct Application {
    config: Config,
    subscriptions: SubscriptionStore,
    states: TrackerStateStore,
    fetcher: Arc<dyn RemoteStateFetcher>,
    dispatcher: NotificationDispatcher,
}

impl Application {
    /// Assemble an application from already-built parts.
    ///
    /// Legacy username-keyed tracker state is matched to subscriptions here.
    pub async fn new(
        config: Config,
        subscriptions: SubscriptionStore,
        states: TrackerStateStore,
        fetcher: Arc<dyn RemoteStateFetcher>,
        messenger: Arc<dyn Messenger>,
    ) -> Self {
        let snapshot = subscriptions.list_all().await;
        let adopted = states.adopt_legacy(&snapshot).await;
        if adopted > 0 {
            if let Err(e) = states.persist().await {
                tracing::error!("Failed to persist migrated tracker state: {}", e);
            }
        }

        let dispatcher = NotificationDispatcher::new(messenger, config.notifications.min_interval());

        Self {
            config,
            subscriptions,
            states,
            fetcher,
            dispatcher,
        }
    }

    /// Build the production wiring: JSON files, Archipelago over HTTP and
    /// Discord. Fails if no messaging token is configured.
    pub async fn from_config(config: Config) -> Result<Self> {
        let token = config::resolve_token(&config)?;

        let subscriptions = open_subscriptions(&config)?;

        let state_path = config.storage.state_path()?;
        let states = TrackerStateStore::open(Box::new(JsonFileStorage::new(&state_path)))
            .with_context(|| format!("Failed to load tracker state from {}", state_path.display()))?;

        let client = integrations::http_client(config.polling.fetch_timeout())?;
        let fetcher = Arc::new(ArchipelagoFetcher::new(
            client.clone(),
            config.tracker.base_url.clone(),
        ));
        let messenger = Arc::new(DiscordMessenger::new(
            client,
            token,
            config.discord.api_base.clone(),
        ));

        Ok(Self::new(config, subscriptions, states, fetcher, messenger).await)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn subscriptions(&self) -> &SubscriptionStore {
        &self.subscriptions
    }

    pub fn states(&self) -> &TrackerStateStore {
        &self.states
    }

    pub fn fetcher(&self) -> &dyn RemoteStateFetcher {
        self.fetcher.as_ref()
    }

    pub fn dispatcher(&self) -> &NotificationDispatcher {
        &self.dispatcher
    }

    /// Run one chat line through the command adapter
    pub async fn handle_command(&self, user_id: UserId, username: &str, line: &str) -> Option<String> {
        commands::handle_line(&self.subscriptions, user_id, username, line).await
    }
}

/// Open the file-backed subscription store named by `config`
pub fn open_subscriptions(config: &Config) -> Result<SubscriptionStore> {
    let path = config.storage.subscriptions_path()?;
    SubscriptionStore::open(Box::new(JsonFileStorage::new(&path)))
        .with_context(|| format!("Failed to load subscriptions from {}", path.display()))
}
