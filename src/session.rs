//! Per-login client session.
//!
//! Owns the connection manager, channel registry, notification store and
//! execution monitor for one authenticated user. Built at login, dropped at
//! logout; dropping it disconnects.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::time::Instant;

use crate::auth::{AuthFallbackResolver, AuthPolicy, HttpTokenRefresher, TokenRefresher};
use crate::channel::{ChannelRegistry, SubscriptionHandle};
use crate::config::Settings;
use crate::connection::{
    ConnectionManager, ConnectionState, Connector, ObserverHandle, StateChange, WebSocketConnector,
};
use crate::error::{ClientError, Result};
use crate::execution::{ExecutionMonitor, EXECUTION_CHANNEL};
use crate::notification::{
    HttpNotificationSource, NotificationSource, NotificationStore, NotificationSync, SyncReport,
};
use crate::reconnect::{BackoffPolicy, ReconnectionScheduler};

/// Timeout for REST calls (refresh, sync)
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Default)]
struct Downtime {
    connected_once: bool,
    /// Set when a Connected session is lost
    down_since: Option<Instant>,
}

/// Runs a REST sync on the first connect and after long outages
struct SyncTrigger {
    sync: RwLock<Option<Arc<NotificationSync>>>,
    after: Duration,
    downtime: Mutex<Downtime>,
}

impl SyncTrigger {
    fn on_state_change(&self, change: &StateChange) {
        let due = {
            let mut downtime = self.downtime.lock();
            if change.state == ConnectionState::Connected {
                let due = match downtime.down_since.take() {
                    Some(since) => since.elapsed() >= self.after,
                    None => !downtime.connected_once,
                };
                downtime.connected_once = true;
                due
            } else {
                if downtime.connected_once && downtime.down_since.is_none() {
                    downtime.down_since = Some(Instant::now());
                }
                false
            }
        };

        if !due {
            return;
        }
        let Some(sync) = self.sync.read().clone() else {
            return;
        };
        match Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    // Failures are logged and counted by the sync itself
                    let _ = sync.run().await;
                });
            }
            Err(_) => tracing::debug!("No runtime, notification sync skipped"),
        }
    }
}

pub struct ClientSession {
    manager: Arc<ConnectionManager>,
    registry: Arc<ChannelRegistry>,
    notifications: Arc<NotificationStore>,
    executions: Arc<ExecutionMonitor>,
    trigger: Arc<SyncTrigger>,
    observer: ObserverHandle,
    internal: Vec<SubscriptionHandle>,
}

impl ClientSession {
    /// Session over WebSocket with HTTP refresh and sync as configured
    pub fn new(settings: &Settings) -> Result<Self> {
        let connector = Arc::new(WebSocketConnector::new(
            settings.server.url.clone(),
            settings.connection.outbound_buffer,
        ));

        let refresher = match (&settings.auth.refresh_url, &settings.auth.refresh_token) {
            (Some(url), Some(token)) => Some(Arc::new(HttpTokenRefresher::new(
                url.clone(),
                token.clone(),
                HTTP_TIMEOUT,
            )?) as Arc<dyn TokenRefresher>),
            _ => None,
        };

        let session = Self::with_connector(settings, connector, refresher);

        if let Some(url) = &settings.notifications.sync_url {
            let source = HttpNotificationSource::new(
                url,
                session.manager.resolver().clone(),
                HTTP_TIMEOUT,
            )?;
            session.set_notification_source(Arc::new(source));
        }

        Ok(session)
    }

    /// Session over any transport; used for tests and custom transports
    pub fn with_connector(
        settings: &Settings,
        connector: Arc<dyn Connector>,
        refresher: Option<Arc<dyn TokenRefresher>>,
    ) -> Self {
        let resolver = Arc::new(AuthFallbackResolver::new(
            AuthPolicy {
                allow_guest_mode: settings.auth.allow_guest_mode,
            },
            settings.auth.token.clone(),
            refresher,
        ));
        let scheduler = ReconnectionScheduler::new(BackoffPolicy::from(&settings.reconnect));

        let manager = ConnectionManager::new(
            connector,
            resolver,
            scheduler,
            settings.connection.clone(),
        );
        let registry = ChannelRegistry::new(manager.clone());

        let notifications = NotificationStore::new(settings.notifications.capacity);
        let executions = ExecutionMonitor::new();
        let internal = vec![
            notifications.attach(&registry),
            executions.attach(&registry, EXECUTION_CHANNEL),
        ];

        let trigger = Arc::new(SyncTrigger {
            sync: RwLock::new(None),
            after: Duration::from_secs(settings.notifications.sync_after_downtime_secs),
            downtime: Mutex::new(Downtime::default()),
        });
        let weak = Arc::downgrade(&trigger);
        let observer = manager.on_state_change(move |change| {
            if let Some(trigger) = weak.upgrade() {
                trigger.on_state_change(change);
            }
        });

        Self {
            manager,
            registry,
            notifications,
            executions,
            trigger,
            observer,
            internal,
        }
    }

    /// Enable REST sync from `source`
    pub fn set_notification_source(&self, source: Arc<dyn NotificationSource>) {
        let sync = NotificationSync::new(source, self.notifications.clone());
        *self.trigger.sync.write() = Some(Arc::new(sync));
    }

    pub fn connect(&self) -> Result<()> {
        self.manager.connect()
    }

    pub fn disconnect(&self) {
        self.manager.disconnect();
    }

    /// Run a REST sync right away
    pub async fn sync_notifications(&self) -> Result<SyncReport> {
        let sync = self
            .trigger
            .sync
            .read()
            .clone()
            .ok_or_else(|| ClientError::Config("no notification sync endpoint".to_string()))?;
        sync.run().await
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    pub fn notifications(&self) -> &Arc<NotificationStore> {
        &self.notifications
    }

    pub fn executions(&self) -> &Arc<ExecutionMonitor> {
        &self.executions
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        self.observer.remove();
        for handle in self.internal.drain(..) {
            self.registry.unsubscribe(&handle);
        }
        self.manager.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{Credential, TransportLink};
    use async_trait::async_trait;

    struct AlwaysOpen;

    #[async_trait]
    impl Connector for AlwaysOpen {
        async fn open(&self, _credential: &Credential) -> Result<TransportLink> {
            Ok(TransportLink::in_memory(8).0)
        }
    }

    #[test]
    fn test_session_wires_internal_listeners() {
        let session = ClientSession::with_connector(&Settings::default(), Arc::new(AlwaysOpen), None);

        assert_eq!(session.registry().listener_count("notification"), 1);
        assert_eq!(session.registry().listener_count(EXECUTION_CHANNEL), 1);
        assert_eq!(session.notifications().capacity(), 100);
        assert_eq!(session.manager().state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_sync_without_endpoint_is_config_error() {
        let session = ClientSession::with_connector(&Settings::default(), Arc::new(AlwaysOpen), None);
        assert!(matches!(
            session.sync_notifications().await,
            Err(ClientError::Config(_))
        ));
    }

    #[test]
    fn test_new_rejects_invalid_sync_url() {
        let mut settings = Settings::default();
        settings.notifications.sync_url = Some("not a url".to_string());
        assert!(matches!(
            ClientSession::new(&settings),
            Err(ClientError::Config(_))
        ));
    }
}
