//! Server-to-client notification channel.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use geode_core::protocol::{decode_reply, MessageType, Reply};
use geode_core::ServerLocation;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::connection::Connection;

/// Receives the pushes read from a subscription channel.
#[async_trait]
pub trait NotificationHandler: Send + Sync {
    /// Called for every decoded push, in arrival order.
    async fn on_notification(&self, server: &ServerLocation, notification: Reply);

    /// Called once when the channel stops reading, unless it was stopped
    /// locally.
    async fn on_channel_closed(&self, server: &ServerLocation) {
        let _ = server;
    }
}

impl std::fmt::Debug for dyn NotificationHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("NotificationHandler")
    }
}

/// A task reading pushes from one subscription connection.
pub struct SubscriptionChannel {
    server: ServerLocation,
    stop_tx: watch::Sender<Option<bool>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for SubscriptionChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionChannel")
            .field("server", &self.server)
            .field("running", &self.is_running())
            .finish()
    }
}

impl SubscriptionChannel {
    /// Starts reading pushes from `connection` and handing them to `handler`.
    pub fn spawn(mut connection: Connection, handler: Arc<dyn NotificationHandler>) -> Self {
        let server = connection.server().clone();
        let (stop_tx, mut stop_rx) = watch::channel(None);
        let address = server.clone();

        let task = tokio::spawn(async move {
            tracing::debug!(address = %address, "subscription channel started");
            let keep_alive = loop {
                tokio::select! {
                    received = connection.receive() => {
                        match received {
                            Ok(Some(message)) => {
                                match decode_reply(MessageType::ClientNotification, &message) {
                                    Ok(Reply::Ignored(kind)) => {
                                        tracing::trace!(address = %address, kind = kind.name(), "ignored push");
                                    }
                                    Ok(reply) => handler.on_notification(&address, reply).await,
                                    Err(e) => {
                                        tracing::warn!(
                                            address = %address,
                                            error = %e,
                                            "dropping undecodable notification"
                                        );
                                    }
                                }
                            }
                            Ok(None) => {
                                tracing::info!(address = %address, "server closed subscription channel");
                                handler.on_channel_closed(&address).await;
                                return;
                            }
                            Err(e) => {
                                tracing::warn!(
                                    address = %address,
                                    error = %e,
                                    "subscription channel failed"
                                );
                                handler.on_channel_closed(&address).await;
                                return;
                            }
                        }
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() {
                            break false;
                        }
                        if let Some(keep_alive) = *stop_rx.borrow() {
                            break keep_alive;
                        }
                    }
                }
            };
            connection.close(keep_alive, false).await;
            tracing::debug!(address = %address, "subscription channel stopped");
        });

        Self {
            server,
            stop_tx,
            task: Mutex::new(Some(task)),
        }
    }

    /// Returns the server this channel reads from.
    pub fn server(&self) -> &ServerLocation {
        &self.server
    }

    /// Returns true while the reading task is alive.
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    /// Stops reading and closes the connection, asking the server to keep
    /// a durable queue when `keep_alive` is set.
    pub async fn stop(&self, keep_alive: bool) {
        let _ = self.stop_tx.send(Some(keep_alive));
        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}
