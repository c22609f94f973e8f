use crate::config::ClientOptions;
use crate::environment::Environment;
use crate::session::{parse_target_uri, MediaDirection, MediaSessionFactory, Session, SessionMedia};
use crate::stack::SipUserAgentFactory;
use crate::transport::{
    ClientStatus, ReconnectableTransport, TransportNotice, TransportNoticeReceiver,
};
use crate::useragent::{CallHandle, UserAgentFactory};
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

struct ClientInner {
    options: Arc<ClientOptions>,
    environment: Environment,
    transport: ReconnectableTransport,
    media_factory: Arc<dyn MediaSessionFactory>,
    sessions: Mutex<HashMap<String, Session>>,
    session_tx: broadcast::Sender<Session>,
    reaper_tx: UnboundedSender<String>,
}

/// The softphone: connect, place and receive calls, observe status.
///
/// Construction wires the real stack binding and an always-on
/// environment; [`Client::with_parts`] swaps any collaborator, which is
/// also how the tests drive the lifecycle with stub user agents.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Must be called from within a tokio runtime.
    pub fn new(options: ClientOptions, media_factory: Arc<dyn MediaSessionFactory>) -> Client {
        Client::with_parts(
            options,
            Arc::new(SipUserAgentFactory),
            media_factory,
            Environment::always_on(),
        )
    }

    pub fn with_parts(
        options: ClientOptions,
        ua_factory: Arc<dyn UserAgentFactory>,
        media_factory: Arc<dyn MediaSessionFactory>,
        environment: Environment,
    ) -> Client {
        let options = Arc::new(options);
        let (transport, notices) =
            ReconnectableTransport::new(options.clone(), ua_factory, environment.clone());
        let (reaper_tx, reaper_rx) = unbounded_channel();
        let (session_tx, _) = broadcast::channel(16);

        let inner = Arc::new(ClientInner {
            options,
            environment,
            transport,
            media_factory,
            sessions: Mutex::new(HashMap::new()),
            session_tx,
            reaper_tx,
        });

        tokio::spawn(ClientInner::pump(inner.clone(), notices, reaper_rx));
        Client { inner }
    }

    /// Probe the environment, then bring the transport up. See the
    /// transport's `connect` for the single-flight semantics.
    pub async fn connect(&self) -> Result<bool> {
        self.inner.environment.ensure_supported()?;
        self.inner.transport.connect().await
    }

    /// Graceful teardown; unregisters first when this client registered.
    pub async fn disconnect(&self) {
        let has_registered = self.inner.transport.has_registered();
        self.disconnect_with(has_registered).await
    }

    pub async fn disconnect_with(&self, has_registered: bool) {
        self.inner.transport.disconnect(has_registered).await
    }

    /// Place a call. Allowed only while `Connected`.
    pub async fn invite(&self, target: &str) -> Result<Session> {
        if self.status() != ClientStatus::Connected {
            return Err(Error::NotConnected);
        }
        let uri = parse_target_uri(target)?;
        let media = SessionMedia::new(
            self.inner.media_factory.clone(),
            self.inner.options.media.clone(),
            self.inner.options.transport.ice_servers.clone(),
        )?;
        let offer = media.current().description(MediaDirection::SendRecv).await?;
        let handle = self.inner.transport.invite(uri, offer).await?;
        Ok(self.inner.adopt(handle, media))
    }

    pub fn status(&self) -> ClientStatus {
        self.inner.transport.status()
    }

    pub fn status_updates(&self) -> broadcast::Receiver<ClientStatus> {
        self.inner.transport.status_updates()
    }

    /// Fired for every new session, outbound and inbound alike.
    pub fn session_added(&self) -> broadcast::Receiver<Session> {
        self.inner.session_tx.subscribe()
    }

    pub fn sessions(&self) -> Vec<Session> {
        self.inner.sessions.lock().unwrap().values().cloned().collect()
    }

    pub fn session(&self, id: &str) -> Option<Session> {
        self.inner.sessions.lock().unwrap().get(id).cloned()
    }
}

impl ClientInner {
    fn adopt(&self, handle: CallHandle, media: SessionMedia) -> Session {
        let session = Session::new(handle, media, self.reaper_tx.clone());
        self.sessions
            .lock()
            .unwrap()
            .insert(session.id().to_string(), session.clone());
        self.session_tx.send(session.clone()).ok();
        session
    }

    async fn pump(
        inner: Arc<ClientInner>,
        mut notices: TransportNoticeReceiver,
        mut reaper: UnboundedReceiver<String>,
    ) {
        loop {
            tokio::select! {
                notice = notices.recv() => match notice {
                    Some(TransportNotice::Invite(handle)) => inner.on_invite(handle),
                    Some(TransportNotice::Recovered) => inner.audit_sessions(false).await,
                    Some(TransportNotice::RecoveryFailed) => inner.audit_sessions(true).await,
                    None => return,
                },
                reaped = reaper.recv() => match reaped {
                    Some(id) => {
                        debug!(id = %id, "session reaped");
                        inner.sessions.lock().unwrap().remove(&id);
                    }
                    None => return,
                },
            }
        }
    }

    fn on_invite(&self, handle: CallHandle) {
        info!(id = %handle.call_id, from = %handle.remote_identity, "inbound session");
        let media = match SessionMedia::new(
            self.media_factory.clone(),
            self.options.media.clone(),
            self.options.transport.ice_servers.clone(),
        ) {
            Ok(media) => media,
            Err(e) => {
                warn!("cannot build media for inbound call: {}", e);
                let control = handle.control.clone();
                tokio::spawn(async move {
                    control.reject(true).await.ok();
                });
                return;
            }
        };
        self.adopt(handle, media);
    }

    /// After recovery, keep only the sessions whose media survived the
    /// transport drop; terminate the rest as abandoned. When recovery
    /// gave up there is nothing to keep.
    async fn audit_sessions(&self, drop_all: bool) {
        let sessions = self.sessions.lock().unwrap().values().cloned().collect::<Vec<_>>();
        for session in sessions {
            if drop_all || !session.media().is_alive() {
                info!(id = %session.id(), "abandoning session after recovery");
                session.abandon().await;
                self.sessions.lock().unwrap().remove(&session.id().to_string());
            }
        }
    }
}
