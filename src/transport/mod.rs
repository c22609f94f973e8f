//! The connection lifecycle engine: owns the client status, the single
//! user agent instance, and the recovery policy that ties them to the
//! host's online/visibility signals.

use crate::backoff::Backoff;
use crate::config::ClientOptions;
use crate::environment::Environment;
use crate::useragent::{
    CallHandle, StackError, UaEventReceiver, UserAgent, UserAgentEvent, UserAgentFactory,
};
use crate::{Error, Result};
use rsip::StatusCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::{broadcast, watch};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[cfg(test)]
mod tests;

/// Client connection status. Only the transitions drawn in the state
/// machine ever happen; every change is emitted on the status stream in
/// order, with consecutive duplicates coalesced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientStatus {
    Disconnected,
    Connecting,
    Connected,
    Recovering,
    Disconnecting,
}

impl std::fmt::Display for ClientStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ClientStatus::Disconnected => "disconnected",
            ClientStatus::Connecting => "connecting",
            ClientStatus::Connected => "connected",
            ClientStatus::Recovering => "recovering",
            ClientStatus::Disconnecting => "disconnecting",
        };
        write!(f, "{}", name)
    }
}

/// Why a connect attempt failed. Cloneable so every waiter on the
/// single-flight connect observes the same outcome.
#[derive(Debug, Clone)]
enum ConnectFailure {
    WsTimeout,
    Cancelled,
    Registration {
        code: Option<StatusCode>,
        cause: String,
    },
    Transport(String),
}

impl ConnectFailure {
    fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConnectFailure::Registration {
                code: Some(
                    StatusCode::Unauthorized
                        | StatusCode::Forbidden
                        | StatusCode::ProxyAuthenticationRequired
                ),
                ..
            }
        )
    }

    fn into_error(self) -> Error {
        match self {
            ConnectFailure::WsTimeout => Error::WsTimeout,
            ConnectFailure::Cancelled => Error::ConnectCancelled,
            ConnectFailure::Registration { code, cause } => {
                if matches!(
                    code,
                    Some(
                        StatusCode::Unauthorized
                            | StatusCode::Forbidden
                            | StatusCode::ProxyAuthenticationRequired
                    )
                ) {
                    Error::AuthRejected(cause)
                } else {
                    Error::Error(format!("registration failed: {}", cause))
                }
            }
            ConnectFailure::Transport(cause) => Error::TransportLost(cause),
        }
    }
}

type ConnectOutcome = std::result::Result<bool, ConnectFailure>;
type RegisteredSignal = Option<std::result::Result<(), StackError>>;

/// Facade-bound notifications that are not status changes.
pub(crate) enum TransportNotice {
    Invite(CallHandle),
    /// Recovery brought a fresh registration up; sessions need auditing.
    Recovered,
    /// Recovery gave up; every session is gone with it.
    RecoveryFailed,
}

pub(crate) type TransportNoticeReceiver = UnboundedReceiver<TransportNotice>;

#[derive(Clone)]
struct ActiveUa {
    ua: Arc<dyn UserAgent>,
    pump_token: CancellationToken,
    transport_open: watch::Receiver<bool>,
    registered: watch::Receiver<RegisteredSignal>,
    unregistered: watch::Receiver<bool>,
}

struct LifecycleState {
    status: ClientStatus,
    flight: Option<watch::Receiver<Option<ConnectOutcome>>>,
}

struct TransportInner {
    options: Arc<ClientOptions>,
    factory: Arc<dyn UserAgentFactory>,
    environment: Environment,
    state: Mutex<LifecycleState>,
    status_tx: broadcast::Sender<ClientStatus>,
    active: Mutex<Option<ActiveUa>>,
    attempt_token: Mutex<Option<CancellationToken>>,
    recovery_token: Mutex<Option<CancellationToken>>,
    refresh_token: Mutex<Option<CancellationToken>>,
    notices: UnboundedSender<TransportNotice>,
    has_registered: AtomicBool,
}

/// Reconnecting SIP transport: one user agent at a time, a single-flight
/// `connect`, and a jittered, environment-gated recovery loop.
#[derive(Clone)]
pub struct ReconnectableTransport {
    inner: Arc<TransportInner>,
}

impl ReconnectableTransport {
    /// Must be called from within a tokio runtime; the environment
    /// watcher task starts immediately.
    pub(crate) fn new(
        options: Arc<ClientOptions>,
        factory: Arc<dyn UserAgentFactory>,
        environment: Environment,
    ) -> (ReconnectableTransport, TransportNoticeReceiver) {
        let (status_tx, _) = broadcast::channel(64);
        let (notice_tx, notice_rx) = unbounded_channel();
        let inner = Arc::new(TransportInner {
            options,
            factory,
            environment,
            state: Mutex::new(LifecycleState {
                status: ClientStatus::Disconnected,
                flight: None,
            }),
            status_tx,
            active: Mutex::new(None),
            attempt_token: Mutex::new(None),
            recovery_token: Mutex::new(None),
            refresh_token: Mutex::new(None),
            notices: notice_tx,
            has_registered: AtomicBool::new(false),
        });

        tokio::spawn(TransportInner::watch_environment(inner.clone()));
        (ReconnectableTransport { inner }, notice_rx)
    }

    pub fn status(&self) -> ClientStatus {
        self.inner.state.lock().unwrap().status
    }

    pub fn status_updates(&self) -> broadcast::Receiver<ClientStatus> {
        self.inner.status_tx.subscribe()
    }

    pub(crate) fn has_registered(&self) -> bool {
        self.inner.has_registered.load(Ordering::Relaxed)
    }

    /// Idempotent, single-flight connect. Resolves `true` once the first
    /// registration after `start()` lands.
    pub async fn connect(&self) -> Result<bool> {
        enum Action {
            Wait(watch::Receiver<Option<ConnectOutcome>>),
            AwaitDisconnected(broadcast::Receiver<ClientStatus>),
            Start(
                CancellationToken,
                watch::Sender<Option<ConnectOutcome>>,
                watch::Receiver<Option<ConnectOutcome>>,
            ),
        }

        loop {
            let action = {
                let mut st = self.inner.state.lock().unwrap();
                match st.status {
                    ClientStatus::Connected => return Ok(true),
                    ClientStatus::Recovering => return Err(Error::Recovering),
                    ClientStatus::Connecting => match st.flight.clone() {
                        Some(rx) => Action::Wait(rx),
                        None => Action::AwaitDisconnected(self.inner.status_tx.subscribe()),
                    },
                    ClientStatus::Disconnecting => {
                        Action::AwaitDisconnected(self.inner.status_tx.subscribe())
                    }
                    ClientStatus::Disconnected => {
                        let (tx, rx) = watch::channel(None);
                        st.flight = Some(rx.clone());
                        // The attempt token exists before the status is
                        // observable, so a disconnect can always cancel.
                        let token = CancellationToken::new();
                        *self.inner.attempt_token.lock().unwrap() = Some(token.clone());
                        self.inner.transition(&mut st, ClientStatus::Connecting);
                        Action::Start(token, tx, rx)
                    }
                }
            };

            match action {
                Action::Wait(rx) => return await_outcome(rx).await,
                Action::AwaitDisconnected(mut sub) => {
                    loop {
                        if self.inner.state.lock().unwrap().status == ClientStatus::Disconnected {
                            break;
                        }
                        match sub.recv().await {
                            Ok(ClientStatus::Disconnected) => break,
                            Ok(_) => continue,
                            Err(_) => break,
                        }
                    }
                    continue;
                }
                Action::Start(token, tx, rx) => {
                    let inner = self.inner.clone();
                    tokio::spawn(
                        async move { TransportInner::run_connect(inner, token, tx).await },
                    );
                    return await_outcome(rx).await;
                }
            }
        }
    }

    /// Graceful teardown. When `unregister` is set, a REGISTER with
    /// expires 0 goes out first and we wait up to the registration expiry
    /// for the confirming event.
    pub async fn disconnect(&self, unregister: bool) {
        enum Action {
            Noop,
            AwaitDisconnected(broadcast::Receiver<ClientStatus>),
            CancelConnect,
            StopRecovery,
            Graceful,
        }

        let action = {
            let mut st = self.inner.state.lock().unwrap();
            match st.status {
                ClientStatus::Disconnected => Action::Noop,
                ClientStatus::Disconnecting => {
                    Action::AwaitDisconnected(self.inner.status_tx.subscribe())
                }
                ClientStatus::Connecting => Action::CancelConnect,
                ClientStatus::Recovering => Action::StopRecovery,
                ClientStatus::Connected => {
                    self.inner.transition(&mut st, ClientStatus::Disconnecting);
                    Action::Graceful
                }
            }
        };

        match action {
            Action::Noop => {}
            Action::AwaitDisconnected(mut sub) => loop {
                if self.inner.state.lock().unwrap().status == ClientStatus::Disconnected {
                    return;
                }
                match sub.recv().await {
                    Ok(ClientStatus::Disconnected) => return,
                    Ok(_) => continue,
                    Err(_) => return,
                }
            },
            Action::CancelConnect => {
                // Cancelling the attempt rejects the pending connect with
                // ConnectCancelled; run_connect finishes the transition.
                let token = self.inner.attempt_token.lock().unwrap().clone();
                if let Some(token) = token {
                    token.cancel();
                }
                let mut sub = self.inner.status_tx.subscribe();
                loop {
                    if self.inner.state.lock().unwrap().status == ClientStatus::Disconnected {
                        break;
                    }
                    match sub.recv().await {
                        Ok(ClientStatus::Disconnected) | Err(_) => break,
                        Ok(_) => continue,
                    }
                }
            }
            Action::StopRecovery => {
                let token = self.inner.recovery_token.lock().unwrap().take();
                if let Some(token) = token {
                    token.cancel();
                }
                self.inner.teardown_ua().await;
                let mut st = self.inner.state.lock().unwrap();
                st.flight = None;
                self.inner.transition(&mut st, ClientStatus::Disconnected);
            }
            Action::Graceful => {
                self.inner.cancel_refresh();
                let active = self.inner.active.lock().unwrap().clone();
                if let Some(active) = active {
                    if unregister && self.has_registered() {
                        self.graceful_unregister(&active).await;
                    }
                }
                self.inner.teardown_ua().await;
                self.inner.has_registered.store(false, Ordering::Relaxed);
                let mut st = self.inner.state.lock().unwrap();
                st.flight = None;
                self.inner.transition(&mut st, ClientStatus::Disconnected);
            }
        }
    }

    async fn graceful_unregister(&self, active: &ActiveUa) {
        if let Err(e) = active.ua.unregister().await {
            info!("unregister error: {}", e);
            return;
        }
        let expires = self.inner.options.transport.registration_expires.max(1);
        let mut unregistered = active.unregistered.clone();
        let confirmed = timeout(Duration::from_secs(expires as u64), async {
            loop {
                if *unregistered.borrow() {
                    return;
                }
                if unregistered.changed().await.is_err() {
                    return;
                }
            }
        })
        .await;
        if confirmed.is_err() {
            info!("unregister was not confirmed before the deadline");
        }
    }

    /// Hand an outbound INVITE to the live user agent.
    pub(crate) async fn invite(&self, target: rsip::Uri, offer: Vec<u8>) -> Result<CallHandle> {
        if self.status() != ClientStatus::Connected {
            return Err(Error::NotConnected);
        }
        let active = self
            .inner
            .active
            .lock()
            .unwrap()
            .clone()
            .ok_or(Error::NotConnected)?;
        active.ua.invite(target, offer).await
    }
}

async fn await_outcome(mut rx: watch::Receiver<Option<ConnectOutcome>>) -> Result<bool> {
    loop {
        let settled = rx.borrow().clone();
        if let Some(outcome) = settled {
            return outcome.map_err(ConnectFailure::into_error);
        }
        if rx.changed().await.is_err() {
            return Err(Error::ConnectCancelled);
        }
    }
}

impl TransportInner {
    fn transition(&self, st: &mut LifecycleState, status: ClientStatus) {
        if st.status == status {
            return;
        }
        debug!(from = %st.status, to = %status, "status update");
        st.status = status;
        self.status_tx.send(status).ok();
    }

    fn status(&self) -> ClientStatus {
        self.state.lock().unwrap().status
    }

    fn build_ua(self: &Arc<Self>) -> Result<ActiveUa> {
        let (ua_tx, ua_rx) = unbounded_channel();
        let ua = self.factory.create(self.options.clone(), ua_tx)?;
        let (open_tx, open_rx) = watch::channel(false);
        let (reg_tx, reg_rx) = watch::channel(None);
        let (unreg_tx, unreg_rx) = watch::channel(false);
        let pump_token = CancellationToken::new();
        let active = ActiveUa {
            ua,
            pump_token: pump_token.clone(),
            transport_open: open_rx,
            registered: reg_rx,
            unregistered: unreg_rx,
        };
        let inner = self.clone();
        tokio::spawn(async move {
            TransportInner::pump_ua(inner, ua_rx, open_tx, reg_tx, unreg_tx, pump_token).await
        });
        Ok(active)
    }

    /// Translate one UA instance's events into barrier signals and
    /// lifecycle reactions.
    async fn pump_ua(
        inner: Arc<TransportInner>,
        mut events: UaEventReceiver,
        open_tx: watch::Sender<bool>,
        reg_tx: watch::Sender<RegisteredSignal>,
        unreg_tx: watch::Sender<bool>,
        token: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                _ = token.cancelled() => return,
                event = events.recv() => event,
            };
            match event {
                Some(UserAgentEvent::TransportCreated) => {
                    open_tx.send_replace(true);
                }
                Some(UserAgentEvent::Registered) => {
                    reg_tx.send_replace(Some(Ok(())));
                }
                Some(UserAgentEvent::RegistrationFailed(e)) => {
                    if inner.status() == ClientStatus::Connected {
                        // A refresh was refused mid-session.
                        if e.is_auth_rejection() {
                            warn!("registration refresh rejected: {}", e);
                            let inner = inner.clone();
                            tokio::spawn(async move { inner.force_disconnect().await });
                        } else {
                            inner.begin_recovery("registration refresh failed");
                        }
                    } else {
                        reg_tx.send_replace(Some(Err(e)));
                    }
                }
                Some(UserAgentEvent::Unregistered) => {
                    unreg_tx.send_replace(true);
                }
                Some(UserAgentEvent::Invite(handle)) => {
                    inner.notices.send(TransportNotice::Invite(handle)).ok();
                }
                Some(UserAgentEvent::Disconnected(e)) => {
                    if inner.status() == ClientStatus::Connected {
                        inner.begin_recovery(&format!("transport lost: {}", e.cause));
                    } else {
                        reg_tx.send_replace(Some(Err(e)));
                    }
                    return;
                }
                None => return,
            }
        }
    }

    async fn run_connect(
        inner: Arc<TransportInner>,
        token: CancellationToken,
        tx: watch::Sender<Option<ConnectOutcome>>,
    ) {
        let result = inner.attempt(&token).await;
        *inner.attempt_token.lock().unwrap() = None;

        match result {
            Ok(()) => {
                inner.has_registered.store(true, Ordering::Relaxed);
                let mut st = inner.state.lock().unwrap();
                st.flight = None;
                inner.transition(&mut st, ClientStatus::Connected);
                drop(st);
                inner.spawn_registration_refresh();
                tx.send(Some(Ok(true))).ok();
            }
            Err(failure) => {
                info!("connect failed: {:?}", failure);
                inner.teardown_ua().await;
                let mut st = inner.state.lock().unwrap();
                st.flight = None;
                inner.transition(&mut st, ClientStatus::Disconnected);
                drop(st);
                tx.send(Some(Err(failure))).ok();
            }
        }
    }

    /// One full bring-up: fresh UA, websocket barrier under `ws_timeout`,
    /// then the registration barrier (the first `registered` event after
    /// `start`).
    async fn attempt(
        self: &Arc<Self>,
        token: &CancellationToken,
    ) -> std::result::Result<(), ConnectFailure> {
        let active = self
            .build_ua()
            .map_err(|e| ConnectFailure::Transport(e.to_string()))?;
        *self.active.lock().unwrap() = Some(active.clone());

        let started = tokio::select! {
            _ = token.cancelled() => return Err(ConnectFailure::Cancelled),
            started = active.ua.start() => started,
        };
        started.map_err(|e| ConnectFailure::Transport(e.to_string()))?;

        // Websocket barrier: a created transport or an early registration
        // disarms the timeout.
        let mut open_rx = active.transport_open.clone();
        let mut reg_rx = active.registered.clone();
        let opened = timeout(self.options.transport.ws_timeout, async {
            loop {
                if *open_rx.borrow() || reg_rx.borrow().is_some() {
                    return true;
                }
                tokio::select! {
                    _ = token.cancelled() => return false,
                    changed = open_rx.changed() => {
                        if changed.is_err() {
                            return false;
                        }
                    }
                    changed = reg_rx.changed() => {
                        if changed.is_err() {
                            return false;
                        }
                    }
                }
            }
        })
        .await;
        match opened {
            Err(_elapsed) => return Err(ConnectFailure::WsTimeout),
            Ok(false) => return Err(ConnectFailure::Cancelled),
            Ok(true) => {}
        }

        let registered = tokio::select! {
            _ = token.cancelled() => return Err(ConnectFailure::Cancelled),
            registered = active.ua.register() => registered,
        };
        if let Err(e) = registered {
            return Err(ConnectFailure::Registration {
                code: None,
                cause: e.to_string(),
            });
        }

        let mut reg_rx = active.registered.clone();
        loop {
            let signal = reg_rx.borrow().clone();
            match signal {
                Some(Ok(())) => return Ok(()),
                Some(Err(e)) => {
                    return Err(ConnectFailure::Registration {
                        code: e.sip_code,
                        cause: e.cause,
                    })
                }
                None => {
                    tokio::select! {
                        _ = token.cancelled() => return Err(ConnectFailure::Cancelled),
                        changed = reg_rx.changed() => {
                            if changed.is_err() {
                                return Err(ConnectFailure::Transport(
                                    "user agent event stream ended".to_string(),
                                ));
                            }
                        }
                    }
                }
            }
        }
    }

    async fn teardown_ua(&self) {
        let active = self.active.lock().unwrap().take();
        if let Some(active) = active {
            active.pump_token.cancel();
            active.ua.stop().await;
        }
        self.cancel_refresh();
    }

    fn cancel_refresh(&self) {
        if let Some(token) = self.refresh_token.lock().unwrap().take() {
            token.cancel();
        }
    }

    /// Fatal teardown from an established connection; still passes
    /// through `Disconnecting` so observers never see a skipped state.
    async fn force_disconnect(self: &Arc<Self>) {
        {
            let mut st = self.state.lock().unwrap();
            if st.status != ClientStatus::Connected {
                return;
            }
            self.transition(&mut st, ClientStatus::Disconnecting);
        }
        self.teardown_ua().await;
        self.has_registered.store(false, Ordering::Relaxed);
        let mut st = self.state.lock().unwrap();
        st.flight = None;
        self.transition(&mut st, ClientStatus::Disconnected);
    }

    fn begin_recovery(self: &Arc<Self>, reason: &str) {
        {
            let mut st = self.state.lock().unwrap();
            if st.status != ClientStatus::Connected {
                return;
            }
            warn!("entering recovery: {}", reason);
            self.transition(&mut st, ClientStatus::Recovering);
        }
        self.cancel_refresh();
        let token = CancellationToken::new();
        *self.recovery_token.lock().unwrap() = Some(token.clone());
        let inner = self.clone();
        tokio::spawn(async move { TransportInner::recover_loop(inner, token).await });
    }

    /// Bounded retry loop: wait out the jittered backoff (woken early by
    /// the page becoming visible, suspended while offline), then rebuild
    /// the UA and re-register. Gives up on terminal auth failures.
    async fn recover_loop(inner: Arc<TransportInner>, token: CancellationToken) {
        let mut backoff = Backoff::default();
        loop {
            // Gate: never attempt while offline.
            let mut online = inner.environment.online_signal();
            loop {
                if *online.borrow() {
                    break;
                }
                tokio::select! {
                    _ = token.cancelled() => return,
                    changed = online.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }

            let delay = backoff.next_delay();
            debug!(attempt = backoff.attempt(), "recovery backoff {:?}", delay);
            if !inner.wait_backoff(delay, &token).await {
                return;
            }

            // Attempt only when both signals allow it.
            let mut online = inner.environment.online_signal();
            let mut visible = inner.environment.visibility_signal();
            loop {
                if token.is_cancelled() {
                    return;
                }
                if *online.borrow() && *visible.borrow() {
                    break;
                }
                tokio::select! {
                    _ = token.cancelled() => return,
                    changed = online.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    changed = visible.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }

            inner.teardown_ua().await;
            match inner.attempt(&token).await {
                Ok(()) => {
                    *inner.recovery_token.lock().unwrap() = None;
                    let mut st = inner.state.lock().unwrap();
                    inner.transition(&mut st, ClientStatus::Connected);
                    drop(st);
                    inner.spawn_registration_refresh();
                    inner.notices.send(TransportNotice::Recovered).ok();
                    info!("recovery succeeded");
                    return;
                }
                Err(failure) if failure.is_terminal() => {
                    warn!("recovery gave up: {:?}", failure);
                    *inner.recovery_token.lock().unwrap() = None;
                    inner.teardown_ua().await;
                    inner.has_registered.store(false, Ordering::Relaxed);
                    let mut st = inner.state.lock().unwrap();
                    st.flight = None;
                    inner.transition(&mut st, ClientStatus::Disconnected);
                    drop(st);
                    inner.notices.send(TransportNotice::RecoveryFailed).ok();
                    return;
                }
                Err(ConnectFailure::Cancelled) => return,
                Err(failure) => {
                    debug!("recovery attempt failed: {:?}", failure);
                }
            }
        }
    }

    /// Sleep out one backoff delay. A visibility edge to `visible` wakes
    /// the sleep to attempt immediately; going offline suspends it until
    /// the network is back, then the delay restarts.
    async fn wait_backoff(&self, delay: Duration, token: &CancellationToken) -> bool {
        let mut online = self.environment.online_signal();
        let mut visible = self.environment.visibility_signal();

        let sleeper = sleep(delay);
        tokio::pin!(sleeper);

        loop {
            tokio::select! {
                _ = token.cancelled() => return false,
                _ = &mut sleeper => return true,
                changed = visible.changed() => {
                    if changed.is_ok() && *visible.borrow() {
                        debug!("backoff woken by visibility");
                        return true;
                    }
                }
                changed = online.changed() => {
                    if changed.is_ok() && !*online.borrow() {
                        loop {
                            if *online.borrow() {
                                break;
                            }
                            tokio::select! {
                                _ = token.cancelled() => return false,
                                changed = online.changed() => {
                                    if changed.is_err() {
                                        return true;
                                    }
                                }
                            }
                        }
                        sleeper.as_mut().set(sleep(delay));
                    }
                }
            }
        }
    }

    fn spawn_registration_refresh(self: &Arc<Self>) {
        self.cancel_refresh();
        let token = CancellationToken::new();
        *self.refresh_token.lock().unwrap() = Some(token.clone());
        let inner = self.clone();
        tokio::spawn(async move {
            let period = Duration::from_secs(
                (inner.options.transport.registration_expires / 2).max(30) as u64,
            );
            loop {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = sleep(period) => {}
                }
                if inner.status() != ClientStatus::Connected {
                    return;
                }
                let active = inner.active.lock().unwrap().clone();
                let Some(active) = active else { return };
                debug!("registration refresh");
                if let Err(e) = active.ua.register().await {
                    warn!("registration refresh error: {}", e);
                    inner.begin_recovery("registration refresh transport error");
                    return;
                }
            }
        });
    }

    /// Going offline while connected arms an immediate recovery pass.
    async fn watch_environment(inner: Arc<TransportInner>) {
        let mut online = inner.environment.online_signal();
        loop {
            if online.changed().await.is_err() {
                return;
            }
            if !*online.borrow() && inner.status() == ClientStatus::Connected {
                inner.begin_recovery("network went offline");
            }
        }
    }
}
