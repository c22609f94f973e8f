//! Lifecycle engine tests, driven by a scriptable stub user agent.

use crate::config::{AccountConfig, ClientOptions};
use crate::transport::ClientStatus;
use crate::useragent::{
    CallHandle, StackError, StackErrorKind, UaEventSender, UserAgent, UserAgentEvent,
    UserAgentFactory,
};
use crate::Result;
use async_trait::async_trait;
use rsip::StatusCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;


/// What the stub does when `register()` is called.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum RegisterScript {
    /// Emit `registered` right away.
    Accept,
    /// Emit `registrationFailed` with the given status.
    Refuse(StatusCode),
    /// Emit nothing; the barrier has to be resolved some other way.
    Silent,
}

pub(super) struct MockUserAgent {
    events: UaEventSender,
    open_transport: bool,
    register_script: RegisterScript,
    counters: Arc<Counters>,
}

#[derive(Default)]
pub(super) struct Counters {
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    pub registers: AtomicUsize,
    pub unregisters: AtomicUsize,
}

#[async_trait]
impl UserAgent for MockUserAgent {
    async fn start(&self) -> Result<()> {
        self.counters.starts.fetch_add(1, Ordering::SeqCst);
        if self.open_transport {
            self.events.send(UserAgentEvent::TransportCreated).ok();
        }
        Ok(())
    }

    async fn stop(&self) {
        self.counters.stops.fetch_add(1, Ordering::SeqCst);
    }

    async fn register(&self) -> Result<()> {
        self.counters.registers.fetch_add(1, Ordering::SeqCst);
        match &self.register_script {
            RegisterScript::Accept => {
                self.events.send(UserAgentEvent::Registered).ok();
            }
            RegisterScript::Refuse(code) => {
                self.events
                    .send(UserAgentEvent::RegistrationFailed(StackError::with_code(
                        StackErrorKind::Registration,
                        "refused by script",
                        code.clone(),
                    )))
                    .ok();
            }
            RegisterScript::Silent => {}
        }
        Ok(())
    }

    async fn unregister(&self) -> Result<()> {
        self.counters.unregisters.fetch_add(1, Ordering::SeqCst);
        self.events.send(UserAgentEvent::Unregistered).ok();
        Ok(())
    }

    async fn invite(&self, _target: rsip::Uri, _offer: Vec<u8>) -> Result<CallHandle> {
        unimplemented!("transport tests never place calls")
    }
}

pub(super) struct MockFactory {
    pub open_transport: Mutex<bool>,
    pub register_script: Mutex<RegisterScript>,
    pub counters: Arc<Counters>,
    pub created: AtomicUsize,
    /// Event sender of the most recently created agent, for injecting
    /// transport drops and inbound invites from tests.
    pub last_events: Mutex<Option<UaEventSender>>,
}

impl MockFactory {
    pub fn new(open_transport: bool, register_script: RegisterScript) -> Arc<MockFactory> {
        Arc::new(MockFactory {
            open_transport: Mutex::new(open_transport),
            register_script: Mutex::new(register_script),
            counters: Arc::new(Counters::default()),
            created: AtomicUsize::new(0),
            last_events: Mutex::new(None),
        })
    }

    pub fn script(&self, script: RegisterScript) {
        *self.register_script.lock().unwrap() = script;
    }

    pub fn drop_transport(&self) {
        let events = self.last_events.lock().unwrap().clone();
        events
            .expect("no agent created yet")
            .send(UserAgentEvent::Disconnected(StackError::new(
                StackErrorKind::Transport,
                "dropped by script",
            )))
            .ok();
    }
}

impl UserAgentFactory for MockFactory {
    fn create(
        &self,
        _options: Arc<ClientOptions>,
        events: UaEventSender,
    ) -> Result<Arc<dyn UserAgent>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        *self.last_events.lock().unwrap() = Some(events.clone());
        Ok(Arc::new(MockUserAgent {
            events,
            open_transport: *self.open_transport.lock().unwrap(),
            register_script: self.register_script.lock().unwrap().clone(),
            counters: self.counters.clone(),
        }))
    }
}

pub(super) fn test_options() -> ClientOptions {
    ClientOptions::new(AccountConfig {
        user: "1000".to_string(),
        password: "secret".to_string(),
        uri: "sip:1000@example.com".to_string(),
    })
    .with_ws_server("wss://sip.example.com")
    .with_ws_timeout(Duration::from_millis(200))
    .with_registration_expires(600)
}

/// Let spawned tasks make progress on the current-thread test runtime.
pub(super) async fn breathe() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

pub(super) fn drain(rx: &mut broadcast::Receiver<ClientStatus>) -> Vec<ClientStatus> {
    let mut seen = vec![];
    while let Ok(status) = rx.try_recv() {
        seen.push(status);
    }
    seen
}
