use crate::config::{DeviceTemplate, MediaConfig};
use crate::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Media flow direction used when fabricating a description. Hold offers
/// `SendOnly`; resuming goes back to `SendRecv`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaDirection {
    SendRecv,
    SendOnly,
    Inactive,
}

/// One raw reading from the peer connection's stats.
#[derive(Debug, Clone, Copy, Default)]
pub struct RtpSample {
    pub jitter_ms: f32,
    /// Fraction of packets lost, `0.0..=1.0`.
    pub packet_loss: f32,
    pub rtt_ms: f32,
}

/// The media plane of one call, the session-description-handler seam.
///
/// A browser embedding backs this with `RTCPeerConnection` +
/// `getUserMedia`; tests back it with stubs. The crate only plumbs
/// descriptions and tracks through it.
#[async_trait]
pub trait MediaSession: Send + Sync {
    /// Fabricate a local description (offer) for the given direction.
    async fn description(&self, direction: MediaDirection) -> Result<Vec<u8>>;
    /// Fabricate an answer to a remote offer.
    async fn answer(&self, remote_offer: &[u8], direction: MediaDirection) -> Result<Vec<u8>>;
    async fn set_remote_description(&self, sdp: &[u8]) -> Result<()>;
    /// Mute by disabling tracks; never renegotiates.
    fn set_input_muted(&self, muted: bool);
    fn set_output_muted(&self, muted: bool);
    /// Retarget capture without renegotiation. An error means the caller
    /// must rebuild the whole media session instead.
    async fn replace_input(&self, device: &DeviceTemplate) -> Result<()>;
    async fn replace_output(&self, device: &DeviceTemplate) -> Result<()>;
    /// Whether the underlying peer connection is still usable; consulted
    /// after transport recovery.
    fn is_alive(&self) -> bool;
    async fn stats(&self) -> Result<RtpSample>;
    async fn close(&self);
}

pub trait MediaSessionFactory: Send + Sync {
    /// Build a media session for one call. `ice_servers` is the
    /// configured STUN/TURN list for the peer connection.
    fn create(&self, template: &MediaConfig, ice_servers: &[String])
        -> Result<Arc<dyn MediaSession>>;
}

struct MediaInner {
    factory: Arc<dyn MediaSessionFactory>,
    ice_servers: Vec<String>,
    template: Mutex<MediaConfig>,
    session: Mutex<Arc<dyn MediaSession>>,
    input_muted: AtomicBool,
    output_muted: AtomicBool,
    closed: AtomicBool,
}

/// Media state owned by exactly one [`crate::Session`] for its whole
/// lifetime: the bound media session, per-direction mute flags and the
/// selected device templates.
#[derive(Clone)]
pub struct SessionMedia {
    inner: Arc<MediaInner>,
}

impl SessionMedia {
    pub(crate) fn new(
        factory: Arc<dyn MediaSessionFactory>,
        template: MediaConfig,
        ice_servers: Vec<String>,
    ) -> Result<SessionMedia> {
        let session = factory.create(&template, &ice_servers)?;
        session.set_input_muted(template.input.muted);
        session.set_output_muted(template.output.muted);
        Ok(SessionMedia {
            inner: Arc::new(MediaInner {
                factory,
                ice_servers,
                input_muted: AtomicBool::new(template.input.muted),
                output_muted: AtomicBool::new(template.output.muted),
                template: Mutex::new(template),
                session: Mutex::new(session),
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub(crate) fn current(&self) -> Arc<dyn MediaSession> {
        self.inner.session.lock().unwrap().clone()
    }

    pub fn input_muted(&self) -> bool {
        self.inner.input_muted.load(Ordering::Relaxed)
    }

    pub fn output_muted(&self) -> bool {
        self.inner.output_muted.load(Ordering::Relaxed)
    }

    pub fn set_input_muted(&self, muted: bool) {
        self.inner.input_muted.store(muted, Ordering::Relaxed);
        self.current().set_input_muted(muted);
    }

    pub fn set_output_muted(&self, muted: bool) {
        self.inner.output_muted.store(muted, Ordering::Relaxed);
        self.current().set_output_muted(muted);
    }

    pub fn input_device(&self) -> Option<String> {
        self.inner.template.lock().unwrap().input.id.clone()
    }

    pub fn output_device(&self) -> Option<String> {
        self.inner.template.lock().unwrap().output.id.clone()
    }

    pub fn is_alive(&self) -> bool {
        !self.inner.closed.load(Ordering::Relaxed) && self.current().is_alive()
    }

    pub(crate) async fn try_replace_input(&self, device: DeviceTemplate) -> Result<()> {
        self.current().replace_input(&device).await?;
        self.inner.template.lock().unwrap().input = device;
        Ok(())
    }

    pub(crate) async fn try_replace_output(&self, device: DeviceTemplate) -> Result<()> {
        self.current().replace_output(&device).await?;
        self.inner.template.lock().unwrap().output = device;
        Ok(())
    }

    pub(crate) fn remember_input(&self, device: DeviceTemplate) {
        self.inner.template.lock().unwrap().input = device;
    }

    /// Swap in a fresh media session built from the current template,
    /// closing the old one in the background.
    pub(crate) fn rebuild(&self) -> Result<Arc<dyn MediaSession>> {
        let template = self.inner.template.lock().unwrap().clone();
        let fresh = self
            .inner
            .factory
            .create(&template, &self.inner.ice_servers)?;
        fresh.set_input_muted(self.input_muted());
        fresh.set_output_muted(self.output_muted());
        let old = {
            let mut session = self.inner.session.lock().unwrap();
            std::mem::replace(&mut *session, fresh.clone())
        };
        debug!("media session rebuilt");
        tokio::spawn(async move { old.close().await });
        Ok(fresh)
    }

    /// Idempotent; stops every track exactly once.
    pub(crate) async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.current().close().await;
    }
}

impl Drop for MediaInner {
    fn drop(&mut self) {
        // Last line of the scoped-release discipline: a session dropped
        // without a terminal event still stops its tracks.
        if !self.closed.swap(true, Ordering::SeqCst) {
            let session = self.session.lock().unwrap().clone();
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move { session.close().await });
            }
        }
    }
}
