use crate::{Error, Result};
use std::sync::Arc;
use tokio::sync::watch;

/// Host capabilities the library cannot work without.
///
/// In a browser embedding these mirror the presence of
/// `RTCPeerConnection`, `WebSocket` and `getUserMedia`; native embedders
/// normally leave them all enabled.
#[derive(Debug, Clone, Copy)]
pub struct Features {
    pub webrtc: bool,
    pub websocket: bool,
    pub get_user_media: bool,
}

impl Default for Features {
    fn default() -> Self {
        Features {
            webrtc: true,
            websocket: true,
            get_user_media: true,
        }
    }
}

struct EnvInner {
    features: Features,
    online: watch::Sender<bool>,
    visible: watch::Sender<bool>,
}

/// Read side of the host environment: the feature probe plus the
/// online/offline and page-visibility signals the recovery engine gates on.
///
/// The embedder feeds the signals through an [`EnvironmentController`];
/// every consumer observes them as `watch` channels.
#[derive(Clone)]
pub struct Environment {
    inner: Arc<EnvInner>,
}

/// Write side handed to the embedder (browser glue, tests).
#[derive(Clone)]
pub struct EnvironmentController {
    inner: Arc<EnvInner>,
}

impl Environment {
    /// Environment that is always online and visible, with every feature
    /// present. Suitable for native embeddings without lifecycle signals.
    pub fn always_on() -> Environment {
        let (env, _controller) = Environment::with_signals(Features::default());
        env
    }

    pub fn with_signals(features: Features) -> (Environment, EnvironmentController) {
        let (online, _) = watch::channel(true);
        let (visible, _) = watch::channel(true);
        let inner = Arc::new(EnvInner {
            features,
            online,
            visible,
        });
        (
            Environment {
                inner: inner.clone(),
            },
            EnvironmentController { inner },
        )
    }

    /// Fail fast when a required host feature is missing.
    pub fn ensure_supported(&self) -> Result<()> {
        let features = &self.inner.features;
        if !features.websocket {
            return Err(Error::FeatureUnsupported("WebSocket".to_string()));
        }
        if !features.webrtc {
            return Err(Error::FeatureUnsupported("WebRTC".to_string()));
        }
        if !features.get_user_media {
            return Err(Error::FeatureUnsupported("getUserMedia".to_string()));
        }
        Ok(())
    }

    pub fn is_online(&self) -> bool {
        *self.inner.online.subscribe().borrow()
    }

    pub fn is_visible(&self) -> bool {
        *self.inner.visible.subscribe().borrow()
    }

    pub fn online_signal(&self) -> watch::Receiver<bool> {
        self.inner.online.subscribe()
    }

    pub fn visibility_signal(&self) -> watch::Receiver<bool> {
        self.inner.visible.subscribe()
    }
}

impl EnvironmentController {
    pub fn set_online(&self, online: bool) {
        self.inner.online.send_replace(online);
    }

    pub fn set_visible(&self, visible: bool) {
        self.inner.visible.send_replace(visible);
    }
}
