use std::time::Duration;

pub const USER_AGENT: &str = "webphone/0.1";

/// Default deadline for the websocket to come up during `connect()`.
pub const DEFAULT_WS_TIMEOUT: Duration = Duration::from_secs(10);

/// Default registration expiry requested from the registrar, in seconds.
pub const DEFAULT_REGISTRATION_EXPIRES: u32 = 600;

/// Registration identity.
#[derive(Debug, Clone)]
pub struct AccountConfig {
    /// Authentication user name.
    pub user: String,
    pub password: String,
    /// Authoritative account URI, e.g. `sip:1000@example.com`.
    pub uri: String,
}

/// Signaling transport settings, immutable after construction.
#[derive(Debug, Clone)]
pub struct TransportSettings {
    /// Ordered list of `wss://` endpoints, tried in order.
    pub ws_servers: Vec<String>,
    pub ws_timeout: Duration,
    /// STUN/TURN servers handed to the media session factory.
    pub ice_servers: Vec<String>,
    pub registration_expires: u32,
}

impl Default for TransportSettings {
    fn default() -> Self {
        TransportSettings {
            ws_servers: vec![],
            ws_timeout: DEFAULT_WS_TIMEOUT,
            ice_servers: vec![],
            registration_expires: DEFAULT_REGISTRATION_EXPIRES,
        }
    }
}

/// Capture or playback device template.
#[derive(Debug, Clone)]
pub struct DeviceTemplate {
    /// Device identifier, `None` selects the platform default.
    pub id: Option<String>,
    pub volume: f32,
    pub muted: bool,
    pub audio_processing: bool,
}

impl Default for DeviceTemplate {
    fn default() -> Self {
        DeviceTemplate {
            id: None,
            volume: 1.0,
            muted: false,
            audio_processing: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MediaConfig {
    pub input: DeviceTemplate,
    pub output: DeviceTemplate,
}

/// Everything a [`crate::Client`] needs to register and place calls.
///
/// Options are immutable once the client is constructed; reconnection
/// attempts always reuse the same options.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub account: AccountConfig,
    pub transport: TransportSettings,
    pub media: MediaConfig,
    /// Value sent as the `User-Agent` header.
    pub user_agent: String,
}

impl ClientOptions {
    pub fn new(account: AccountConfig) -> Self {
        ClientOptions {
            account,
            transport: TransportSettings::default(),
            media: MediaConfig::default(),
            user_agent: USER_AGENT.to_string(),
        }
    }

    pub fn with_ws_server(mut self, server: &str) -> Self {
        self.transport.ws_servers.push(server.to_string());
        self
    }

    pub fn with_ws_timeout(mut self, timeout: Duration) -> Self {
        self.transport.ws_timeout = timeout;
        self
    }

    pub fn with_registration_expires(mut self, seconds: u32) -> Self {
        self.transport.registration_expires = seconds;
        self
    }

    pub fn with_ice_server(mut self, server: &str) -> Self {
        self.transport.ice_servers.push(server.to_string());
        self
    }

    pub fn with_user_agent(mut self, user_agent: &str) -> Self {
        self.user_agent = user_agent.to_string();
        self
    }

    pub fn with_media(mut self, media: MediaConfig) -> Self {
        self.media = media;
        self
    }
}
