use super::media::{MediaSession, RtpSample};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const STATS_INTERVAL: Duration = Duration::from_secs(5);

/// Samples folded into the running window; at 5 s apiece this is one
/// minute of history.
const WINDOW: usize = 12;

/// Windowed quality estimate for one call.
#[derive(Debug, Clone, Copy, Default)]
pub struct QualityStats {
    /// Bounded MOS-like score, `1.0..=4.5`.
    pub mos: f32,
    pub jitter_ms: f32,
    pub packet_loss: f32,
    pub rtt_ms: f32,
    pub samples: u32,
}

struct StatsInner {
    window: Mutex<VecDeque<RtpSample>>,
    latest: Mutex<Option<QualityStats>>,
    updates: broadcast::Sender<QualityStats>,
    sampler: Mutex<Option<CancellationToken>>,
}

/// Periodic stats sampler for one session. Armed when a media session is
/// bound, re-armed on rebuild, cancelled on the terminal event.
#[derive(Clone)]
pub struct SessionStats {
    inner: Arc<StatsInner>,
}

impl SessionStats {
    pub(crate) fn new() -> SessionStats {
        let (updates, _) = broadcast::channel(16);
        SessionStats {
            inner: Arc::new(StatsInner {
                window: Mutex::new(VecDeque::with_capacity(WINDOW)),
                latest: Mutex::new(None),
                updates,
                sampler: Mutex::new(None),
            }),
        }
    }

    /// Latest folded estimate, `None` before the first sample lands.
    pub fn current(&self) -> Option<QualityStats> {
        *self.inner.latest.lock().unwrap()
    }

    pub fn updates(&self) -> broadcast::Receiver<QualityStats> {
        self.inner.updates.subscribe()
    }

    pub(crate) fn arm(&self, media: Arc<dyn MediaSession>) {
        self.cancel();
        let token = CancellationToken::new();
        *self.inner.sampler.lock().unwrap() = Some(token.clone());
        self.inner.window.lock().unwrap().clear();

        let inner = self.inner.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(STATS_INTERVAL);
            // The first tick fires immediately; the first sample belongs
            // a full interval in.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = ticker.tick() => {}
                }
                match media.stats().await {
                    Ok(sample) => {
                        let quality = {
                            let mut window = inner.window.lock().unwrap();
                            fold(&mut window, sample)
                        };
                        *inner.latest.lock().unwrap() = Some(quality);
                        inner.updates.send(quality).ok();
                    }
                    Err(e) => debug!("stats sample failed: {}", e),
                }
            }
        });
    }

    pub(crate) fn cancel(&self) {
        if let Some(token) = self.inner.sampler.lock().unwrap().take() {
            token.cancel();
        }
    }
}

fn fold(window: &mut VecDeque<RtpSample>, sample: RtpSample) -> QualityStats {
    if window.len() == WINDOW {
        window.pop_front();
    }
    window.push_back(sample);

    let n = window.len() as f32;
    let jitter_ms = window.iter().map(|s| s.jitter_ms).sum::<f32>() / n;
    let packet_loss = window.iter().map(|s| s.packet_loss).sum::<f32>() / n;
    let rtt_ms = window.iter().map(|s| s.rtt_ms).sum::<f32>() / n;

    QualityStats {
        mos: mos_score(jitter_ms, packet_loss, rtt_ms),
        jitter_ms,
        packet_loss,
        rtt_ms,
        samples: window.len() as u32,
    }
}

/// E-model style estimate: an R-factor degraded by effective latency and
/// loss, mapped onto a bounded MOS scale.
pub fn mos_score(jitter_ms: f32, packet_loss: f32, rtt_ms: f32) -> f32 {
    let effective_latency = rtt_ms / 2.0 + 2.0 * jitter_ms + 10.0;
    let mut r = if effective_latency < 160.0 {
        93.2 - effective_latency / 40.0
    } else {
        93.2 - (effective_latency - 120.0) / 10.0
    };
    r -= 2.5 * (packet_loss * 100.0);
    let r = r.clamp(0.0, 100.0);
    let mos = 1.0 + 0.035 * r + 0.000_007 * r * (r - 60.0) * (100.0 - r);
    mos.clamp(1.0, 4.5)
}
