pub mod doctor;

use anyhow::{Context, Result};
use bytes::{BufMut, Bytes, BytesMut};
use lit_proto::led::LedFrame;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::{io::AsyncWriteExt, net::TcpStream, sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Deserialize)]
pub struct UplinkConfig {
    #[serde(default)]
    pub enable: bool,
    #[serde(default = "default_endpoint")]
    pub endpoint: String, // tcp://host:port
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_endpoint() -> String { "tcp://127.0.0.1:7070".into() }
fn default_queue_depth() -> usize { 8 }
fn default_connect_timeout_ms() -> u64 { 1000 }

impl Default for UplinkConfig {
    fn default() -> Self {
        Self {
            enable: false,
            endpoint: default_endpoint(),
            queue_depth: default_queue_depth(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkHealth {
    pub rtt_ms: Option<u32>,
    pub quality: u8,           // 0-100
    pub consecutive_failures: u32,
}

impl Default for LinkHealth {
    fn default() -> Self {
        Self {
            rtt_ms: None,
            quality: 100,
            consecutive_failures: 0,
        }
    }
}

/// `tcp://host:port` to `host:port`.
pub fn parse_endpoint(endpoint: &str) -> Result<String> {
    let ep = endpoint.strip_prefix("tcp://").context("endpoint must start with tcp://")?;
    let (host, port) = ep.rsplit_once(':').context("missing port")?;
    anyhow::ensure!(!host.is_empty(), "missing host");
    port.parse::<u16>().with_context(|| format!("invalid port: {}", port))?;
    Ok(ep.to_string())
}

/// Wire framing: u32 big-endian length + JSON body.
pub fn encode_frame(frame: &LedFrame) -> Result<Bytes> {
    let payload = serde_json::to_vec(frame)?;
    let mut buf = BytesMut::with_capacity(4 + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.put_slice(&payload);
    Ok(buf.freeze())
}

/// Persistent connection to the LED controller.
///
/// Frames are never spooled: while the link is down they are dropped, and
/// reconnects back off with the failure count.
pub struct Uplink {
    addr: String,
    connect_timeout: Duration,
    stream: Option<TcpStream>,
    retry_at: Option<Instant>,
    health: LinkHealth,
}

impl Uplink {
    pub fn new(cfg: &UplinkConfig) -> Result<Self> {
        Ok(Self {
            addr: parse_endpoint(&cfg.endpoint)?,
            connect_timeout: Duration::from_millis(cfg.connect_timeout_ms),
            stream: None,
            retry_at: None,
            health: LinkHealth::default(),
        })
    }

    pub fn link_health(&self) -> &LinkHealth {
        &self.health
    }

    /// Reconnect delay after `consecutive_failures`: 250ms doubling up to 4s.
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(250u64 << self.health.consecutive_failures.saturating_sub(1).min(4))
    }

    /// Sends one frame, connecting first if needed. Returns `Ok(false)` when
    /// the frame was dropped because a reconnect is not due yet.
    pub async fn send_frame(&mut self, frame: &LedFrame) -> Result<bool> {
        if self.stream.is_none() {
            if let Some(at) = self.retry_at {
                if Instant::now() < at {
                    return Ok(false);
                }
            }
        }
        let start = Instant::now();
        let blob = encode_frame(frame)?;

        let result = async {
            if self.stream.is_none() {
                let tcp = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.addr))
                    .await
                    .with_context(|| format!("connect {} timed out", self.addr))?
                    .with_context(|| format!("connect {}", self.addr))?;
                tcp.set_nodelay(true)?;
                info!("uplink: connected to {}", self.addr);
                self.stream = Some(tcp);
            }
            let stream = self.stream.as_mut().context("no uplink stream")?;
            stream.write_all(&blob).await?;
            stream.flush().await?;
            Ok::<(), anyhow::Error>(())
        }
        .await;

        match result {
            Ok(()) => {
                let rtt = start.elapsed().as_millis() as u32;
                self.health.rtt_ms = Some(rtt);
                self.health.consecutive_failures = 0;
                self.health.quality = (self.health.quality + 10).min(100);
                self.retry_at = None;
                debug!("uplink: sent {} bytes ({}ms, quality: {}%)", blob.len(), rtt, self.health.quality);
                Ok(true)
            }
            Err(e) => {
                self.stream = None;
                self.health.consecutive_failures += 1;
                self.health.quality = self.health.quality.saturating_sub(20);
                self.retry_at = Some(Instant::now() + self.backoff());
                warn!(
                    "uplink: send failed (failures: {}, quality: {}%): {:#}",
                    self.health.consecutive_failures, self.health.quality, e
                );
                Err(e)
            }
        }
    }
}

/// Spawns the forwarding task. It drains the queue until every sender is
/// dropped and returns the final link health.
pub fn spawn(cfg: &UplinkConfig) -> Result<(mpsc::Sender<LedFrame>, JoinHandle<LinkHealth>)> {
    let mut uplink = Uplink::new(cfg)?;
    let (tx, mut rx) = mpsc::channel::<LedFrame>(cfg.queue_depth.max(1));
    let handle = tokio::spawn(async move {
        let mut dropped = 0u64;
        while let Some(frame) = rx.recv().await {
            match uplink.send_frame(&frame).await {
                Ok(true) => {}
                Ok(false) | Err(_) => dropped += 1,
            }
        }
        info!("uplink: queue closed ({} frames dropped)", dropped);
        uplink.health
    });
    Ok((tx, handle))
}
