use anyhow::{Context, Result};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;

use crate::{parse_endpoint, UplinkConfig};

pub fn check_config(cfg: &UplinkConfig) -> Result<()> {
    parse_endpoint(&cfg.endpoint).with_context(|| format!("uplink.endpoint: {}", cfg.endpoint))?;
    anyhow::ensure!(cfg.queue_depth >= 1, "uplink.queue_depth must be >= 1");
    anyhow::ensure!(cfg.connect_timeout_ms >= 10, "uplink.connect_timeout_ms too small; set >= 10");
    Ok(())
}

/// Opens and closes one connection to the controller, returning the connect time.
pub async fn probe(cfg: &UplinkConfig) -> Result<Duration> {
    let addr = parse_endpoint(&cfg.endpoint)?;
    let start = Instant::now();
    tokio::time::timeout(Duration::from_millis(cfg.connect_timeout_ms), TcpStream::connect(&addr))
        .await
        .with_context(|| format!("connect {} timed out", addr))?
        .with_context(|| format!("connect {}", addr))?;
    Ok(start.elapsed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn rejects_bad_config() {
        assert!(check_config(&UplinkConfig::default()).is_ok());
        let bad = UplinkConfig { queue_depth: 0, ..UplinkConfig::default() };
        assert!(check_config(&bad).is_err());
        let bad = UplinkConfig { endpoint: "udp://1.2.3.4:9".into(), ..UplinkConfig::default() };
        assert!(check_config(&bad).unwrap_err().to_string().contains("uplink.endpoint"));
    }

    #[tokio::test]
    async fn probe_reaches_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let cfg = UplinkConfig {
            endpoint: format!("tcp://{}", listener.local_addr().unwrap()),
            ..UplinkConfig::default()
        };
        assert!(probe(&cfg).await.is_ok());
    }
}
