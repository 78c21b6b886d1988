//! Minimal runnable example: discovers a trainer, connects, prints
//! telemetry as it arrives, and drives the liveness probe on a timer.
//!
//! Run with: `cargo run --example monitor -- [host] [port]`

use std::env;
use std::time::Duration;

use tokio_stream::StreamExt;
use wahoo_wftnp::wftnp::discovery;
use wahoo_wftnp::{SessionConfig, WahooSession};

#[tokio::main]
async fn main() {
    env_logger::init();

    let mut args = env::args().skip(1);
    let (host, port) = match args.next() {
        Some(host) => {
            let port = args
                .next()
                .and_then(|p| p.parse().ok())
                .unwrap_or(wahoo_wftnp::config::DEFAULT_PORT);
            (host, port)
        }
        None => {
            log::info!("no host given, browsing mDNS for a trainer...");
            let found = discovery::discover().await;
            match found.into_iter().next() {
                Some(device) => {
                    log::info!("found {} at {}:{}", device.name, device.address, device.port);
                    (device.address, device.port)
                }
                None => {
                    eprintln!("no trainer found; pass a host and port explicitly");
                    std::process::exit(1);
                }
            }
        }
    };

    let session = WahooSession::new(host, port, SessionConfig::default());
    session.connect().await.expect("failed to connect");

    let mut telemetry = session.subscribe();
    let session_for_ticks = session.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(10));
        loop {
            ticker.tick().await;
            if let Err(e) = session_for_ticks.tick().await {
                log::warn!("liveness tick reported: {e}");
            }
        }
    });

    while let Some(snapshot) = telemetry.next().await {
        println!("{:?} last_seen={}", snapshot.metrics, snapshot.last_seen);
    }
}
