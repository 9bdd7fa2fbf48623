//! BootBone firmware: main entry point.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  NvsBackend ─► KvStore (kv-store task)                       │
//! │      │            │                                          │
//! │      │      TransportConfig / ws_uri / ssid+pass             │
//! │      ▼            ▼                                          │
//! │  Station (WiFi STA) ──► Readiness: CONNECTED_TO_AP           │
//! │                                   │                          │
//! │                                   ▼                          │
//! │  Transport<WsConnector> (ws-link task) ◄──► peer             │
//! │      ▲                     │                                 │
//! │   status frames        inbound frames → log                  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use core::time::Duration;

use anyhow::Result;
use log::{info, warn};

use bootbone::adapters::nvs::NvsBackend;
use bootbone::adapters::wifi::{Credentials, Station};
use bootbone::adapters::ws_client::WsConnector;
use bootbone::config::{self, TransportConfig};
use bootbone::kv_store::KvStore;
use bootbone::link::{Envelope, Transport};
use bootbone::readiness::{self, Readiness};

/// How long to wait for the station to get an address per round.
const NETWORK_WAIT: Duration = Duration::from_secs(30);

/// Interval of the application status frame.
const STATUS_INTERVAL: Duration = Duration::from_secs(30);

static READY: Readiness = Readiness::new();

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("BootBone v{} starting", env!("CARGO_PKG_VERSION"));

    // ── 2. Persistence + config ───────────────────────────────
    let kv = KvStore::spawn(NvsBackend::new()?)?;
    let link_cfg = TransportConfig::load_from(&kv);

    let Some(uri) = config::load_uri(&kv) else {
        warn!("No peer URI stored; waiting for provisioning");
        READY.set(readiness::ROLLBACK_TO_AP);
        park_forever();
    };

    // ── 3. Network ────────────────────────────────────────────
    let creds = match Credentials::load(&kv, &READY) {
        Ok(c) => c,
        Err(e) => {
            warn!("WiFi: {}; waiting for provisioning", e);
            READY.set(readiness::ROLLBACK_TO_AP);
            park_forever();
        }
    };

    let peripherals = esp_idf_svc::hal::peripherals::Peripherals::take()?;
    let sysloop = esp_idf_svc::eventloop::EspSystemEventLoop::take()?;
    let mut station = Station::new(peripherals.modem, sysloop)?;
    station.connect(&creds, &READY)?;

    while !READY.wait_all(readiness::CONNECTED_TO_AP, NETWORK_WAIT) {
        warn!("Still waiting for an IP address");
    }

    // ── 4. Uplink ─────────────────────────────────────────────
    let transport: Transport<WsConnector> = Transport::new(WsConnector::new(), link_cfg)?;
    transport.start(&uri)?;

    let started = std::time::Instant::now();
    let mut last_status = started;
    loop {
        if let Some(text) = transport.recv_text(Duration::from_millis(100)) {
            info!("RX: {}", text);
        }

        if last_status.elapsed() >= STATUS_INTERVAL {
            last_status = std::time::Instant::now();
            let stats = transport.stats();
            let status = Envelope::new("status")
                .with("uptime_s", started.elapsed().as_secs())
                .with("wifi", station.is_connected())
                .with("reconnects", stats.connect_attempts)
                .with("dropped", stats.inbound_dropped);
            match status.to_message() {
                Ok(msg) => {
                    if let Err(e) = transport.send(msg) {
                        warn!("status frame not queued: {}", e);
                    }
                }
                Err(e) => warn!("status frame not built: {}", e),
            }
        }
    }
}

fn park_forever() -> ! {
    loop {
        std::thread::sleep(Duration::from_secs(60));
    }
}
