//! WiFi station bring-up.
//!
//! Joins the access point whose credentials provisioning stored in the
//! key-value store (`ssid` / `pass`) and reports progress through the
//! [`Readiness`] bits the firmware waits on before starting the uplink.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: `esp_idf_svc::wifi::BlockingWifi` station.
//! - **all other targets**: credential loading and validation only; the
//!   host network is assumed to be up.

use core::fmt;
use log::{info, warn};

use crate::kv_store::{KvError, KvStore};
use crate::readiness::{self, Readiness};

/// Key of the stored station SSID.
pub const SSID_KEY: &str = "ssid";
/// Key of the stored station password.
pub const PASS_KEY: &str = "pass";

/// Association attempts before falling back to provisioning.
pub const MAX_RETRY: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialError {
    NoCredentials,
    InvalidSsid,
    InvalidPassword,
    /// The store could not be read; the credentials are unknown.
    Storage(KvError),
}

impl fmt::Display for CredentialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoCredentials => write!(f, "no WiFi credentials stored"),
            Self::InvalidSsid => write!(f, "SSID invalid (must be 1-32 printable ASCII bytes)"),
            Self::InvalidPassword => write!(f, "password invalid (must be 8-64 bytes, or empty for open)"),
            Self::Storage(e) => write!(f, "credential read failed: {}", e),
        }
    }
}

/// Station credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub ssid: heapless::String<32>,
    pub password: heapless::String<64>,
}

fn is_printable_ascii(s: &str) -> bool {
    s.bytes().all(|b| (0x20..=0x7E).contains(&b))
}

impl Credentials {
    pub fn new(ssid: &str, password: &str) -> Result<Self, CredentialError> {
        if ssid.is_empty() || ssid.len() > 32 || !is_printable_ascii(ssid) {
            return Err(CredentialError::InvalidSsid);
        }
        if !password.is_empty() && !(8..=64).contains(&password.len()) {
            return Err(CredentialError::InvalidPassword);
        }
        Ok(Self {
            ssid: ssid.try_into().map_err(|_| CredentialError::InvalidSsid)?,
            password: password
                .try_into()
                .map_err(|_| CredentialError::InvalidPassword)?,
        })
    }

    pub fn is_open(&self) -> bool {
        self.password.is_empty()
    }

    /// Stored credentials. Sets [`readiness::PROVISIONED`] when found.
    pub fn load(kv: &KvStore, ready: &Readiness) -> Result<Self, CredentialError> {
        let ssid = match kv.get_str(SSID_KEY) {
            Ok(s) => s,
            Err(KvError::NotFound) => return Err(CredentialError::NoCredentials),
            Err(e) => {
                warn!("WiFi: credential read failed ({})", e);
                return Err(CredentialError::NoCredentials);
            }
        };
        // Only a missing key means an open network.
        let password = match kv.get_str(PASS_KEY) {
            Ok(p) => p,
            Err(KvError::NotFound) => String::new(),
            Err(e) => {
                warn!("WiFi: password read failed ({})", e);
                return Err(CredentialError::Storage(e));
            }
        };
        let creds = Self::new(&ssid, &password)?;
        ready.set(readiness::PROVISIONED);
        info!("WiFi: credentials loaded (SSID='{}')", creds.ssid);
        Ok(creds)
    }

    pub fn store(&self, kv: &KvStore) -> Result<(), KvError> {
        kv.set_str(SSID_KEY, &self.ssid)?;
        kv.set_str(PASS_KEY, &self.password)
    }
}

/// Delay before association retry `attempt` (1-based).
pub fn retry_delay(attempt: u32) -> core::time::Duration {
    core::time::Duration::from_millis(500 + u64::from(attempt) * 200)
}

// ───────────────────────────────────────────────────────────────
// ESP-IDF station
// ───────────────────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
pub use esp_station::Station;

#[cfg(target_os = "espidf")]
mod esp_station {
    use super::{Credentials, MAX_RETRY, retry_delay};
    use crate::readiness::{self, Readiness};
    use esp_idf_svc::eventloop::EspSystemEventLoop;
    use esp_idf_svc::hal::modem::Modem;
    use esp_idf_svc::wifi::{AuthMethod, BlockingWifi, ClientConfiguration, Configuration, EspWifi};
    use log::{info, warn};

    /// Owns the WiFi driver for the life of the firmware.
    pub struct Station {
        wifi: BlockingWifi<EspWifi<'static>>,
    }

    impl Station {
        pub fn new(modem: Modem, sysloop: EspSystemEventLoop) -> anyhow::Result<Self> {
            let wifi = BlockingWifi::wrap(EspWifi::new(modem, sysloop.clone(), None)?, sysloop)?;
            Ok(Self { wifi })
        }

        /// Join the AP, retrying up to [`MAX_RETRY`] times. On success
        /// `CONNECTED_TO_AP` is set; on exhaustion `ROLLBACK_TO_AP`.
        pub fn connect(&mut self, creds: &Credentials, ready: &Readiness) -> anyhow::Result<()> {
            let auth_method = if creds.is_open() {
                AuthMethod::None
            } else {
                AuthMethod::WPA2Personal
            };
            self.wifi.set_configuration(&Configuration::Client(ClientConfiguration {
                ssid: creds.ssid.clone(),
                password: creds.password.clone(),
                auth_method,
                ..Default::default()
            }))?;
            self.wifi.start()?;
            ready.set(readiness::STA_MODE | readiness::WAIT_ON_CONN);
            info!("WiFi(espidf): connecting to '{}'", creds.ssid);

            let mut attempt = 0;
            loop {
                match self.wifi.connect().and_then(|()| self.wifi.wait_netif_up()) {
                    Ok(()) => break,
                    Err(e) if attempt < MAX_RETRY => {
                        attempt += 1;
                        warn!("WiFi(espidf): attempt {} failed ({:?}), retrying", attempt, e);
                        std::thread::sleep(retry_delay(attempt));
                    }
                    Err(e) => {
                        ready.clear(readiness::WAIT_ON_CONN);
                        ready.set(readiness::ROLLBACK_TO_AP);
                        return Err(e.into());
                    }
                }
            }

            ready.clear(readiness::WAIT_ON_CONN);
            ready.set(readiness::CONNECTED_TO_AP);
            info!("WiFi(espidf): got IP address");
            Ok(())
        }

        pub fn is_connected(&self) -> bool {
            self.wifi.is_connected().unwrap_or(false)
        }
    }
}
