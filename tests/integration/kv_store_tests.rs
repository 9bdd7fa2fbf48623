//! Persistence integration tests: `KvStore` over the host `NvsBackend`,
//! with the config, URI and credential helpers layered on top.

use bootbone::adapters::nvs::NvsBackend;
use bootbone::adapters::wifi::{CredentialError, Credentials};
use bootbone::config::{self, CONFIG_KEY, TransportConfig};
use bootbone::kv_store::{KvError, KvStore};
use bootbone::readiness::{self, Readiness};
use std::sync::Arc;

fn store() -> KvStore {
    KvStore::spawn(NvsBackend::new().unwrap()).unwrap()
}

#[test]
fn link_config_survives_a_store_and_load() {
    let kv = store();
    let mut cfg = TransportConfig::default();
    cfg.heartbeat_interval_ms = 15_000;
    cfg.shutdown_grace_ms = 750;
    cfg.store_into(&kv).unwrap();

    assert_eq!(TransportConfig::load_from(&kv), cfg);
}

#[test]
fn missing_or_corrupt_config_falls_back_to_defaults() {
    let kv = store();
    assert_eq!(TransportConfig::load_from(&kv), TransportConfig::default());

    kv.set_blob(CONFIG_KEY, &[0xFF, 0xFF, 0xFF]).unwrap();
    assert_eq!(TransportConfig::load_from(&kv), TransportConfig::default());
}

#[test]
fn invalid_config_is_refused_on_store() {
    let kv = store();
    let mut cfg = TransportConfig::default();
    cfg.heartbeat_interval_ms = 0;
    assert!(cfg.store_into(&kv).is_err());
    assert_eq!(kv.get_blob(CONFIG_KEY), Err(KvError::NotFound));
}

#[test]
fn peer_uri_roundtrip() {
    let kv = store();
    assert_eq!(config::load_uri(&kv), None);

    config::store_uri(&kv, "wss://hub.example:8443/ws").unwrap();
    assert_eq!(
        config::load_uri(&kv).as_deref(),
        Some("wss://hub.example:8443/ws")
    );

    config::store_uri(&kv, "").unwrap();
    assert_eq!(config::load_uri(&kv), None);
}

#[test]
fn loading_credentials_marks_the_device_provisioned() {
    let kv = store();
    let ready = Readiness::new();

    assert_eq!(
        Credentials::load(&kv, &ready).unwrap_err(),
        CredentialError::NoCredentials
    );
    assert!(!ready.contains(readiness::PROVISIONED));

    Credentials::new("lab-net", "hunter22").unwrap().store(&kv).unwrap();
    let creds = Credentials::load(&kv, &ready).unwrap();
    assert_eq!(creds.ssid.as_str(), "lab-net");
    assert!(!creds.is_open());
    assert!(ready.contains(readiness::PROVISIONED));
}

#[test]
fn factory_reset_forgets_everything() {
    let kv = store();
    config::store_uri(&kv, "ws://a/b").unwrap();
    TransportConfig::default().store_into(&kv).unwrap();

    kv.reset().unwrap();
    assert_eq!(config::load_uri(&kv), None);
    assert_eq!(kv.get_blob(CONFIG_KEY), Err(KvError::NotFound));
}

#[test]
fn each_caller_gets_its_own_reply() {
    let kv = Arc::new(store());
    let workers: Vec<_> = (0..4u32)
        .map(|t| {
            let kv = kv.clone();
            std::thread::spawn(move || {
                for i in 0..20u32 {
                    let key = format!("t{}k{}", t, i % 3);
                    let value = t * 1000 + i;
                    // The queue is shallow; a busy store may push back.
                    while let Err(e) = kv.set_u32(&key, value) {
                        assert_eq!(e, KvError::QueueFull);
                        std::thread::yield_now();
                    }
                    loop {
                        match kv.get_u32(&key) {
                            Ok(v) => {
                                assert_eq!(v, value);
                                break;
                            }
                            Err(KvError::QueueFull) => std::thread::yield_now(),
                            Err(e) => panic!("unexpected {:?}", e),
                        }
                    }
                }
            })
        })
        .collect();
    for w in workers {
        w.join().unwrap();
    }
}
