//! NVS (Non-Volatile Storage) backend for the key-value service.
//!
//! Implements [`KvBackend`] over one NVS namespace (`"boneboot"`). The
//! handle is opened once at construction and owned by the store worker
//! thread for the rest of its life.
//!
//! Off-target builds use an in-memory map with the same typing rules: a
//! key written as one kind reads back as `NotFound` for any other kind.

use crate::kv_store::{KvBackend, KvError, KvKind, KvValue, MAX_KEY_LEN};
use log::info;

#[cfg(not(target_os = "espidf"))]
use std::collections::HashMap;

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;
#[cfg(target_os = "espidf")]
use log::warn;

pub const NAMESPACE: &str = "boneboot";

/// Upper bound on a single string or blob read.
#[allow(dead_code)]
const MAX_VALUE_SIZE: usize = 4000;

pub struct NvsBackend {
    #[cfg(target_os = "espidf")]
    handle: nvs_handle_t,
    #[cfg(not(target_os = "espidf"))]
    store: HashMap<String, KvValue>,
}

/// NUL-terminated copy of `key` for the C API.
#[allow(dead_code)]
fn c_key(key: &str) -> [u8; MAX_KEY_LEN + 1] {
    let mut buf = [0u8; MAX_KEY_LEN + 1];
    let kb = key.as_bytes();
    let len = kb.len().min(MAX_KEY_LEN);
    buf[..len].copy_from_slice(&kb[..len]);
    buf
}

#[cfg(target_os = "espidf")]
fn check(ret: esp_err_t) -> Result<(), KvError> {
    if ret == ESP_OK as esp_err_t {
        Ok(())
    } else if ret == ESP_ERR_NVS_NOT_FOUND as esp_err_t
        || ret == ESP_ERR_NVS_TYPE_MISMATCH as esp_err_t
    {
        Err(KvError::NotFound)
    } else {
        warn!("NVS: error {}", ret);
        Err(KvError::Backend)
    }
}

impl NvsBackend {
    /// Initialise NVS flash and open the namespace read-write.
    ///
    /// On first boot or after a layout version change the partition is
    /// erased and initialised again.
    #[cfg(target_os = "espidf")]
    pub fn new() -> Result<Self, KvError> {
        // SAFETY: called once from the main task before the store worker
        // exists, so nothing else touches NVS concurrently.
        let ret = unsafe { nvs_flash_init() };
        if ret == ESP_ERR_NVS_NO_FREE_PAGES as esp_err_t
            || ret == ESP_ERR_NVS_NEW_VERSION_FOUND as esp_err_t
        {
            warn!("NVS: erasing and re-initialising flash partition");
            check(unsafe { nvs_flash_erase() })?;
            check(unsafe { nvs_flash_init() })?;
        } else {
            check(ret)?;
        }

        let ns = c_key(NAMESPACE);
        let mut handle: nvs_handle_t = 0;
        check(unsafe {
            nvs_open(
                ns.as_ptr() as *const _,
                nvs_open_mode_t_NVS_READWRITE,
                &mut handle,
            )
        })?;
        info!("NVS: namespace '{}' open", NAMESPACE);
        Ok(Self { handle })
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn new() -> Result<Self, KvError> {
        info!("NVS(sim): in-memory backend for '{}'", NAMESPACE);
        Ok(Self {
            store: HashMap::new(),
        })
    }

    #[cfg(target_os = "espidf")]
    fn commit(&mut self) -> Result<(), KvError> {
        check(unsafe { nvs_commit(self.handle) })
    }

    /// Two-step read: size query, then fill.
    #[cfg(target_os = "espidf")]
    fn read_sized(
        &mut self,
        key: &[u8],
        read: impl Fn(nvs_handle_t, *const core::ffi::c_char, *mut core::ffi::c_void, *mut usize) -> esp_err_t,
    ) -> Result<Vec<u8>, KvError> {
        let mut size: usize = 0;
        check(read(
            self.handle,
            key.as_ptr() as *const _,
            core::ptr::null_mut(),
            &mut size,
        ))?;
        if size > MAX_VALUE_SIZE {
            return Err(KvError::Backend);
        }
        let mut buf = vec![0u8; size];
        check(read(
            self.handle,
            key.as_ptr() as *const _,
            buf.as_mut_ptr() as *mut _,
            &mut size,
        ))?;
        buf.truncate(size);
        Ok(buf)
    }
}

#[cfg(target_os = "espidf")]
impl KvBackend for NvsBackend {
    fn set(&mut self, key: &str, value: &KvValue) -> Result<(), KvError> {
        let k = c_key(key);
        let kp = k.as_ptr() as *const _;
        match value {
            KvValue::Str(s) => {
                let mut cs = Vec::with_capacity(s.len() + 1);
                cs.extend_from_slice(s.as_bytes());
                cs.push(0);
                check(unsafe { nvs_set_str(self.handle, kp, cs.as_ptr() as *const _) })?;
            }
            KvValue::U32(v) => check(unsafe { nvs_set_u32(self.handle, kp, *v) })?,
            KvValue::Blob(b) => check(unsafe {
                nvs_set_blob(self.handle, kp, b.as_ptr() as *const _, b.len())
            })?,
        }
        self.commit()
    }

    fn get(&mut self, key: &str, kind: KvKind) -> Result<KvValue, KvError> {
        let k = c_key(key);
        match kind {
            KvKind::U32 => {
                let mut v: u32 = 0;
                check(unsafe { nvs_get_u32(self.handle, k.as_ptr() as *const _, &mut v) })?;
                Ok(KvValue::U32(v))
            }
            KvKind::Str => {
                let mut bytes = self.read_sized(&k, |h, kp, out, len| unsafe {
                    nvs_get_str(h, kp, out as *mut _, len)
                })?;
                if bytes.last() == Some(&0) {
                    bytes.pop();
                }
                String::from_utf8(bytes)
                    .map(KvValue::Str)
                    .map_err(|_| KvError::Backend)
            }
            KvKind::Blob => {
                let bytes = self.read_sized(&k, |h, kp, out, len| unsafe {
                    nvs_get_blob(h, kp, out, len)
                })?;
                Ok(KvValue::Blob(bytes))
            }
        }
    }

    fn erase_all(&mut self) -> Result<(), KvError> {
        check(unsafe { nvs_erase_all(self.handle) })?;
        self.commit()
    }
}

#[cfg(target_os = "espidf")]
impl Drop for NvsBackend {
    fn drop(&mut self) {
        unsafe { nvs_close(self.handle) };
    }
}

#[cfg(not(target_os = "espidf"))]
impl KvBackend for NvsBackend {
    fn set(&mut self, key: &str, value: &KvValue) -> Result<(), KvError> {
        if let KvValue::Blob(b) = value {
            if b.len() > MAX_VALUE_SIZE {
                return Err(KvError::Backend);
            }
        }
        self.store.insert(key.into(), value.clone());
        Ok(())
    }

    fn get(&mut self, key: &str, kind: KvKind) -> Result<KvValue, KvError> {
        self.store
            .get(key)
            .filter(|v| v.kind() == kind)
            .cloned()
            .ok_or(KvError::NotFound)
    }

    fn erase_all(&mut self) -> Result<(), KvError> {
        self.store.clear();
        Ok(())
    }
}
