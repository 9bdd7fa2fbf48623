//! Named worker threads.
//!
//! On ESP-IDF, `std::thread` is a pthread over a FreeRTOS task, and
//! `esp_pthread_set_cfg()` sets the core, priority, and stack of the *next*
//! thread created by the calling thread. The config→spawn pair therefore
//! must not interleave with other thread creation on the same caller.
//! Elsewhere only the stack size and the name are honoured.

use crate::error::Error;
use std::thread::JoinHandle;

/// ESP32 CPU cores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Core {
    /// Core 0 (PRO_CPU), shared with WiFi and lwIP.
    Pro = 0,
    /// Core 1 (APP_CPU).
    App = 1,
}

/// Placement of one long-lived worker.
#[derive(Debug, Clone, Copy)]
pub struct TaskSpec {
    /// NUL-terminated; FreeRTOS keeps the pointer.
    pub name: &'static str,
    pub core: Core,
    pub priority: u8,
    pub stack_kb: usize,
}

/// Transport worker: network-bound, lives next to lwIP.
pub const LINK_TASK: TaskSpec = TaskSpec {
    name: "ws-link\0",
    core: Core::Pro,
    priority: 5,
    stack_kb: 8,
};

/// Key-value store worker.
pub const KV_TASK: TaskSpec = TaskSpec {
    name: "kv-store\0",
    core: Core::App,
    priority: 5,
    stack_kb: 4,
};

impl TaskSpec {
    fn display_name(&self) -> &'static str {
        self.name.trim_end_matches('\0')
    }
}

#[cfg(target_os = "espidf")]
pub fn spawn_task(
    spec: &TaskSpec,
    f: impl FnOnce() + Send + 'static,
) -> Result<JoinHandle<()>, Error> {
    // SAFETY: the config only affects the next pthread_create on this
    // thread, which is the spawn right below.
    unsafe {
        let mut cfg = esp_idf_sys::esp_create_default_pthread_config();
        cfg.pin_to_core = spec.core as i32;
        cfg.prio = i32::from(spec.priority);
        cfg.stack_size = (spec.stack_kb * 1024) as _;
        cfg.thread_name = spec.name.as_ptr() as *const _;
        let ret = esp_idf_sys::esp_pthread_set_cfg(&cfg);
        if ret != esp_idf_sys::ESP_OK as i32 {
            log::warn!("TASK: esp_pthread_set_cfg failed: {}", ret);
            return Err(Error::Spawn);
        }
    }

    log::info!(
        "TASK: spawning '{}' on {:?} (pri={}, stack={}KB)",
        spec.display_name(),
        spec.core,
        spec.priority,
        spec.stack_kb
    );

    std::thread::Builder::new()
        .name(spec.display_name().into())
        .spawn(f)
        .map_err(|_| Error::Spawn)
}

#[cfg(not(target_os = "espidf"))]
pub fn spawn_task(
    spec: &TaskSpec,
    f: impl FnOnce() + Send + 'static,
) -> Result<JoinHandle<()>, Error> {
    log::debug!(
        "TASK(sim): spawning '{}' (stack={}KB)",
        spec.display_name(),
        spec.stack_kb
    );

    // 256 KB floor on host.
    let stack = (spec.stack_kb * 1024).max(256 * 1024);
    std::thread::Builder::new()
        .name(spec.display_name().into())
        .stack_size(stack)
        .spawn(f)
        .map_err(|_| Error::Spawn)
}
