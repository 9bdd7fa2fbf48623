//! Adapters: concrete implementations of the crate's port traits.
//!
//! | Adapter     | Implements            | Connects to                     |
//! |-------------|-----------------------|---------------------------------|
//! | `nvs`       | KvBackend             | NVS / in-memory store           |
//! | `wifi`      | (readiness producer)  | ESP-IDF WiFi STA                |
//! | `ws_client` | Connector / Link      | WebSocket peer (esp-idf / tungstenite) |

pub mod nvs;
pub mod wifi;
pub mod ws_client;
