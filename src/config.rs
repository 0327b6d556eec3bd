//! Application-wide constants and compile-time configuration.
//!
//! All capacities, protocol limits and firmware timing parameters live
//! here so they can be tuned in one place. Nothing is loaded at runtime.

// Clients

/// Maximum number of clients that may hold a BLE scan request at once.
pub const BLE_MAX_CLIENTS: usize = 8;

/// Instance id reserved for the synthesized platform/maximal request.
/// Never handed out to a real client.
pub const SYSTEM_INSTANCE_ID: u16 = 0;

// Scan filters

/// Maximum generic filters accepted in a single client request.
pub const BLE_MAX_FILTERS_PER_REQUEST: usize = 4;

/// Capacity of a filter list. Sized so the union of every client's
/// filters always fits in the maximal request.
pub const BLE_MAX_MERGED_FILTERS: usize = BLE_MAX_CLIENTS * BLE_MAX_FILTERS_PER_REQUEST;

/// Maximum data (and mask) length of a generic filter, in bytes.
pub const BLE_DATA_LEN_MAX: usize = 29;

/// RSSI threshold sentinel meaning "no RSSI filtering" (dBm).
pub const BLE_RSSI_THRESHOLD_NONE: i8 = -128;

// Advertisements

/// Maximum legacy advertising payload length (bytes).
pub const BLE_ADV_DATA_LEN_MAX: usize = 31;

/// Maximum advertising reports batched into a single event.
pub const BLE_MAX_REPORTS_PER_EVENT: usize = 8;

// Bookkeeping

/// Number of recent client requests kept for the debug dump.
pub const BLE_REQUEST_LOG_CAPACITY: usize = 10;

/// Depth of the platform → event loop callback queue.
pub const PLATFORM_EVENT_QUEUE_DEPTH: usize = 8;

// Firmware

/// Depth of the client → event loop command queue.
pub const CLIENT_COMMAND_QUEUE_DEPTH: usize = 4;

/// Instance id used by the on-board demo client.
pub const DEMO_CLIENT_INSTANCE_ID: u16 = 1;

/// How long the demo client keeps its scan running (seconds).
pub const DEMO_SCAN_DURATION_SECS: u64 = 30;

/// Report delay requested by the demo client (ms). 0 = deliver immediately.
pub const DEMO_REPORT_DELAY_MS: u32 = 0;
