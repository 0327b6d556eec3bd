//! Bluetooth Low Energy scan arbitration.
//!
//! Several independent clients may each want the radio scanning with
//! their own parameters, but the radio runs exactly one scan. This module
//! folds every client request into one maximal request and drives the
//! platform towards it:
//!
//! 1. **Request** - one client's desired scan configuration.
//! 2. **Request multiplexer** - per-client requests plus the cached
//!    maximal request.
//! 3. **Request manager** - validates client calls, issues at most one
//!    platform start/stop at a time, reconciles completions, resyncs and
//!    setting changes, and delivers per-client async results.
//!
//! Platform callbacks reach the manager through the [`handoff`] channel.

pub mod batcher;
pub mod handoff;
pub mod manager;
pub mod platform;
pub mod request;
pub mod request_log;
pub mod request_multiplexer;


use heapless::Vec;

use crate::config::{BLE_ADV_DATA_LEN_MAX, BLE_DATA_LEN_MAX, BLE_MAX_REPORTS_PER_EVENT};
use crate::error::{Error, ErrorCode};

pub use batcher::ReportBatcher;
pub use handoff::{PlatformCallbacks, PlatformEvent, PlatformEventChannel};
pub use manager::BleRequestManager;
pub use platform::{ClientSink, PlatformBle};
pub use request::{BleRequest, RequestStatus};
pub use request_multiplexer::BleRequestMultiplexer;

// Capability bits reported by the platform.

pub const BLE_CAPABILITIES_NONE: u32 = 0;
/// Scanning is supported.
pub const BLE_CAPABILITIES_SCAN: u32 = 1 << 0;
/// Results can be batched in hardware up to the report delay.
pub const BLE_CAPABILITIES_SCAN_RESULT_BATCHING: u32 = 1 << 1;
/// Filters are applied on a best-effort basis.
pub const BLE_CAPABILITIES_SCAN_FILTER_BEST_EFFORT: u32 = 1 << 2;

pub const BLE_FILTER_CAPABILITIES_NONE: u32 = 0;
pub const BLE_FILTER_CAPABILITIES_RSSI: u32 = 1 << 0;
pub const BLE_FILTER_CAPABILITIES_MANUFACTURER_DATA: u32 = 1 << 6;
pub const BLE_FILTER_CAPABILITIES_SERVICE_DATA: u32 = 1 << 7;

/// Scan duty cycle. Ordered from least to most power hungry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ScanMode {
    #[default]
    Background = 1,
    Foreground = 2,
    Aggressive = 3,
}

impl From<ScanMode> for u8 {
    fn from(mode: ScanMode) -> Self {
        mode as u8
    }
}

/// Advertisement data types a generic filter may match on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum AdType {
    /// Service Data - 16-bit UUID.
    ServiceDataUuid16 = 0x16,
    /// Manufacturer Specific Data.
    ManufacturerData = 0xFF,
}

impl TryFrom<u8> for AdType {
    type Error = Error;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        match raw {
            0x16 => Ok(AdType::ServiceDataUuid16),
            0xFF => Ok(AdType::ManufacturerData),
            _ => Err(Error::InvalidArgument),
        }
    }
}

/// Match rule on one advertisement data field.
///
/// A byte matches when `(adv_data & data_mask) == (data & data_mask)`.
/// `ad_type` stays raw so requests carrying unknown types can be
/// rejected at validation time rather than silently dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GenericFilter {
    pub ad_type: u8,
    pub len: u8,
    pub data: [u8; BLE_DATA_LEN_MAX],
    pub data_mask: [u8; BLE_DATA_LEN_MAX],
}

impl GenericFilter {
    /// Build a filter from equal-length data and mask slices.
    pub fn new(ad_type: u8, data: &[u8], data_mask: &[u8]) -> Result<Self, Error> {
        if data.len() != data_mask.len() || data.len() > BLE_DATA_LEN_MAX {
            return Err(Error::InvalidArgument);
        }

        let mut filter = Self {
            ad_type,
            len: data.len() as u8,
            data: [0; BLE_DATA_LEN_MAX],
            data_mask: [0; BLE_DATA_LEN_MAX],
        };
        filter.data[..data.len()].copy_from_slice(data);
        filter.data_mask[..data_mask.len()].copy_from_slice(data_mask);
        Ok(filter)
    }

    /// Filter on Service Data for a 16-bit service UUID.
    ///
    /// The UUID is matched in advertisement (little-endian) byte order.
    pub fn service_data_uuid16(uuid: u16, mask: u16) -> Self {
        let mut filter = Self {
            ad_type: AdType::ServiceDataUuid16 as u8,
            len: 2,
            data: [0; BLE_DATA_LEN_MAX],
            data_mask: [0; BLE_DATA_LEN_MAX],
        };
        filter.data[..2].copy_from_slice(&uuid.to_le_bytes());
        filter.data_mask[..2].copy_from_slice(&mask.to_le_bytes());
        filter
    }

    /// The meaningful part of `data`, clamped to the buffer size.
    pub fn data(&self) -> &[u8] {
        &self.data[..(self.len as usize).min(BLE_DATA_LEN_MAX)]
    }

    pub fn data_mask(&self) -> &[u8] {
        &self.data_mask[..(self.len as usize).min(BLE_DATA_LEN_MAX)]
    }
}

/// Scan filter as supplied by a client or handed to the platform.
#[derive(Debug, Clone, Copy)]
pub struct ScanFilter<'a> {
    /// Minimum RSSI (dBm); [`crate::config::BLE_RSSI_THRESHOLD_NONE`]
    /// disables RSSI filtering.
    pub rssi_threshold: i8,
    pub generic_filters: &'a [GenericFilter],
}

/// Which client call an async result answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum RequestType {
    StartScan = 1,
    StopScan = 2,
}

impl RequestType {
    pub fn for_enable(enable: bool) -> Self {
        if enable {
            RequestType::StartScan
        } else {
            RequestType::StopScan
        }
    }
}

/// Result delivered asynchronously to the client that made a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AsyncResult {
    pub request_type: RequestType,
    pub success: bool,
    pub error_code: ErrorCode,
}

/// A single received advertisement.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AdvertisingReport {
    /// Receive time (ns, platform monotonic clock).
    pub timestamp_ns: u64,
    /// Advertiser address, little-endian as received over the air.
    pub address: [u8; 6],
    pub rssi: i8,
    pub data: Vec<u8, BLE_ADV_DATA_LEN_MAX>,
}

/// A batch of advertisements, broadcast to every registered client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AdvertisingEvent {
    pub reports: Vec<AdvertisingReport, BLE_MAX_REPORTS_PER_EVENT>,
}
