//! Collaborator interfaces of the request manager.
//!
//! [`PlatformBle`] is the radio abstraction the manager drives.
//! [`ClientSink`] is how results and advertisements get back to clients.
//! Both are injected at construction so the manager can be driven by
//! fakes on the host.

use crate::ble::{AdvertisingEvent, AsyncResult, ScanFilter, ScanMode};
use crate::error::Error;

/// The platform BLE capability.
///
/// `start_scan_async` and `stop_scan_async` only report whether the
/// attempt was accepted. The outcome arrives later through
/// [`crate::ble::PlatformCallbacks::scan_status_change`]; the platform
/// must eventually report exactly one completion per accepted call.
pub trait PlatformBle {
    /// Called once before any other method.
    fn init(&mut self) {}

    fn capabilities(&self) -> u32;

    fn filter_capabilities(&self) -> u32;

    fn start_scan_async(&mut self, mode: ScanMode, report_delay_ms: u32, filter: &ScanFilter<'_>) -> bool;

    fn stop_scan_async(&mut self) -> bool;

    /// Hand a delivered advertisement batch back to the platform.
    fn release_advertising_event(&mut self, event: AdvertisingEvent);
}

/// Delivery target for client-visible events.
pub trait ClientSink {
    /// Post an async result to the client with `instance_id`.
    fn post_async_result(&mut self, instance_id: u16, result: AsyncResult) -> Result<(), Error>;

    /// Register or unregister a client for advertisement broadcasts.
    fn set_advertisement_registration(&mut self, instance_id: u16, registered: bool);

    /// Deliver an advertisement batch to every registered client.
    fn broadcast_advertisement(&mut self, event: &AdvertisingEvent);

    /// Monotonic time used to stamp request log entries.
    fn monotonic_time_ns(&self) -> u64;
}
