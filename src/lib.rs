//! blemux: BLE scan request arbitration.
//!
//! Several clients may each ask the radio to scan with their own mode,
//! report delay and filters. blemux folds those requests into one maximal
//! request, keeps a single platform start/stop in flight, and answers
//! every client call with an async result.
//!
//! The library is `no_std` and allocation free so it runs on the sensor
//! hub and tests on the host.
//!
//! Usage: `cargo test` on the host; `cargo run --release --features
//! embedded` flashes the nRF52840 firmware in `main.rs`.

#![cfg_attr(not(test), no_std)]

// Must come first so the logging macros are visible to every module.
mod fmt;

pub mod ble;
pub mod config;
pub mod error;
pub mod request_multiplexer;
pub mod settings;

pub use ble::{
    AdType, AdvertisingEvent, AdvertisingReport, AsyncResult, BleRequest, BleRequestManager,
    BleRequestMultiplexer, ClientSink, GenericFilter, PlatformBle, PlatformCallbacks,
    PlatformEvent, PlatformEventChannel, ReportBatcher, RequestStatus, RequestType, ScanFilter,
    ScanMode,
};
pub use error::{Error, ErrorCode, FatalError, FaultPolicy, PanicOnFault};
pub use request_multiplexer::{MultiplexedRequest, RequestMultiplexer};
pub use settings::Setting;
