//! SoftDevice-backed BLE platform.
//!
//! [`SoftdeviceBle`] is what the request manager drives. It never touches
//! the radio itself: start/stop commands are latched into a [`Signal`]
//! and executed by [`scan_task`], which reports completions and
//! advertisement batches back through the platform event channel. Batches
//! go out when full, at the report delay deadline, or when the scan ends.

use core::cell::RefCell;

use blemux::ble::{
    AdvertisingEvent, AdvertisingReport, GenericFilter, PlatformBle, PlatformCallbacks,
    PlatformEventChannel, ReportBatcher, ScanFilter, ScanMode, BLE_CAPABILITIES_SCAN,
    BLE_CAPABILITIES_SCAN_FILTER_BEST_EFFORT, BLE_CAPABILITIES_SCAN_RESULT_BATCHING,
    BLE_FILTER_CAPABILITIES_MANUFACTURER_DATA, BLE_FILTER_CAPABILITIES_RSSI,
    BLE_FILTER_CAPABILITIES_SERVICE_DATA,
};
use blemux::config::{BLE_ADV_DATA_LEN_MAX, BLE_MAX_MERGED_FILTERS, BLE_RSSI_THRESHOLD_NONE};
use blemux::ErrorCode;
use defmt::{info, warn};
use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::{CriticalSectionRawMutex, NoopRawMutex};
use embassy_sync::signal::Signal;
use embassy_time::{Instant, Timer};
use heapless::Vec;
use nrf_softdevice::ble::central;
use nrf_softdevice::{raw, Softdevice};

/// Scan parameters as handed over by the manager.
#[derive(Clone)]
pub struct ScanParams {
    mode: ScanMode,
    report_delay_ms: u32,
    rssi_threshold: i8,
    filters: Vec<GenericFilter, BLE_MAX_MERGED_FILTERS>,
}

#[derive(Clone)]
pub enum ScanCommand {
    Start(ScanParams),
    Stop,
}

/// Latest command for the scan task. A newer command overwrites one the
/// task has not picked up yet.
static SCAN_CONTROL: Signal<CriticalSectionRawMutex, ScanCommand> = Signal::new();

pub struct SoftdeviceBle;

impl PlatformBle for SoftdeviceBle {
    fn init(&mut self) {
        info!("SoftDevice BLE platform ready");
    }

    fn capabilities(&self) -> u32 {
        BLE_CAPABILITIES_SCAN
            | BLE_CAPABILITIES_SCAN_RESULT_BATCHING
            | BLE_CAPABILITIES_SCAN_FILTER_BEST_EFFORT
    }

    fn filter_capabilities(&self) -> u32 {
        BLE_FILTER_CAPABILITIES_RSSI
            | BLE_FILTER_CAPABILITIES_SERVICE_DATA
            | BLE_FILTER_CAPABILITIES_MANUFACTURER_DATA
    }

    fn start_scan_async(&mut self, mode: ScanMode, report_delay_ms: u32, filter: &ScanFilter<'_>) -> bool {
        let mut filters = Vec::new();
        if filters.extend_from_slice(filter.generic_filters).is_err() {
            warn!("too many scan filters for the platform");
            return false;
        }
        SCAN_CONTROL.signal(ScanCommand::Start(ScanParams {
            mode,
            report_delay_ms,
            rssi_threshold: filter.rssi_threshold,
            filters,
        }));
        true
    }

    fn stop_scan_async(&mut self) -> bool {
        SCAN_CONTROL.signal(ScanCommand::Stop);
        true
    }

    fn release_advertising_event(&mut self, event: AdvertisingEvent) {
        // Batches are owned values; nothing to hand back to the SoftDevice.
        drop(event);
    }
}

pub fn enable_softdevice() -> &'static Softdevice {
    let config = nrf_softdevice::Config {
        clock: Some(raw::nrf_clock_lf_cfg_t {
            source: raw::NRF_CLOCK_LF_SRC_XTAL as u8,
            rc_ctiv: 0,
            rc_temp_ctiv: 0,
            accuracy: raw::NRF_CLOCK_LF_ACCURACY_20_PPM as u8,
        }),
        conn_gap: Some(raw::ble_gap_conn_cfg_t {
            conn_count: 1,
            event_length: 24,
        }),
        gap_role_count: Some(raw::ble_gap_cfg_role_count_t {
            adv_set_count: 0,
            periph_role_count: 0,
            central_role_count: 1,
            central_sec_count: 0,
            _bitfield_1: raw::ble_gap_cfg_role_count_t::new_bitfield_1(0),
        }),
        ..Default::default()
    };

    info!("Starting SoftDevice");
    Softdevice::enable(&config)
}

#[embassy_executor::task]
pub async fn softdevice_task(sd: &'static Softdevice) -> ! {
    sd.run().await
}

/// Executes scan commands one at a time and reports each completion.
#[embassy_executor::task]
pub async fn scan_task(sd: &'static Softdevice, events: &'static PlatformEventChannel) -> ! {
    let callbacks = PlatformCallbacks::new(events);
    let mut next = SCAN_CONTROL.wait().await;

    loop {
        next = match next {
            ScanCommand::Stop => {
                info!("scan stopped");
                report_status(&callbacks, false);
                SCAN_CONTROL.wait().await
            }
            ScanCommand::Start(params) => {
                info!(
                    "scan started: mode={:?} reportDelayMs={} filters={}",
                    params.mode,
                    params.report_delay_ms,
                    params.filters.len()
                );
                report_status(&callbacks, true);

                let batcher = RefCell::new(ReportBatcher::new(params.report_delay_ms));
                // Dropping the scan future stops the radio.
                let outcome = select(run_scan(sd, &callbacks, &params, &batcher), SCAN_CONTROL.wait()).await;
                if let Some(event) = batcher.borrow_mut().take() {
                    post(&callbacks, event);
                }

                match outcome {
                    Either::First(()) => {
                        warn!("scan ended unexpectedly, requesting resync");
                        if callbacks.request_state_resync().is_err() {
                            warn!("resync request dropped");
                        }
                        SCAN_CONTROL.wait().await
                    }
                    Either::Second(command) => command,
                }
            }
        };
    }
}

fn report_status(callbacks: &PlatformCallbacks<'_>, enabled: bool) {
    if callbacks.scan_status_change(enabled, ErrorCode::None).is_err() {
        warn!("scan status change dropped");
    }
}

async fn run_scan(
    sd: &Softdevice,
    callbacks: &PlatformCallbacks<'_>,
    params: &ScanParams,
    batcher: &RefCell<ReportBatcher>,
) {
    let (interval, window) = scan_timing(params.mode);
    let config = central::ScanConfig {
        active: false,
        interval,
        window,
        ..Default::default()
    };

    // Deadline of the batch being filled, raised by the scan callback.
    let batch_opened: Signal<NoopRawMutex, u64> = Signal::new();

    let scan = central::scan(sd, &config, |adv| {
        let data = unsafe { core::slice::from_raw_parts(adv.data.p_data, adv.data.len as usize) };
        if !passes_filter(params, adv.rssi, data) {
            return None;
        }

        let report = AdvertisingReport {
            timestamp_ns: now_ns(),
            address: adv.peer_addr.addr,
            rssi: adv.rssi,
            data: Vec::from_slice(&data[..data.len().min(BLE_ADV_DATA_LEN_MAX)]).unwrap_or_default(),
        };

        let mut pending = batcher.borrow_mut();
        if let Some(event) = pending.push(report) {
            post(callbacks, event);
        }
        if let Some(deadline) = pending.deadline_ns() {
            batch_opened.signal(deadline);
        }
        None::<()>
    });

    let deadlines = async {
        loop {
            let deadline = batch_opened.wait().await;
            Timer::at(Instant::from_micros(deadline / 1_000)).await;
            let due = batcher.borrow_mut().poll(now_ns());
            if let Some(event) = due {
                post(callbacks, event);
            }
        }
    };

    if let Either::First(Err(_)) = select(scan, deadlines).await {
        warn!("SoftDevice scan failed");
    }
}

fn now_ns() -> u64 {
    Instant::now().as_micros() * 1_000
}

fn post(callbacks: &PlatformCallbacks<'_>, event: AdvertisingEvent) {
    if let Err(bounced) = callbacks.advertising_event(event) {
        warn!("dropping {} advertising reports", bounced.reports.len());
    }
}

/// Scan interval and window, in 0.625 ms units.
fn scan_timing(mode: ScanMode) -> (u32, u32) {
    match mode {
        ScanMode::Background => (1600, 48),
        ScanMode::Foreground => (1600, 400),
        ScanMode::Aggressive => (160, 160),
    }
}

/// Best-effort software filter: RSSI threshold, then any generic filter
/// matching one AD structure.
fn passes_filter(params: &ScanParams, rssi: i8, data: &[u8]) -> bool {
    if params.rssi_threshold != BLE_RSSI_THRESHOLD_NONE && rssi < params.rssi_threshold {
        return false;
    }
    if params.filters.is_empty() {
        return true;
    }

    let mut offset = 0;
    while offset + 1 < data.len() {
        let len = data[offset] as usize;
        if len == 0 || offset + 1 + len > data.len() {
            break;
        }
        let ad_type = data[offset + 1];
        let payload = &data[offset + 2..offset + 1 + len];
        if params.filters.iter().any(|f| f.ad_type == ad_type && masked_match(f, payload)) {
            return true;
        }
        offset += 1 + len;
    }
    false
}

fn masked_match(filter: &GenericFilter, payload: &[u8]) -> bool {
    payload.len() >= filter.data().len()
        && filter
            .data()
            .iter()
            .zip(filter.data_mask())
            .zip(payload)
            .all(|((want, mask), got)| want & mask == got & mask)
}
