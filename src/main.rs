//! blemux firmware - BLE scan arbitration on the nRF52840.
//!
//! Task layout:
//!
//! - `softdevice_task` runs the SoftDevice event loop.
//! - `scan_task` executes start/stop commands against the radio and
//!   posts completions and advertisement batches to `PLATFORM_EVENTS`.
//! - `host_task` owns the request manager. It is the only place manager
//!   state is touched, so no locking is needed around it.
//! - `demo_client_task` stands in for a client: it starts an aggressive
//!   scan, toggles the BLE setting, dumps the manager state and stops
//!   again.

#![no_std]
#![no_main]

mod nrf_ble;

use blemux::ble::{AdvertisingEvent, AsyncResult, BleRequestManager, ClientSink, PlatformEventChannel, ScanMode};
use blemux::config::{
    BLE_MAX_CLIENTS, CLIENT_COMMAND_QUEUE_DEPTH, DEMO_CLIENT_INSTANCE_ID, DEMO_REPORT_DELAY_MS,
    DEMO_SCAN_DURATION_SECS,
};
use blemux::{Error, Setting};
use defmt::{info, unwrap, warn};
use embassy_executor::Spawner;
use embassy_futures::select::{select, Either};
use embassy_nrf::interrupt::Priority;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_time::{Duration, Instant, Timer};
use heapless::{String, Vec};
use nrf_ble::SoftdeviceBle;
use static_cell::StaticCell;
use {defmt_rtt as _, panic_probe as _};

/// Requests from on-board clients to the host task.
pub enum ClientCommand {
    StartScan {
        instance_id: u16,
        mode: ScanMode,
        report_delay_ms: u32,
    },
    StopScan {
        instance_id: u16,
    },
    /// Client is going away; stop whatever it left running.
    Unload {
        instance_id: u16,
    },
    SettingChanged(Setting, bool),
    DumpState,
}

type FirmwareManager = BleRequestManager<SoftdeviceBle, DefmtSink>;

static PLATFORM_EVENTS: PlatformEventChannel = PlatformEventChannel::new();
static CLIENT_COMMANDS: Channel<CriticalSectionRawMutex, ClientCommand, CLIENT_COMMAND_QUEUE_DEPTH> =
    Channel::new();
static MANAGER: StaticCell<FirmwareManager> = StaticCell::new();

/// Client sink that logs results and tracks broadcast registrations.
pub struct DefmtSink {
    registered: Vec<u16, BLE_MAX_CLIENTS>,
}

impl ClientSink for DefmtSink {
    fn post_async_result(&mut self, instance_id: u16, result: AsyncResult) -> Result<(), Error> {
        info!(
            "client {}: {:?} success={} error={:?}",
            instance_id, result.request_type, result.success, result.error_code
        );
        Ok(())
    }

    fn set_advertisement_registration(&mut self, instance_id: u16, registered: bool) {
        if registered {
            if !self.registered.contains(&instance_id) && self.registered.push(instance_id).is_err() {
                warn!("no room to register client {}", instance_id);
            }
        } else {
            self.registered.retain(|id| *id != instance_id);
        }
    }

    fn broadcast_advertisement(&mut self, event: &AdvertisingEvent) {
        for report in event.reports.iter() {
            info!(
                "adv {:x} rssi={} len={} -> {} clients",
                report.address,
                report.rssi,
                report.data.len(),
                self.registered.len()
            );
        }
    }

    fn monotonic_time_ns(&self) -> u64 {
        Instant::now().as_micros() * 1_000
    }
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("blemux starting");

    // The SoftDevice reserves interrupt priorities 0, 1 and 4.
    let mut config = embassy_nrf::config::Config::default();
    config.gpiote_interrupt_priority = Priority::P2;
    config.time_interrupt_priority = Priority::P2;
    let _p = embassy_nrf::init(config);

    let sd = nrf_ble::enable_softdevice();
    unwrap!(spawner.spawn(nrf_ble::softdevice_task(sd)));
    unwrap!(spawner.spawn(nrf_ble::scan_task(sd, &PLATFORM_EVENTS)));

    let manager = MANAGER.init(BleRequestManager::new(
        SoftdeviceBle,
        DefmtSink {
            registered: Vec::new(),
        },
    ));
    manager.init();
    info!(
        "capabilities={:x} filterCapabilities={:x}",
        manager.capabilities(),
        manager.filter_capabilities()
    );

    unwrap!(spawner.spawn(host_task(manager)));
    unwrap!(spawner.spawn(demo_client_task()));
}

#[embassy_executor::task]
async fn host_task(manager: &'static mut FirmwareManager) -> ! {
    let platform_rx = PLATFORM_EVENTS.receiver();
    let client_rx = CLIENT_COMMANDS.receiver();

    loop {
        match select(platform_rx.receive(), client_rx.receive()).await {
            Either::First(event) => manager.handle_platform_event(event),
            Either::Second(command) => handle_client_command(manager, command),
        }
    }
}

fn handle_client_command(manager: &mut FirmwareManager, command: ClientCommand) {
    match command {
        ClientCommand::StartScan {
            instance_id,
            mode,
            report_delay_ms,
        } => {
            if !manager.start_scan_async(instance_id, mode, report_delay_ms, None) {
                warn!("start scan from client {} rejected", instance_id);
            }
        }
        ClientCommand::StopScan { instance_id } => {
            if !manager.stop_scan_async(instance_id) {
                warn!("stop scan from client {} rejected", instance_id);
            }
        }
        ClientCommand::Unload { instance_id } => {
            let disabled = manager.disable_active_scan(instance_id);
            info!("client {} unloaded, {} scans disabled", instance_id, disabled);
        }
        ClientCommand::SettingChanged(setting, enabled) => manager.on_setting_changed(setting, enabled),
        ClientCommand::DumpState => {
            let mut dump: String<1024> = String::new();
            if manager.log_state_to_buffer(&mut dump).is_err() {
                warn!("state dump truncated");
            }
            info!("{}", dump.as_str());
        }
    }
}

#[embassy_executor::task]
async fn demo_client_task() {
    CLIENT_COMMANDS
        .send(ClientCommand::StartScan {
            instance_id: DEMO_CLIENT_INSTANCE_ID,
            mode: ScanMode::Aggressive,
            report_delay_ms: DEMO_REPORT_DELAY_MS,
        })
        .await;

    Timer::after(Duration::from_secs(DEMO_SCAN_DURATION_SECS)).await;
    CLIENT_COMMANDS.send(ClientCommand::DumpState).await;

    // Policy off and on again: the radio stops and the scan resumes.
    CLIENT_COMMANDS
        .send(ClientCommand::SettingChanged(Setting::BleAvailable, false))
        .await;
    Timer::after(Duration::from_secs(1)).await;
    CLIENT_COMMANDS
        .send(ClientCommand::SettingChanged(Setting::BleAvailable, true))
        .await;
    Timer::after(Duration::from_secs(DEMO_SCAN_DURATION_SECS)).await;

    CLIENT_COMMANDS
        .send(ClientCommand::StopScan {
            instance_id: DEMO_CLIENT_INSTANCE_ID,
        })
        .await;
    CLIENT_COMMANDS
        .send(ClientCommand::Unload {
            instance_id: DEMO_CLIENT_INSTANCE_ID,
        })
        .await;
    CLIENT_COMMANDS.send(ClientCommand::DumpState).await;
}
