//! Ring buffer of recently accepted client requests, for the debug dump.
//!
//! Purely observational: nothing here feeds back into arbitration.

use core::fmt::{self, Write};

use heapless::HistoryBuffer;

use crate::ble::request::BleRequest;
use crate::config::BLE_REQUEST_LOG_CAPACITY;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BleRequestLog {
    pub timestamp_ns: u64,
    pub instance_id: u16,
    pub enable: bool,
    /// False when an enable was refused because BLE is disabled by policy;
    /// the scan parameters below are then meaningless.
    pub complies_with_ble_setting: bool,
    pub mode: u8,
    pub report_delay_ms: u32,
    pub rssi_threshold: i8,
    pub filter_count: u8,
}

impl BleRequestLog {
    pub fn new(timestamp_ns: u64, instance_id: u16, enable: bool, complies_with_ble_setting: bool) -> Self {
        Self {
            timestamp_ns,
            instance_id,
            enable,
            complies_with_ble_setting,
            mode: 0,
            report_delay_ms: 0,
            rssi_threshold: 0,
            filter_count: 0,
        }
    }

    /// Copy scan parameters from the request as stored in the multiplexer.
    pub fn populate_request_data(&mut self, request: &BleRequest) {
        self.mode = request.mode().into();
        self.report_delay_ms = request.report_delay_ms();
        self.rssi_threshold = request.rssi_threshold();
        self.filter_count = request.generic_filters().len().min(u8::MAX as usize) as u8;
    }

    fn log_state_to_buffer<W: Write>(&self, out: &mut W) -> fmt::Result {
        write!(out, "  ts={} instanceId={}", self.timestamp_ns, self.instance_id)?;
        if !self.enable {
            return writeln!(out, " disable");
        }
        if self.complies_with_ble_setting {
            writeln!(
                out,
                " enable mode={} reportDelayMs={} rssiThreshold={} scanCount={}",
                self.mode, self.report_delay_ms, self.rssi_threshold, self.filter_count
            )
        } else {
            writeln!(out, " enable request did not comply with BLE setting")
        }
    }
}

/// Fixed-size log; the oldest entry is evicted when full.
#[derive(Default)]
pub struct RequestLog {
    entries: HistoryBuffer<BleRequestLog, BLE_REQUEST_LOG_CAPACITY>,
}

impl RequestLog {
    pub fn new() -> Self {
        Self {
            entries: HistoryBuffer::new(),
        }
    }

    pub fn push(&mut self, entry: BleRequestLog) {
        self.entries.write(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.len() == 0
    }

    /// Most recent entry, if any.
    pub fn latest(&self) -> Option<&BleRequestLog> {
        self.entries.recent()
    }

    /// Entries oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &BleRequestLog> {
        self.entries.oldest_ordered()
    }

    /// Write every entry, newest first.
    pub fn log_state_to_buffer<W: Write>(&self, out: &mut W) -> fmt::Result {
        writeln!(out, " Last {} valid BLE requests:", self.len())?;
        let mut newest_first: heapless::Vec<&BleRequestLog, BLE_REQUEST_LOG_CAPACITY> = heapless::Vec::new();
        for entry in self.iter() {
            let _ = newest_first.push(entry);
        }
        for entry in newest_first.iter().rev() {
            entry.log_state_to_buffer(out)?;
        }
        Ok(())
    }
}
