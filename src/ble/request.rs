//! One client's desired BLE scan configuration.

use core::fmt::{self, Write};

use heapless::Vec;

use crate::ble::{GenericFilter, ScanFilter, ScanMode};
use crate::config::{BLE_MAX_MERGED_FILTERS, BLE_RSSI_THRESHOLD_NONE, SYSTEM_INSTANCE_ID};
use crate::error::Error;
use crate::request_multiplexer::MultiplexedRequest;

/// Fixed-capacity list of generic filters.
pub type FilterList = Vec<GenericFilter, BLE_MAX_MERGED_FILTERS>;

/// Where a request is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum RequestStatus {
    /// Accepted locally, not yet part of an outstanding platform call.
    #[default]
    PendingRequest = 0,
    /// Included in the platform call currently in flight.
    PendingResponse = 1,
    /// Confirmed by the platform's last successful completion.
    Applied = 2,
}

/// A BLE scan request.
///
/// When `enabled` is false the scan parameters carry no meaning and are
/// never read by [`BleRequest::merge_with`]. `status` is bookkeeping only
/// and takes no part in merging or equivalence.
#[derive(Debug, Clone)]
pub struct BleRequest {
    instance_id: u16,
    enabled: bool,
    mode: ScanMode,
    report_delay_ms: u32,
    rssi_threshold: i8,
    filters: FilterList,
    status: RequestStatus,
}

impl Default for BleRequest {
    fn default() -> Self {
        Self::disabled(SYSTEM_INSTANCE_ID)
    }
}

impl BleRequest {
    /// A request to stop scanning.
    pub fn disabled(instance_id: u16) -> Self {
        Self {
            instance_id,
            enabled: false,
            mode: ScanMode::Background,
            report_delay_ms: 0,
            rssi_threshold: BLE_RSSI_THRESHOLD_NONE,
            filters: Vec::new(),
            status: RequestStatus::PendingRequest,
        }
    }

    /// A request to scan. `filter == None` means no RSSI threshold and no
    /// generic filters.
    pub fn enabled(
        instance_id: u16,
        mode: ScanMode,
        report_delay_ms: u32,
        filter: Option<&ScanFilter<'_>>,
    ) -> Result<Self, Error> {
        let mut request = Self::disabled(instance_id);
        request.enabled = true;
        request.mode = mode;
        request.report_delay_ms = report_delay_ms;

        if let Some(filter) = filter {
            request.rssi_threshold = filter.rssi_threshold;
            request
                .filters
                .extend_from_slice(filter.generic_filters)
                .map_err(|_| Error::TooManyFilters)?;
        }
        Ok(request)
    }

    pub fn instance_id(&self) -> u16 {
        self.instance_id
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn mode(&self) -> ScanMode {
        self.mode
    }

    pub fn report_delay_ms(&self) -> u32 {
        self.report_delay_ms
    }

    pub fn rssi_threshold(&self) -> i8 {
        self.rssi_threshold
    }

    pub fn generic_filters(&self) -> &[GenericFilter] {
        &self.filters
    }

    pub fn status(&self) -> RequestStatus {
        self.status
    }

    pub fn set_status(&mut self, status: RequestStatus) {
        self.status = status;
    }

    /// Borrow this request's filter in the form the platform takes.
    pub fn scan_filter(&self) -> ScanFilter<'_> {
        ScanFilter {
            rssi_threshold: self.rssi_threshold,
            generic_filters: &self.filters,
        }
    }

    /// Merge `other` into `self` so `self` covers both requests.
    ///
    /// Disabled requests never contribute. An enabled request merged into a
    /// disabled one replaces its parameters wholesale. Otherwise the mode
    /// only rises, delay and RSSI threshold only fall, and filters are
    /// appended without deduplication; any appended filter counts as a
    /// change.
    pub fn merge_with(&mut self, other: &BleRequest) -> Result<bool, Error> {
        if !other.enabled {
            return Ok(false);
        }

        if self.enabled && self.filters.len() + other.filters.len() > self.filters.capacity() {
            return Err(Error::FilterCapacity);
        }

        if !self.enabled {
            self.enabled = true;
            self.mode = other.mode;
            self.report_delay_ms = other.report_delay_ms;
            self.rssi_threshold = other.rssi_threshold;
            self.filters.clone_from(&other.filters);
            return Ok(true);
        }

        let mut changed = false;
        if other.mode > self.mode {
            self.mode = other.mode;
            changed = true;
        }
        if other.report_delay_ms < self.report_delay_ms {
            self.report_delay_ms = other.report_delay_ms;
            changed = true;
        }
        if other.rssi_threshold < self.rssi_threshold {
            self.rssi_threshold = other.rssi_threshold;
            changed = true;
        }
        if !other.filters.is_empty() {
            // Capacity checked above.
            let _ = self.filters.extend_from_slice(&other.filters);
            changed = true;
        }
        Ok(changed)
    }

    /// True iff both requests are enabled and would configure the radio
    /// identically, filters compared element-wise in order. A disabled
    /// request is equivalent to nothing, not even another disabled one.
    pub fn is_equivalent_to(&self, other: &BleRequest) -> bool {
        self.enabled
            && other.enabled
            && self.mode == other.mode
            && self.report_delay_ms == other.report_delay_ms
            && self.rssi_threshold == other.rssi_threshold
            && self.filters.len() == other.filters.len()
            && self
                .filters
                .iter()
                .zip(other.filters.iter())
                .all(|(a, b)| {
                    a.ad_type == b.ad_type
                        && a.len == b.len
                        && a.data() == b.data()
                        && a.data_mask() == b.data_mask()
                })
    }

    /// Human-readable summary for the debug dump.
    ///
    /// The platform view prints every filter's bytes; the per-client view
    /// prints the instance id, status and filter count only.
    pub fn log_state_to_buffer<W: Write>(&self, out: &mut W, is_platform_request: bool) -> fmt::Result {
        if !is_platform_request {
            write!(
                out,
                "  instanceId={} status={}",
                self.instance_id, self.status as u8
            )?;
        }

        if !self.enabled {
            return writeln!(out, " disable");
        }

        write!(
            out,
            " enable mode={} reportDelayMs={} rssiThreshold={}",
            u8::from(self.mode),
            self.report_delay_ms,
            self.rssi_threshold
        )?;

        if is_platform_request {
            write!(out, " filters=[")?;
            for filter in self.filters.iter() {
                write!(out, "(type={:x}, len={}, data=", filter.ad_type, filter.len)?;
                write_hex(out, filter.data())?;
                write!(out, ", dataMask=")?;
                write_hex(out, filter.data_mask())?;
                write!(out, "), ")?;
            }
            writeln!(out, "]")
        } else {
            writeln!(out, " filterCount={}", self.filters.len())
        }
    }
}

impl MultiplexedRequest for BleRequest {
    fn merge_with(&mut self, other: &Self) -> Result<bool, Error> {
        BleRequest::merge_with(self, other)
    }

    fn is_equivalent_to(&self, other: &Self) -> bool {
        BleRequest::is_equivalent_to(self, other)
    }
}

fn write_hex<W: Write>(out: &mut W, bytes: &[u8]) -> fmt::Result {
    for byte in bytes {
        write!(out, "{:02x}", byte)?;
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════
// Unit Tests
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::AdType;
    use std::string::String;

    fn filter(uuid: u16) -> GenericFilter {
        GenericFilter::service_data_uuid16(uuid, 0xFFFF)
    }

    fn request(mode: ScanMode, delay: u32, rssi: i8, filters: &[GenericFilter]) -> BleRequest {
        let scan_filter = ScanFilter {
            rssi_threshold: rssi,
            generic_filters: filters,
        };
        BleRequest::enabled(1, mode, delay, Some(&scan_filter)).unwrap()
    }

    // ════════════════════════════════════════════════════════════════════════
    // Construction
    // ════════════════════════════════════════════════════════════════════════

    #[test]
    fn default_is_disabled_system_request() {
        let req = BleRequest::default();
        assert!(!req.is_enabled());
        assert_eq!(req.instance_id(), SYSTEM_INSTANCE_ID);
        assert_eq!(req.status(), RequestStatus::PendingRequest);
        assert!(req.generic_filters().is_empty());
    }

    #[test]
    fn enabled_without_filter_has_no_threshold() {
        let req = BleRequest::enabled(3, ScanMode::Aggressive, 0, None).unwrap();
        assert!(req.is_enabled());
        assert_eq!(req.instance_id(), 3);
        assert_eq!(req.rssi_threshold(), BLE_RSSI_THRESHOLD_NONE);
        assert!(req.generic_filters().is_empty());
    }

    #[test]
    fn enabled_copies_filter_contents() {
        let req = request(ScanMode::Foreground, 500, -70, &[filter(0xFE2C)]);
        assert_eq!(req.rssi_threshold(), -70);
        assert_eq!(req.generic_filters().len(), 1);
        assert_eq!(req.generic_filters()[0].data(), &[0x2C, 0xFE]);
        assert_eq!(req.generic_filters()[0].ad_type, AdType::ServiceDataUuid16 as u8);
    }

    #[test]
    fn enabled_with_too_many_filters_fails() {
        let filters = [filter(1); BLE_MAX_MERGED_FILTERS + 1];
        let scan_filter = ScanFilter {
            rssi_threshold: BLE_RSSI_THRESHOLD_NONE,
            generic_filters: &filters,
        };
        let result = BleRequest::enabled(1, ScanMode::Background, 0, Some(&scan_filter));
        assert_eq!(result.err(), Some(Error::TooManyFilters));
    }

    #[test]
    fn generic_filter_rejects_mismatched_mask() {
        assert_eq!(
            GenericFilter::new(0x16, &[1, 2, 3], &[0xFF]),
            Err(Error::InvalidArgument)
        );
        assert_eq!(
            GenericFilter::new(0x16, &[0; 30], &[0; 30]),
            Err(Error::InvalidArgument)
        );
        let ok = GenericFilter::new(0xFF, &[0x4C, 0x00], &[0xFF, 0xFF]).unwrap();
        assert_eq!(ok.len, 2);
        assert_eq!(ok.data(), &[0x4C, 0x00]);
    }

    // ════════════════════════════════════════════════════════════════════════
    // Merge
    // ════════════════════════════════════════════════════════════════════════

    #[test]
    fn merge_into_disabled_replaces_wholesale() {
        let mut acc = BleRequest::default();
        let other = request(ScanMode::Foreground, 250, -60, &[filter(0xAAAA)]);
        assert_eq!(acc.merge_with(&other), Ok(true));
        assert!(acc.is_enabled());
        assert_eq!(acc.mode(), ScanMode::Foreground);
        assert_eq!(acc.report_delay_ms(), 250);
        assert_eq!(acc.rssi_threshold(), -60);
        assert_eq!(acc.generic_filters(), other.generic_filters());
        // Identity and bookkeeping are not copied.
        assert_eq!(acc.instance_id(), SYSTEM_INSTANCE_ID);
    }

    #[test]
    fn merge_disabled_is_noop() {
        let mut acc = request(ScanMode::Background, 1000, -50, &[]);
        assert_eq!(acc.merge_with(&BleRequest::disabled(4)), Ok(false));
        assert_eq!(acc.mode(), ScanMode::Background);
        assert_eq!(acc.report_delay_ms(), 1000);

        let mut disabled = BleRequest::default();
        assert_eq!(disabled.merge_with(&BleRequest::disabled(4)), Ok(false));
        assert!(!disabled.is_enabled());
    }

    #[test]
    fn merge_is_monotonic() {
        let mut acc = request(ScanMode::Foreground, 100, -80, &[filter(1)]);
        let other = request(ScanMode::Background, 1000, -40, &[filter(2)]);
        assert_eq!(acc.merge_with(&other), Ok(true));
        assert_eq!(acc.mode(), ScanMode::Foreground);
        assert_eq!(acc.report_delay_ms(), 100);
        assert_eq!(acc.rssi_threshold(), -80);
        assert_eq!(acc.generic_filters().len(), 2);
    }

    #[test]
    fn merge_takes_more_permissive_values() {
        let mut acc = request(ScanMode::Background, 1000, -40, &[]);
        let other = request(ScanMode::Aggressive, 100, -90, &[]);
        assert_eq!(acc.merge_with(&other), Ok(true));
        assert_eq!(acc.mode(), ScanMode::Aggressive);
        assert_eq!(acc.report_delay_ms(), 100);
        assert_eq!(acc.rssi_threshold(), -90);
    }

    #[test]
    fn merge_of_less_permissive_request_reports_no_change() {
        let mut acc = request(ScanMode::Aggressive, 0, -90, &[]);
        let other = request(ScanMode::Background, 1000, -40, &[]);
        assert_eq!(acc.merge_with(&other), Ok(false));
    }

    #[test]
    fn merge_keeps_duplicate_filters() {
        let mut acc = request(ScanMode::Background, 0, -50, &[filter(7)]);
        let other = request(ScanMode::Background, 0, -50, &[filter(7)]);
        assert_eq!(acc.merge_with(&other), Ok(true));
        assert_eq!(acc.generic_filters(), &[filter(7), filter(7)]);
    }

    #[test]
    fn merge_past_filter_capacity_fails_without_side_effects() {
        let full = [filter(1); BLE_MAX_MERGED_FILTERS];
        let mut acc = request(ScanMode::Background, 500, -50, &full);
        let other = request(ScanMode::Aggressive, 0, -90, &[filter(2)]);
        assert_eq!(acc.merge_with(&other), Err(Error::FilterCapacity));
        assert_eq!(acc.mode(), ScanMode::Background);
        assert_eq!(acc.generic_filters().len(), BLE_MAX_MERGED_FILTERS);
    }

    #[test]
    fn merge_of_full_list_into_disabled_fits() {
        let full = [filter(1); BLE_MAX_MERGED_FILTERS];
        let mut acc = BleRequest::default();
        assert_eq!(acc.merge_with(&request(ScanMode::Background, 0, -50, &full)), Ok(true));
        assert_eq!(acc.generic_filters().len(), BLE_MAX_MERGED_FILTERS);
    }

    // ════════════════════════════════════════════════════════════════════════
    // Equivalence
    // ════════════════════════════════════════════════════════════════════════

    #[test]
    fn identical_enabled_requests_are_equivalent() {
        let mut a = request(ScanMode::Foreground, 10, -70, &[filter(5)]);
        let b = request(ScanMode::Foreground, 10, -70, &[filter(5)]);
        a.set_status(RequestStatus::Applied);
        assert!(a.is_equivalent_to(&b));
    }

    #[test]
    fn disabled_requests_are_never_equivalent() {
        let a = BleRequest::disabled(1);
        assert!(!a.is_equivalent_to(&BleRequest::disabled(1)));
        assert!(!a.is_equivalent_to(&request(ScanMode::Background, 0, -50, &[])));
    }

    #[test]
    fn filter_order_matters_for_equivalence() {
        let a = request(ScanMode::Background, 0, -50, &[filter(1), filter(2)]);
        let b = request(ScanMode::Background, 0, -50, &[filter(2), filter(1)]);
        assert!(!a.is_equivalent_to(&b));
    }

    #[test]
    fn any_parameter_difference_breaks_equivalence() {
        let base = request(ScanMode::Background, 0, -50, &[filter(1)]);
        assert!(!base.is_equivalent_to(&request(ScanMode::Foreground, 0, -50, &[filter(1)])));
        assert!(!base.is_equivalent_to(&request(ScanMode::Background, 1, -50, &[filter(1)])));
        assert!(!base.is_equivalent_to(&request(ScanMode::Background, 0, -51, &[filter(1)])));
        assert!(!base.is_equivalent_to(&request(ScanMode::Background, 0, -50, &[filter(2)])));
        assert!(!base.is_equivalent_to(&request(ScanMode::Background, 0, -50, &[])));
    }

    // ════════════════════════════════════════════════════════════════════════
    // Debug dump
    // ════════════════════════════════════════════════════════════════════════

    #[test]
    fn platform_view_prints_filter_bytes() {
        let req = request(ScanMode::Aggressive, 0, -60, &[filter(0xFE2C)]);
        let mut out = String::new();
        req.log_state_to_buffer(&mut out, true).unwrap();
        assert_eq!(
            out,
            " enable mode=3 reportDelayMs=0 rssiThreshold=-60 filters=[(type=16, len=2, data=2cfe, dataMask=ffff), ]\n"
        );
    }

    #[test]
    fn client_view_prints_counts_only() {
        let mut req = request(ScanMode::Background, 1000, -50, &[filter(1), filter(2)]);
        req.set_status(RequestStatus::Applied);
        let mut out = String::new();
        req.log_state_to_buffer(&mut out, false).unwrap();
        assert_eq!(
            out,
            "  instanceId=1 status=2 enable mode=1 reportDelayMs=1000 rssiThreshold=-50 filterCount=2\n"
        );
    }

    #[test]
    fn disabled_request_dump_is_short() {
        let mut out = String::new();
        BleRequest::disabled(9).log_state_to_buffer(&mut out, false).unwrap();
        assert_eq!(out, "  instanceId=9 status=0 disable\n");
    }
}
