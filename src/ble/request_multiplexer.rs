//! BLE specialisation of the generic request multiplexer.

use crate::ble::request::{BleRequest, RequestStatus};
use crate::config::BLE_MAX_CLIENTS;
use crate::error::Error;
use crate::request_multiplexer::RequestMultiplexer;

pub type BleRequestMultiplexer = RequestMultiplexer<BleRequest, BLE_MAX_CLIENTS>;

impl<const N: usize> RequestMultiplexer<BleRequest, N> {
    /// Locate the request owned by `instance_id`.
    pub fn find_request(&self, instance_id: u16) -> Option<(usize, &BleRequest)> {
        self.requests()
            .iter()
            .enumerate()
            .find(|(_, req)| req.instance_id() == instance_id)
    }

    pub fn has_requests(&self, status: RequestStatus) -> bool {
        self.requests().iter().any(|req| req.status() == status)
    }

    /// Remove every request in `status`; the maximal request is
    /// recomputed once after the whole pass.
    pub fn remove_requests(&mut self, status: RequestStatus) -> Result<bool, Error> {
        self.remove_where(|req| req.status() == status)
    }

    /// Drop disabled requests the platform has already confirmed.
    ///
    /// Disabled requests never contribute to the maximal request, so the
    /// cached fold is left as is.
    pub fn remove_disabled_requests(&mut self) -> usize {
        self.remove_where_unfolded(|req| !req.is_enabled() && req.status() == RequestStatus::Applied)
    }

    /// Move every request in `from` to `to`.
    pub fn transition_requests(&mut self, from: RequestStatus, to: RequestStatus) {
        for req in self.requests_mut().iter_mut() {
            if req.status() == from {
                req.set_status(to);
            }
        }
    }

    pub fn is_maximal_request_enabled(&self) -> bool {
        self.current_maximal_request().is_enabled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::{GenericFilter, ScanFilter, ScanMode};

    fn enabled(instance_id: u16, mode: ScanMode, delay: u32) -> BleRequest {
        BleRequest::enabled(instance_id, mode, delay, None).unwrap()
    }

    fn with_filters(instance_id: u16, rssi: i8, filters: &[GenericFilter]) -> BleRequest {
        let filter = ScanFilter {
            rssi_threshold: rssi,
            generic_filters: filters,
        };
        BleRequest::enabled(instance_id, ScanMode::Background, 1000, Some(&filter)).unwrap()
    }

    #[test]
    fn empty_multiplexer_has_disabled_maximal() {
        let mux = BleRequestMultiplexer::new();
        assert!(!mux.is_maximal_request_enabled());
        assert!(mux.find_request(1).is_none());
        assert!(!mux.has_requests(RequestStatus::PendingRequest));
    }

    #[test]
    fn find_request_returns_index() {
        let mut mux = BleRequestMultiplexer::new();
        mux.add_request(enabled(4, ScanMode::Background, 0)).unwrap();
        mux.add_request(enabled(7, ScanMode::Background, 0)).unwrap();
        let (index, req) = mux.find_request(7).unwrap();
        assert_eq!(index, 1);
        assert_eq!(req.instance_id(), 7);
    }

    #[test]
    fn maximal_request_matches_manual_fold() {
        let requests = [
            with_filters(1, -60, &[GenericFilter::service_data_uuid16(0x1111, 0xFFFF)]),
            enabled(2, ScanMode::Aggressive, 2000),
            BleRequest::disabled(3),
            with_filters(4, -90, &[GenericFilter::service_data_uuid16(0x2222, 0xFFFF)]),
        ];

        let mut mux = BleRequestMultiplexer::new();
        for req in requests.iter() {
            mux.add_request(req.clone()).unwrap();
        }

        let mut expected = BleRequest::default();
        for req in requests.iter().rev().filter(|r| r.is_enabled()) {
            expected.merge_with(req).unwrap();
        }

        let maximal = mux.current_maximal_request();
        assert!(maximal.is_enabled());
        assert_eq!(maximal.mode(), expected.mode());
        assert_eq!(maximal.mode(), ScanMode::Aggressive);
        assert_eq!(maximal.report_delay_ms(), expected.report_delay_ms());
        assert_eq!(maximal.report_delay_ms(), 1000);
        // Client 2 asked for no RSSI filtering, which wins.
        assert_eq!(maximal.rssi_threshold(), expected.rssi_threshold());
        assert_eq!(maximal.rssi_threshold(), crate::config::BLE_RSSI_THRESHOLD_NONE);

        // Same filter multiset, possibly in a different order.
        let mut got: std::vec::Vec<_> = maximal.generic_filters().iter().map(|f| f.data[0]).collect();
        let mut want: std::vec::Vec<_> = expected.generic_filters().iter().map(|f| f.data[0]).collect();
        got.sort();
        want.sort();
        assert_eq!(got, want);
    }

    #[test]
    fn remove_requests_by_status_recomputes_once() {
        let mut mux = BleRequestMultiplexer::new();
        mux.add_request(enabled(1, ScanMode::Aggressive, 0)).unwrap();
        mux.add_request(enabled(2, ScanMode::Background, 500)).unwrap();
        mux.add_request(enabled(3, ScanMode::Aggressive, 0)).unwrap();
        mux.requests_mut()[1].set_status(RequestStatus::Applied);

        assert_eq!(mux.remove_requests(RequestStatus::PendingRequest), Ok(true));
        assert_eq!(mux.len(), 1);
        assert_eq!(mux.requests()[0].instance_id(), 2);
        assert_eq!(mux.current_maximal_request().mode(), ScanMode::Background);
    }

    #[test]
    fn remove_disabled_requests_only_drops_applied_disabled() {
        let mut mux = BleRequestMultiplexer::new();
        mux.add_request(enabled(1, ScanMode::Background, 0)).unwrap();
        mux.add_request(enabled(2, ScanMode::Background, 0)).unwrap();
        mux.add_request(enabled(3, ScanMode::Background, 0)).unwrap();
        mux.update_request(0, BleRequest::disabled(1)).unwrap();
        mux.update_request(1, BleRequest::disabled(2)).unwrap();
        mux.requests_mut()[0].set_status(RequestStatus::Applied);

        assert_eq!(mux.remove_disabled_requests(), 1);
        let ids: std::vec::Vec<u16> = mux.requests().iter().map(|r| r.instance_id()).collect();
        assert_eq!(ids, [2, 3]);
        assert!(mux.is_maximal_request_enabled());
    }

    #[test]
    fn transition_requests_moves_matching_status() {
        let mut mux = BleRequestMultiplexer::new();
        mux.add_request(enabled(1, ScanMode::Background, 0)).unwrap();
        mux.add_request(enabled(2, ScanMode::Background, 0)).unwrap();
        mux.requests_mut()[0].set_status(RequestStatus::Applied);

        mux.transition_requests(RequestStatus::PendingRequest, RequestStatus::PendingResponse);
        assert_eq!(mux.requests()[0].status(), RequestStatus::Applied);
        assert_eq!(mux.requests()[1].status(), RequestStatus::PendingResponse);
        assert!(mux.has_requests(RequestStatus::PendingResponse));
        assert!(!mux.has_requests(RequestStatus::PendingRequest));
    }

    #[test]
    fn disabled_to_disabled_update_reports_change() {
        let mut mux = BleRequestMultiplexer::new();
        mux.add_request(enabled(1, ScanMode::Background, 0)).unwrap();
        assert_eq!(mux.update_request(0, BleRequest::disabled(1)), Ok(true));
        // Disabled requests are never equivalent, so the stop is re-asserted.
        assert_eq!(mux.update_request(0, BleRequest::disabled(1)), Ok(true));
    }

    #[test]
    fn client_capacity_is_surfaced() {
        let mut mux = BleRequestMultiplexer::new();
        for id in 1..=BLE_MAX_CLIENTS as u16 {
            mux.add_request(enabled(id, ScanMode::Background, 0)).unwrap();
        }
        assert_eq!(
            mux.add_request(enabled(99, ScanMode::Aggressive, 0)),
            Err(Error::ClientCapacity)
        );
        assert_eq!(mux.current_maximal_request().mode(), ScanMode::Background);
    }
}
