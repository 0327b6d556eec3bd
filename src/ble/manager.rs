//! BLE request manager.
//!
//! Owns every client's scan request and the platform scan state. Client
//! calls, platform completions, resync requests and setting changes all
//! land here on the single event-loop context; the manager keeps at most
//! one platform start/stop in flight and answers each client call with
//! exactly one async result.

use core::fmt::{self, Write};

use heapless::Vec;

use crate::ble::handoff::{PlatformEvent, PlatformEventReceiver};
use crate::ble::platform::{ClientSink, PlatformBle};
use crate::ble::request::{BleRequest, RequestStatus};
use crate::ble::request_log::{BleRequestLog, RequestLog};
use crate::ble::request_multiplexer::BleRequestMultiplexer;
use crate::ble::{AdType, AdvertisingEvent, AsyncResult, RequestType, ScanFilter, ScanMode};
use crate::config::{BLE_DATA_LEN_MAX, BLE_MAX_CLIENTS, BLE_MAX_FILTERS_PER_REQUEST, SYSTEM_INSTANCE_ID};
use crate::error::{ErrorCode, FatalError, FaultPolicy, PanicOnFault};
use crate::settings::Setting;

pub struct BleRequestManager<P, S, F = PanicOnFault>
where
    P: PlatformBle,
    S: ClientSink,
    F: FaultPolicy,
{
    platform: P,
    sink: S,
    fault: F,
    requests: BleRequestMultiplexer,
    /// Last state the platform confirmed.
    active_platform_request: BleRequest,
    /// The platform call in flight, if any.
    pending_platform_request: Option<BleRequest>,
    /// The call in flight was issued for a resync or a setting change
    /// rather than for a client.
    internal_request_pending: bool,
    resync_pending: bool,
    setting_change_pending: bool,
    ble_setting_enabled: bool,
    log: RequestLog,
}

impl<P: PlatformBle, S: ClientSink> BleRequestManager<P, S, PanicOnFault> {
    pub fn new(platform: P, sink: S) -> Self {
        Self::with_fault_policy(platform, sink, PanicOnFault)
    }
}

impl<P, S, F> BleRequestManager<P, S, F>
where
    P: PlatformBle,
    S: ClientSink,
    F: FaultPolicy,
{
    pub fn with_fault_policy(platform: P, sink: S, fault: F) -> Self {
        Self {
            platform,
            sink,
            fault,
            requests: BleRequestMultiplexer::new(),
            active_platform_request: BleRequest::default(),
            pending_platform_request: None,
            internal_request_pending: false,
            resync_pending: false,
            setting_change_pending: false,
            ble_setting_enabled: true,
            log: RequestLog::new(),
        }
    }

    /// Initialise the platform. Call once before anything else.
    pub fn init(&mut self) {
        self.platform.init();
        info!("BLE request manager initialised");
    }

    pub fn capabilities(&self) -> u32 {
        self.platform.capabilities()
    }

    pub fn filter_capabilities(&self) -> u32 {
        self.platform.filter_capabilities()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Client API
    // ═══════════════════════════════════════════════════════════════════════

    /// Ask for the radio to scan on behalf of `instance_id`.
    ///
    /// Returns whether the call was accepted. The outcome of an accepted
    /// call is always delivered later as an async result.
    pub fn start_scan_async(
        &mut self,
        instance_id: u16,
        mode: ScanMode,
        report_delay_ms: u32,
        filter: Option<&ScanFilter<'_>>,
    ) -> bool {
        match BleRequest::enabled(instance_id, mode, report_delay_ms, filter) {
            Ok(request) => self.configure(request),
            Err(e) => {
                warn!("start scan from {} rejected: {:?}", instance_id, e);
                false
            }
        }
    }

    pub fn stop_scan_async(&mut self, instance_id: u16) -> bool {
        self.configure(BleRequest::disabled(instance_id))
    }

    /// Stop `instance_id`'s scan if it has an enabled one, e.g. when the
    /// client is unloaded. Returns the number of scans disabled.
    pub fn disable_active_scan(&mut self, instance_id: u16) -> u32 {
        let active = matches!(
            self.requests.find_request(instance_id),
            Some((_, req)) if req.is_enabled()
        );
        if !active {
            return 0;
        }
        self.configure(BleRequest::disabled(instance_id));
        1
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Platform side
    // ═══════════════════════════════════════════════════════════════════════

    /// Dispatch one event taken off the handoff channel.
    pub fn handle_platform_event(&mut self, event: PlatformEvent) {
        match event {
            PlatformEvent::ScanStatusChange {
                enabled,
                error_code,
            } => self.handle_platform_change(enabled, error_code),
            PlatformEvent::ResyncRequested => self.handle_request_state_resync(),
            PlatformEvent::Advertisement(event) => self.handle_advertisement_event(event),
        }
    }

    /// Handle every event already queued, in order. Never waits.
    pub fn drain_platform_events(&mut self, rx: &PlatformEventReceiver<'_>) -> usize {
        let mut handled = 0;
        while let Ok(event) = rx.try_receive() {
            self.handle_platform_event(event);
            handled += 1;
        }
        handled
    }

    /// Wait for the next platform event and handle it.
    pub async fn process_next_platform_event(&mut self, rx: &PlatformEventReceiver<'_>) {
        let event = rx.receive().await;
        self.handle_platform_event(event);
    }

    pub fn handle_request_state_resync(&mut self) {
        if self.async_response_pending() {
            info!("resync requested while a platform call is in flight, deferring");
            self.resync_pending = true;
        } else {
            info!("resync requested");
            self.update_platform_request(true);
        }
    }

    /// Completion of the platform call in flight.
    pub fn handle_platform_change(&mut self, enable: bool, error_code: ErrorCode) {
        let Some(pending) = self.pending_platform_request.take() else {
            self.fatal(FatalError::UnsolicitedPlatformResponse);
            return;
        };

        let mut success = error_code.is_success();
        let mut error_code = error_code;
        if enable != pending.is_enabled() {
            self.fatal(FatalError::UnexpectedPlatformState {
                requested: pending.is_enabled(),
                reported: enable,
            });
            success = false;
            error_code = ErrorCode::Error;
        }
        info!(
            "platform scan {} completed: {:?}",
            if enable { "start" } else { "stop" },
            error_code
        );

        if self.internal_request_pending {
            self.internal_request_pending = false;
            if !success {
                self.fatal(FatalError::InternalRequestFailed);
            }
        } else {
            self.resolve_pending_responses(success, error_code);
        }

        if success {
            let pruned = self.requests.remove_disabled_requests();
            if pruned > 0 {
                debug!("pruned {} applied disabled requests", pruned);
            }
            self.active_platform_request = pending;
        }

        self.dispatch_pending_requests();

        if self.resync_pending {
            if success {
                self.resync_pending = false;
            } else if !self.async_response_pending() {
                self.resync_pending = false;
                self.update_platform_request(true);
            }
        }

        if self.setting_change_pending && !self.async_response_pending() {
            self.update_platform_request(false);
            self.setting_change_pending = false;
        }
    }

    /// Broadcast an advertisement batch, then give it back to the platform.
    pub fn handle_advertisement_event(&mut self, event: AdvertisingEvent) {
        trace!("advertisement batch with {} reports", event.reports.len());
        self.sink.broadcast_advertisement(&event);
        self.platform.release_advertising_event(event);
    }

    pub fn on_setting_changed(&mut self, setting: Setting, enabled: bool) {
        if setting != Setting::BleAvailable {
            return;
        }
        info!("BLE setting changed: enabled={}", enabled);
        self.ble_setting_enabled = enabled;

        if self.async_response_pending() {
            self.setting_change_pending = true;
        } else {
            self.update_platform_request(false);
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Introspection
    // ═══════════════════════════════════════════════════════════════════════

    pub fn async_response_pending(&self) -> bool {
        self.pending_platform_request.is_some()
    }

    pub fn is_ble_setting_enabled(&self) -> bool {
        self.ble_setting_enabled
    }

    pub fn requests(&self) -> &BleRequestMultiplexer {
        &self.requests
    }

    pub fn active_platform_request(&self) -> &BleRequest {
        &self.active_platform_request
    }

    pub fn pending_platform_request(&self) -> Option<&BleRequest> {
        self.pending_platform_request.as_ref()
    }

    pub fn request_log(&self) -> &RequestLog {
        &self.log
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn fault_policy(&self) -> &F {
        &self.fault
    }

    /// Human-readable dump of the manager state.
    pub fn log_state_to_buffer<W: Write>(&self, out: &mut W) -> fmt::Result {
        write!(out, "\nBLE:\n")?;
        writeln!(out, " Active Platform Request:")?;
        self.active_platform_request.log_state_to_buffer(out, true)?;
        if let Some(pending) = self.pending_platform_request.as_ref() {
            writeln!(out, " Pending Platform Request:")?;
            pending.log_state_to_buffer(out, true)?;
        }
        writeln!(out, " Request Multiplexer:")?;
        for request in self.requests.requests() {
            request.log_state_to_buffer(out, false)?;
        }
        self.log.log_state_to_buffer(out)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Internals
    // ═══════════════════════════════════════════════════════════════════════

    fn configure(&mut self, request: BleRequest) -> bool {
        if request.instance_id() == SYSTEM_INSTANCE_ID {
            warn!("request from reserved instance {} rejected", SYSTEM_INSTANCE_ID);
            return false;
        }
        if !Self::validate_params(&request) {
            warn!("request from {} has invalid filters", request.instance_id());
            return false;
        }

        let instance_id = request.instance_id();
        let enable = request.is_enabled();

        let found = self
            .requests
            .find_request(instance_id)
            .map(|(index, req)| (index, req.is_enabled(), req.status()));
        if let Some((_, was_enabled, status)) = found {
            if status != RequestStatus::Applied {
                debug!("request from {} obsoletes one in flight", instance_id);
                self.handle_async_result(
                    instance_id,
                    was_enabled,
                    false,
                    ErrorCode::ObsoleteRequest,
                    true,
                );
            }
        }

        let mut log_entry = BleRequestLog::new(self.sink.monotonic_time_ns(), instance_id, enable, true);

        if enable && !self.ble_setting_enabled {
            warn!("start scan from {} while BLE is disabled", instance_id);
            // A dropped entry must not keep receiving advertisements.
            self.handle_async_result(
                instance_id,
                true,
                false,
                ErrorCode::FunctionDisabled,
                found.is_some(),
            );
            if let Some((index, _, _)) = found {
                if let Err(e) = self.requests.remove_request(index) {
                    error!("failed to drop request from {}: {:?}", instance_id, e);
                }
            }
            log_entry.complies_with_ble_setting = false;
            self.log.push(log_entry);
            return true;
        }

        if enable {
            log_entry.populate_request_data(&request);
        }

        let updated = match found {
            Some((index, _, _)) => self
                .requests
                .update_request(index, request)
                .map(|changed| (Some(index), changed)),
            None if enable => self
                .requests
                .add_request(request)
                .map(|(index, changed)| (Some(index), changed)),
            None => Ok((None, false)),
        };
        let (index, changed) = match updated {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("request from {} rejected: {:?}", instance_id, e);
                return false;
            }
        };

        // A stop with nothing to stop needs no platform round trip.
        if index.is_none() || !self.async_response_pending() {
            if !changed {
                self.handle_async_result(instance_id, enable, true, ErrorCode::None, false);
                if let Some(index) = index {
                    self.requests.requests_mut()[index].set_status(RequestStatus::Applied);
                }
            } else if !self.control_platform() {
                warn!("platform refused scan update for {}", instance_id);
                self.handle_async_result(instance_id, enable, false, ErrorCode::Error, true);
                if let Some(index) = index {
                    if let Err(e) = self.requests.remove_request(index) {
                        error!("failed to roll back request from {}: {:?}", instance_id, e);
                    }
                }
                return false;
            }
        }

        debug!("accepted {} from {}", if enable { "start" } else { "stop" }, instance_id);
        self.log.push(log_entry);
        true
    }

    fn validate_params(request: &BleRequest) -> bool {
        if !request.is_enabled() {
            return true;
        }
        let filters = request.generic_filters();
        filters.len() <= BLE_MAX_FILTERS_PER_REQUEST
            && filters.iter().all(|filter| {
                AdType::try_from(filter.ad_type).is_ok()
                    && filter.len > 0
                    && filter.len as usize <= BLE_DATA_LEN_MAX
            })
    }

    /// Issue a platform call towards the current maximal request.
    ///
    /// Callers must have checked that no response is pending.
    fn control_platform(&mut self) -> bool {
        let enable = self.ble_setting_enabled && self.requests.is_maximal_request_enabled();

        // The maximal request carries SYSTEM_INSTANCE_ID already.
        let sent = if enable {
            self.requests.current_maximal_request().clone()
        } else {
            BleRequest::disabled(SYSTEM_INSTANCE_ID)
        };

        let issued = if sent.is_enabled() {
            info!(
                "platform start scan: mode={:?} reportDelayMs={} filters={}",
                sent.mode(),
                sent.report_delay_ms(),
                sent.generic_filters().len()
            );
            let filter = sent.scan_filter();
            self.platform
                .start_scan_async(sent.mode(), sent.report_delay_ms(), &filter)
        } else {
            info!("platform stop scan");
            self.platform.stop_scan_async()
        };

        if issued {
            self.pending_platform_request = Some(sent);
            self.requests
                .transition_requests(RequestStatus::PendingRequest, RequestStatus::PendingResponse);
        }
        issued
    }

    /// Post the outcome of the completed call to every client riding on it.
    fn resolve_pending_responses(&mut self, success: bool, error_code: ErrorCode) {
        let mut waiting: Vec<(u16, bool), BLE_MAX_CLIENTS> = Vec::new();
        for req in self.requests.requests() {
            if req.status() == RequestStatus::PendingResponse {
                let _ = waiting.push((req.instance_id(), req.is_enabled()));
            }
        }

        for (instance_id, enabled) in waiting {
            self.handle_async_result(instance_id, enabled, success, error_code, false);
        }

        if success {
            self.requests
                .transition_requests(RequestStatus::PendingResponse, RequestStatus::Applied);
        } else if let Err(e) = self.requests.remove_requests(RequestStatus::PendingResponse) {
            error!("failed to drop failed requests: {:?}", e);
        }
    }

    /// Push requests queued during the last platform call to the platform.
    fn dispatch_pending_requests(&mut self) {
        if !self.requests.has_requests(RequestStatus::PendingRequest) {
            return;
        }

        let error_code = if !self.ble_setting_enabled && self.requests.is_maximal_request_enabled() {
            ErrorCode::FunctionDisabled
        } else if !self.control_platform() {
            ErrorCode::Error
        } else {
            return;
        };

        warn!("failing queued requests: {:?}", error_code);
        let mut queued: Vec<(u16, bool), BLE_MAX_CLIENTS> = Vec::new();
        for req in self.requests.requests() {
            if req.status() == RequestStatus::PendingRequest {
                let _ = queued.push((req.instance_id(), req.is_enabled()));
            }
        }
        for (instance_id, enabled) in queued {
            self.handle_async_result(instance_id, enabled, false, error_code, false);
        }
        if let Err(e) = self.requests.remove_requests(RequestStatus::PendingRequest) {
            error!("failed to drop queued requests: {:?}", e);
        }
    }

    /// Bring the platform in line with the setting and the maximal request
    /// without any client attached to the call.
    fn update_platform_request(&mut self, force: bool) {
        let desired = self.ble_setting_enabled && self.requests.is_maximal_request_enabled();
        if !force && desired == self.active_platform_request.is_enabled() {
            return;
        }

        if self.control_platform() {
            self.internal_request_pending = true;
        } else {
            self.fatal(FatalError::PlatformControlFailed);
        }
    }

    fn handle_async_result(
        &mut self,
        instance_id: u16,
        enable: bool,
        success: bool,
        error_code: ErrorCode,
        force_unregister: bool,
    ) {
        let result = AsyncResult {
            request_type: RequestType::for_enable(enable),
            success,
            error_code: if success { ErrorCode::None } else { error_code },
        };
        if self.sink.post_async_result(instance_id, result).is_err() {
            self.fatal(FatalError::ResultDeliveryFailed { instance_id });
        }

        if success && enable {
            self.sink.set_advertisement_registration(instance_id, true);
        } else if force_unregister || (!enable && success) {
            self.sink.set_advertisement_registration(instance_id, false);
        }
    }

    fn fatal(&mut self, fault: FatalError) {
        error!("fatal BLE arbitration error: {:?}", fault);
        self.fault.on_fatal(fault);
    }
}
