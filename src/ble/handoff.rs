//! Platform → event loop handoff.
//!
//! Platform callbacks may fire from an interrupt or a vendor thread. They
//! never touch manager state directly: each one is queued on a FIFO
//! channel and the event loop feeds them to
//! [`crate::ble::BleRequestManager::handle_platform_event`] in the order
//! the platform raised them. This is the only cross-context boundary in
//! the crate.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, Receiver, Sender, TrySendError};

use crate::ble::AdvertisingEvent;
use crate::config::PLATFORM_EVENT_QUEUE_DEPTH;
use crate::error::{Error, ErrorCode};

/// A platform callback, deferred onto the event loop.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PlatformEvent {
    /// The last start/stop completed; `enabled` is the state the radio is
    /// now in.
    ScanStatusChange { enabled: bool, error_code: ErrorCode },
    /// The platform can no longer vouch for the last commanded state.
    ResyncRequested,
    /// A batch of advertisements.
    Advertisement(AdvertisingEvent),
}

pub type PlatformEventChannel =
    Channel<CriticalSectionRawMutex, PlatformEvent, PLATFORM_EVENT_QUEUE_DEPTH>;

pub type PlatformEventSender<'a> =
    Sender<'a, CriticalSectionRawMutex, PlatformEvent, PLATFORM_EVENT_QUEUE_DEPTH>;

pub type PlatformEventReceiver<'a> =
    Receiver<'a, CriticalSectionRawMutex, PlatformEvent, PLATFORM_EVENT_QUEUE_DEPTH>;

/// Producer side handed to the platform layer.
///
/// Every method is non-blocking and safe to call from interrupt context.
#[derive(Clone, Copy)]
pub struct PlatformCallbacks<'a> {
    sender: PlatformEventSender<'a>,
}

impl<'a> PlatformCallbacks<'a> {
    pub fn new(channel: &'a PlatformEventChannel) -> Self {
        Self {
            sender: channel.sender(),
        }
    }

    pub fn request_state_resync(&self) -> Result<(), Error> {
        self.post(PlatformEvent::ResyncRequested)
    }

    pub fn scan_status_change(&self, enabled: bool, error_code: ErrorCode) -> Result<(), Error> {
        self.post(PlatformEvent::ScanStatusChange {
            enabled,
            error_code,
        })
    }

    /// Queue an advertisement batch. On failure the batch is handed back
    /// so the caller can release it.
    pub fn advertising_event(&self, event: AdvertisingEvent) -> Result<(), AdvertisingEvent> {
        let Err(TrySendError::Full(bounced)) = self.sender.try_send(PlatformEvent::Advertisement(event)) else {
            return Ok(());
        };
        warn!("platform event queue full, advertisement batch bounced");
        match bounced {
            PlatformEvent::Advertisement(event) => Err(event),
            // try_send hands back exactly what it was given.
            _ => Ok(()),
        }
    }

    fn post(&self, event: PlatformEvent) -> Result<(), Error> {
        self.sender.try_send(event).map_err(|_| {
            warn!("platform event queue full");
            Error::EventQueueFull
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::AdvertisingReport;

    fn advert(rssi: i8) -> AdvertisingEvent {
        let mut event = AdvertisingEvent::default();
        event
            .reports
            .push(AdvertisingReport {
                timestamp_ns: 0,
                address: [1, 2, 3, 4, 5, 6],
                rssi,
                data: heapless::Vec::new(),
            })
            .unwrap();
        event
    }

    #[test]
    fn callbacks_preserve_fifo_order() {
        let channel = PlatformEventChannel::new();
        let callbacks = PlatformCallbacks::new(&channel);

        callbacks.scan_status_change(true, ErrorCode::None).unwrap();
        callbacks.request_state_resync().unwrap();
        callbacks.advertising_event(advert(-40)).unwrap();

        assert_eq!(
            channel.try_receive(),
            Ok(PlatformEvent::ScanStatusChange {
                enabled: true,
                error_code: ErrorCode::None
            })
        );
        assert_eq!(channel.try_receive(), Ok(PlatformEvent::ResyncRequested));
        assert_eq!(
            channel.try_receive(),
            Ok(PlatformEvent::Advertisement(advert(-40)))
        );
        assert!(channel.try_receive().is_err());
    }

    #[test]
    fn full_queue_is_reported() {
        let channel = PlatformEventChannel::new();
        let callbacks = PlatformCallbacks::new(&channel);
        for _ in 0..PLATFORM_EVENT_QUEUE_DEPTH {
            callbacks.request_state_resync().unwrap();
        }
        assert_eq!(callbacks.request_state_resync(), Err(Error::EventQueueFull));
    }

    #[test]
    fn rejected_advertisement_is_handed_back() {
        let channel = PlatformEventChannel::new();
        let callbacks = PlatformCallbacks::new(&channel);
        for _ in 0..PLATFORM_EVENT_QUEUE_DEPTH {
            callbacks.request_state_resync().unwrap();
        }
        assert_eq!(callbacks.advertising_event(advert(-55)), Err(advert(-55)));
    }
}
