//! Unified error types for blemux.
//!
//! We avoid `alloc` - all error variants carry only fixed-size data.
//! Implements `defmt::Format` (behind the `defmt` feature) for efficient
//! on-target logging.

/// Top-level error type used across the library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// A parameter was outside its allowed range.
    InvalidArgument,

    /// More generic filters were supplied than a request can hold.
    TooManyFilters,

    /// Merging requests would overflow the merged filter list.
    FilterCapacity,

    /// Every client slot in the multiplexer is already taken.
    ClientCapacity,

    /// The platform → event loop handoff queue is full.
    EventQueueFull,
}

/// Error codes delivered to clients in asynchronous results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ErrorCode {
    /// No error occurred.
    None = 0,
    /// An unspecified failure occurred.
    Error = 1,
    /// One or more supplied arguments are invalid.
    InvalidArgument = 2,
    /// Unable to satisfy request because the system is busy.
    Busy = 3,
    /// Unable to allocate memory.
    NoMemory = 4,
    /// The requested feature is not supported.
    NotSupported = 5,
    /// A timeout occurred while processing the request.
    Timeout = 6,
    /// The relevant capability is disabled by a global setting.
    FunctionDisabled = 7,
    /// The request was rejected due to rate limiting.
    RejectedRateLimit = 8,
    /// The function is in use by another master.
    FunctionRestrictedToOtherMaster = 9,
    /// The request was superseded by a newer request from the same client.
    ObsoleteRequest = 10,
}

impl ErrorCode {
    /// Decode a raw code reported by the platform. Unknown values map to
    /// [`ErrorCode::Error`].
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0 => ErrorCode::None,
            1 => ErrorCode::Error,
            2 => ErrorCode::InvalidArgument,
            3 => ErrorCode::Busy,
            4 => ErrorCode::NoMemory,
            5 => ErrorCode::NotSupported,
            6 => ErrorCode::Timeout,
            7 => ErrorCode::FunctionDisabled,
            8 => ErrorCode::RejectedRateLimit,
            9 => ErrorCode::FunctionRestrictedToOtherMaster,
            10 => ErrorCode::ObsoleteRequest,
            _ => ErrorCode::Error,
        }
    }

    pub fn is_success(self) -> bool {
        self == ErrorCode::None
    }
}

impl From<ErrorCode> for u8 {
    fn from(code: ErrorCode) -> Self {
        code as u8
    }
}

/// Unrecoverable conditions. There is no client to report these to and
/// the radio state can no longer be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FatalError {
    /// A resync or setting-driven platform request failed.
    InternalRequestFailed,

    /// The platform confirmed a different scan state than it was asked for.
    UnexpectedPlatformState { requested: bool, reported: bool },

    /// An internal platform request could not even be issued.
    PlatformControlFailed,

    /// An async result could not be posted to a client.
    ResultDeliveryFailed { instance_id: u16 },

    /// The platform completed a request that was never issued.
    UnsolicitedPlatformResponse,
}

/// What to do when a [`FatalError`] occurs.
///
/// Firmware keeps the default [`PanicOnFault`]: the panic handler halts
/// the core and the supervisor restarts the runtime. A hosted build can
/// inject a policy that records the fault and returns, in which case the
/// manager continues on its degraded path.
pub trait FaultPolicy {
    fn on_fatal(&mut self, fault: FatalError);
}

/// Default fault policy: panic.
#[derive(Debug, Default, Clone, Copy)]
pub struct PanicOnFault;

impl FaultPolicy for PanicOnFault {
    fn on_fatal(&mut self, fault: FatalError) {
        panic!("fatal BLE arbitration error: {:?}", fault);
    }
}
