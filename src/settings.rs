//! Global policy settings that can force-disable a capability
//! independently of any client request.

/// User/system settings the runtime tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Setting {
    Location,
    WifiAvailable,
    AirplaneMode,
    Microphone,
    /// Governs whether BLE scanning is available at all.
    BleAvailable,
}
