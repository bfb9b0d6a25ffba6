//! WiFi data types
//!
//! Values reported by station, soft-AP and SNTP commands.

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

/// Radio operating mode (`AT+CWMODE`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WifiMode {
    /// Client of an access point
    Station,
    /// Access point
    SoftAp,
    /// Both at once
    StationAndSoftAp,
}

impl WifiMode {
    /// Numeric code used by the command set
    pub fn code(&self) -> u8 {
        match self {
            WifiMode::Station => 1,
            WifiMode::SoftAp => 2,
            WifiMode::StationAndSoftAp => 3,
        }
    }

    /// Decode the `AT+CWMODE` value
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(WifiMode::Station),
            2 => Some(WifiMode::SoftAp),
            3 => Some(WifiMode::StationAndSoftAp),
            _ => None,
        }
    }

    /// Station interface enabled
    pub fn has_station(&self) -> bool {
        matches!(self, WifiMode::Station | WifiMode::StationAndSoftAp)
    }

    /// Soft-AP interface enabled
    pub fn has_soft_ap(&self) -> bool {
        matches!(self, WifiMode::SoftAp | WifiMode::StationAndSoftAp)
    }
}

/// Access point security
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Encryption {
    /// No security
    Open,
    /// WEP
    Wep,
    /// WPA-PSK
    WpaPsk,
    /// WPA2-PSK
    Wpa2Psk,
    /// WPA/WPA2-PSK
    WpaWpa2Psk,
    /// WPA2 Enterprise
    Wpa2Enterprise,
    /// Code not known to this crate
    Unknown(u8),
}

impl Encryption {
    /// Numeric code used by the module
    pub fn code(&self) -> u8 {
        match self {
            Encryption::Open => 0,
            Encryption::Wep => 1,
            Encryption::WpaPsk => 2,
            Encryption::Wpa2Psk => 3,
            Encryption::WpaWpa2Psk => 4,
            Encryption::Wpa2Enterprise => 5,
            Encryption::Unknown(code) => *code,
        }
    }

    /// Decode a numeric code
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Encryption::Open,
            1 => Encryption::Wep,
            2 => Encryption::WpaPsk,
            3 => Encryption::Wpa2Psk,
            4 => Encryption::WpaWpa2Psk,
            5 => Encryption::Wpa2Enterprise,
            other => Encryption::Unknown(other),
        }
    }
}

/// One `+CWLAP` scan entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPoint {
    /// Security of the network
    pub encryption: Encryption,
    /// Network name
    pub ssid: String,
    /// Signal strength in dBm
    pub rssi: i16,
    /// BSSID
    pub mac: String,
    /// WiFi channel
    pub channel: u8,
}

/// A station attached to our soft AP (`AT+CWLIF`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationInfo {
    /// Address leased to the station
    pub ip: Ipv4Addr,
    /// Station MAC
    pub mac: String,
}

/// Local addresses reported by `AT+CIFSR`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressInfo {
    /// Station interface address
    pub station_ip: Option<Ipv4Addr>,
    /// Station interface MAC
    pub station_mac: Option<String>,
    /// Soft AP address
    pub ap_ip: Option<Ipv4Addr>,
    /// Soft AP MAC
    pub ap_mac: Option<String>,
}

/// Reason code from `+CWJAP:<n>` before a failed join
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinFailure {
    /// No answer from the access point
    Timeout,
    /// Rejected credentials
    WrongPassword,
    /// Access point not found
    NoAccessPoint,
    /// Association failed
    ConnectFailed,
    /// Code not known to this crate
    Unknown(u8),
}

impl JoinFailure {
    /// Decode the `+CWJAP:<n>` code
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => JoinFailure::Timeout,
            2 => JoinFailure::WrongPassword,
            3 => JoinFailure::NoAccessPoint,
            4 => JoinFailure::ConnectFailed,
            other => JoinFailure::Unknown(other),
        }
    }
}

/// Soft AP settings (`AT+CWSAP`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoftApConfig {
    /// Network name
    pub ssid: String,
    /// Passphrase; empty for an open network
    pub password: String,
    /// WiFi channel
    pub channel: u8,
    /// Security
    pub encryption: Encryption,
    /// Maximum attached stations (1..=4)
    pub max_connections: u8,
    /// Hide the SSID from scans
    pub hidden: bool,
}

impl Default for SoftApConfig {
    fn default() -> Self {
        Self {
            ssid: String::new(),
            password: String::new(),
            channel: 1,
            encryption: Encryption::Wpa2Psk,
            max_connections: 4,
            hidden: false,
        }
    }
}

/// SNTP client settings (`AT+CIPSNTPCFG`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SntpConfig {
    /// Client enabled
    pub enabled: bool,
    /// UTC offset in hours (-11..=13)
    pub timezone: i8,
    /// Up to three server names
    pub servers: Vec<String>,
}

impl Default for SntpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timezone: 0,
            servers: vec!["pool.ntp.org".to_string()],
        }
    }
}

/// Data path mode (`AT+CIPMODE`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TransferMode {
    /// Framed `AT+CIPSEND` / `+IPD`
    #[default]
    Normal,
    /// Raw passthrough on a single link
    Transparent,
}

/// Snapshot of the module's WiFi state as observed by the engine
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WifiStatus {
    /// Configured WiFi mode, once known
    pub mode: Option<WifiMode>,
    /// Associated with an access point
    pub station_connected: bool,
    /// Station has an address
    pub has_ip: bool,
    /// Last `AT+CIFSR` result
    pub addresses: AddressInfo,
    /// Reason of the last failed join
    pub last_join_failure: Option<JoinFailure>,
    /// Port of the module's TCP server, if enabled
    pub server_port: Option<u16>,
    /// Normal or transparent transfer
    pub transfer_mode: TransferMode,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_codes() {
        for mode in [
            WifiMode::Station,
            WifiMode::SoftAp,
            WifiMode::StationAndSoftAp,
        ] {
            assert_eq!(WifiMode::from_code(mode.code()), Some(mode));
        }
        assert_eq!(WifiMode::from_code(0), None);
        assert!(WifiMode::StationAndSoftAp.has_station());
        assert!(!WifiMode::SoftAp.has_station());
    }

    #[test]
    fn test_unknown_codes_are_preserved() {
        assert_eq!(Encryption::from_code(9), Encryption::Unknown(9));
        assert_eq!(Encryption::Unknown(9).code(), 9);
        assert_eq!(JoinFailure::from_code(2), JoinFailure::WrongPassword);
        assert_eq!(JoinFailure::from_code(7), JoinFailure::Unknown(7));
    }
}
