//! Module setup, station and soft-AP operations

use super::{unexpected, Engine};
use crate::protocol::{command_builder, CommandOutput, CommandTicket, EspError};
use crate::wifi::{AccessPoint, AddressInfo, SoftApConfig, StationInfo, WifiMode};

impl Engine {
    /// Probe the module and put it in the mode the engine expects
    ///
    /// Runs `AT`, `ATE0`, `AT+CIPMUX=1` and `AT+CIPDINFO=0` in order; the
    /// ticket resolves when the last one succeeds or any one fails.
    pub fn start_initialize(&mut self) -> Result<CommandTicket, EspError> {
        self.start_workflow(vec![
            command_builder::probe(),
            command_builder::echo_off(),
            command_builder::set_mux(true),
            command_builder::set_remote_info(false),
        ])
    }

    /// Probe the module and disable echo
    pub fn initialize(&mut self) -> Result<(), EspError> {
        self.blocking(|e| e.start_initialize()).map(drop)
    }

    /// Restart the module; resolves on the ready banner
    pub fn start_reset(&mut self) -> Result<CommandTicket, EspError> {
        self.issue(command_builder::reset())
    }

    /// Restart the module and wait for the ready banner
    pub fn reset(&mut self) -> Result<(), EspError> {
        self.blocking(|e| e.start_reset()).map(drop)
    }

    /// Select station, soft AP or both
    pub fn start_set_wifi_mode(&mut self, mode: WifiMode) -> Result<CommandTicket, EspError> {
        self.issue(command_builder::set_wifi_mode(mode))
    }

    /// Select the WiFi mode and wait
    pub fn set_wifi_mode(&mut self, mode: WifiMode) -> Result<(), EspError> {
        self.blocking(|e| e.start_set_wifi_mode(mode)).map(drop)
    }

    /// Join an access point
    ///
    /// A failed join reports the module's reason through
    /// [`Event::WifiJoinFailed`](crate::event::Event::WifiJoinFailed) and
    /// [`WifiStatus::last_join_failure`](crate::wifi::WifiStatus).
    pub fn start_join(
        &mut self,
        ssid: &str,
        password: &str,
        bssid: Option<&str>,
    ) -> Result<CommandTicket, EspError> {
        self.issue(command_builder::join(ssid, password, bssid)?)
    }

    /// Join an access point and wait
    pub fn join(&mut self, ssid: &str, password: &str) -> Result<(), EspError> {
        self.blocking(|e| e.start_join(ssid, password, None)).map(drop)
    }

    /// Disconnect from the access point
    pub fn start_leave(&mut self) -> Result<CommandTicket, EspError> {
        self.issue(command_builder::leave())
    }

    /// Disconnect and wait
    pub fn leave(&mut self) -> Result<(), EspError> {
        self.blocking(|e| e.start_leave()).map(drop)
    }

    /// List visible access points; also raised as a scan-result event
    pub fn start_scan(&mut self) -> Result<CommandTicket, EspError> {
        self.issue(command_builder::list_access_points())
    }

    /// Scan for access points and wait
    pub fn scan(&mut self) -> Result<Vec<AccessPoint>, EspError> {
        match self.blocking(|e| e.start_scan())? {
            CommandOutput::AccessPoints(list) => Ok(list),
            other => Err(unexpected(other)),
        }
    }

    /// Read local addresses; the status snapshot is updated as well
    pub fn start_query_addresses(&mut self) -> Result<CommandTicket, EspError> {
        self.issue(command_builder::query_addresses())
    }

    /// Query local addresses and wait
    pub fn query_addresses(&mut self) -> Result<AddressInfo, EspError> {
        match self.blocking(|e| e.start_query_addresses())? {
            CommandOutput::Addresses(info) => Ok(info),
            other => Err(unexpected(other)),
        }
    }

    /// Apply soft AP settings
    pub fn start_configure_soft_ap(
        &mut self,
        config: &SoftApConfig,
    ) -> Result<CommandTicket, EspError> {
        self.issue(command_builder::configure_soft_ap(config)?)
    }

    /// Apply soft AP settings and wait
    pub fn configure_soft_ap(&mut self, config: &SoftApConfig) -> Result<(), EspError> {
        self.blocking(|e| e.start_configure_soft_ap(config)).map(drop)
    }

    /// Stations attached to the soft AP
    pub fn start_list_stations(&mut self) -> Result<CommandTicket, EspError> {
        self.issue(command_builder::list_stations())
    }

    /// List stations attached to the soft AP and wait
    pub fn list_stations(&mut self) -> Result<Vec<StationInfo>, EspError> {
        match self.blocking(|e| e.start_list_stations())? {
            CommandOutput::Stations(list) => Ok(list),
            other => Err(unexpected(other)),
        }
    }
}
