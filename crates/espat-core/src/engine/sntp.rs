//! SNTP client operations

use chrono::NaiveDateTime;

use super::{unexpected, Engine};
use crate::protocol::{command_builder, CommandOutput, CommandTicket, EspError};
use crate::wifi::SntpConfig;

impl Engine {
    /// Query the SNTP settings
    pub fn start_sntp_config(&mut self) -> Result<CommandTicket, EspError> {
        self.issue(command_builder::sntp_get_config())
    }

    /// Query the SNTP settings and wait
    pub fn sntp_config(&mut self) -> Result<SntpConfig, EspError> {
        match self.blocking(|e| e.start_sntp_config())? {
            CommandOutput::SntpConfig(config) => Ok(config),
            other => Err(unexpected(other)),
        }
    }

    /// Apply SNTP settings
    pub fn start_set_sntp_config(&mut self, config: &SntpConfig) -> Result<CommandTicket, EspError> {
        self.issue(command_builder::sntp_set_config(config)?)
    }

    /// Apply SNTP settings and wait
    pub fn set_sntp_config(&mut self, config: &SntpConfig) -> Result<(), EspError> {
        self.blocking(|e| e.start_set_sntp_config(config)).map(drop)
    }

    /// Local time from the module's SNTP client, in its configured timezone
    pub fn start_sntp_time(&mut self) -> Result<CommandTicket, EspError> {
        self.issue(command_builder::sntp_time())
    }

    /// Fetch the module time and wait
    pub fn sntp_time(&mut self) -> Result<NaiveDateTime, EspError> {
        match self.blocking(|e| e.start_sntp_time())? {
            CommandOutput::SntpTime(time) => Ok(time),
            other => Err(unexpected(other)),
        }
    }
}
