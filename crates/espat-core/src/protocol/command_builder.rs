//! Command Builder
//!
//! Builds AT command requests from typed arguments.
//!
//! String arguments are quoted, with `\`, `"` and `,` escaped by a backslash
//! as the module's command parser requires.

use super::commands::{CommandKind, Request, SendProgress};
use super::EspError;
use crate::connection::{ConnectionId, ConnectionType};
use crate::wifi::{Encryption, SntpConfig, SoftApConfig, TransferMode, WifiMode};

const MAX_SSID_LEN: usize = 32;
const MAX_PASSWORD_LEN: usize = 64;

/// Quote a string argument
pub fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if matches!(c, '\\' | '"' | ',') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

fn non_empty(value: &str, what: &str) -> Result<(), EspError> {
    if value.is_empty() {
        return Err(EspError::InvalidArgument(format!("{what} must not be empty")));
    }
    if value.contains(['\r', '\n']) {
        return Err(EspError::InvalidArgument(format!(
            "{what} must not contain line breaks"
        )));
    }
    Ok(())
}

fn max_len(value: &str, max: usize, what: &str) -> Result<(), EspError> {
    if value.len() > max {
        return Err(EspError::InvalidArgument(format!(
            "{what} longer than {max} bytes"
        )));
    }
    Ok(())
}

/// `AT`
pub fn probe() -> Request {
    Request::new(CommandKind::Probe, "AT")
}

/// `ATE0`
pub fn echo_off() -> Request {
    Request::new(CommandKind::EchoOff, "ATE0")
}

/// `AT+RST`
pub fn reset() -> Request {
    Request::new(CommandKind::Reset, "AT+RST")
}

/// Enable or disable multiple connections
pub fn set_mux(enabled: bool) -> Request {
    Request::new(
        CommandKind::SetMux,
        format!("AT+CIPMUX={}", u8::from(enabled)),
    )
}

/// Include remote ip and port in `+IPD` headers
pub fn set_remote_info(enabled: bool) -> Request {
    Request::new(
        CommandKind::SetRemoteInfo,
        format!("AT+CIPDINFO={}", u8::from(enabled)),
    )
}

/// `AT+CWMODE=<mode>`
pub fn set_wifi_mode(mode: WifiMode) -> Request {
    Request::new(
        CommandKind::SetWifiMode(mode),
        format!("AT+CWMODE={}", mode.code()),
    )
}

/// Join an access point, optionally pinned to a BSSID
pub fn join(ssid: &str, password: &str, bssid: Option<&str>) -> Result<Request, EspError> {
    non_empty(ssid, "SSID")?;
    max_len(ssid, MAX_SSID_LEN, "SSID")?;
    max_len(password, MAX_PASSWORD_LEN, "password")?;

    let mut text = format!("AT+CWJAP={},{}", quote(ssid), quote(password));
    if let Some(bssid) = bssid {
        non_empty(bssid, "BSSID")?;
        text.push(',');
        text.push_str(&quote(bssid));
    }
    Ok(Request::new(CommandKind::Join, text))
}

/// `AT+CWQAP`
pub fn leave() -> Request {
    Request::new(CommandKind::Leave, "AT+CWQAP")
}

/// `AT+CWLAP`
pub fn list_access_points() -> Request {
    Request::new(CommandKind::ListAccessPoints, "AT+CWLAP")
}

/// `AT+CIFSR`
pub fn query_addresses() -> Request {
    Request::new(CommandKind::QueryAddresses, "AT+CIFSR")
}

/// `AT+CWSAP=...`
pub fn configure_soft_ap(config: &SoftApConfig) -> Result<Request, EspError> {
    non_empty(&config.ssid, "SSID")?;
    max_len(&config.ssid, MAX_SSID_LEN, "SSID")?;
    max_len(&config.password, MAX_PASSWORD_LEN, "password")?;
    if !(1..=14).contains(&config.channel) {
        return Err(EspError::InvalidArgument(format!(
            "channel {} out of range",
            config.channel
        )));
    }
    if !(1..=4).contains(&config.max_connections) {
        return Err(EspError::InvalidArgument(format!(
            "max_connections {} out of range",
            config.max_connections
        )));
    }
    if config.encryption == Encryption::Wep {
        return Err(EspError::InvalidArgument(
            "WEP is not supported for the soft AP".to_string(),
        ));
    }
    if config.encryption != Encryption::Open && config.password.len() < 8 {
        return Err(EspError::InvalidArgument(
            "password must be at least 8 bytes".to_string(),
        ));
    }

    Ok(Request::new(
        CommandKind::ConfigureSoftAp,
        format!(
            "AT+CWSAP={},{},{},{},{},{}",
            quote(&config.ssid),
            quote(&config.password),
            config.channel,
            config.encryption.code(),
            config.max_connections,
            u8::from(config.hidden)
        ),
    ))
}

/// `AT+CWLIF`
pub fn list_stations() -> Request {
    Request::new(CommandKind::ListStations, "AT+CWLIF")
}

/// `AT+CIPSTART=<id>,"<type>","<host>",<port>`
pub fn connect(
    id: ConnectionId,
    kind: ConnectionType,
    host: &str,
    port: u16,
) -> Result<Request, EspError> {
    non_empty(host, "host")?;
    if port == 0 {
        return Err(EspError::InvalidArgument("port must be non-zero".to_string()));
    }
    Ok(Request::new(
        CommandKind::Connect(id),
        format!(
            "AT+CIPSTART={},{},{},{}",
            id,
            quote(kind.as_at_str()),
            quote(host),
            port
        ),
    ))
}

/// Announce the next chunk of `progress`
pub fn send_header(id: ConnectionId, chunk_len: usize) -> Request {
    Request::new(
        CommandKind::Send(id),
        format!("AT+CIPSEND={id},{chunk_len}"),
    )
}

/// Start a chunked send of `data`
pub fn send(id: ConnectionId, data: Vec<u8>, max_chunk: usize) -> Result<Request, EspError> {
    if data.is_empty() {
        return Err(EspError::InvalidArgument("payload must not be empty".to_string()));
    }
    let progress = SendProgress::new(data, max_chunk);
    Ok(send_header(id, progress.chunk_len()).with_send(progress))
}

/// `AT+CIPCLOSE=<id>`
pub fn close(id: ConnectionId) -> Request {
    Request::new(CommandKind::Close(id), format!("AT+CIPCLOSE={id}"))
}

/// `AT+CIPSERVER=1,<port>`
pub fn server_enable(port: u16) -> Result<Request, EspError> {
    if port == 0 {
        return Err(EspError::InvalidArgument("port must be non-zero".to_string()));
    }
    Ok(Request::new(
        CommandKind::ServerEnable(port),
        format!("AT+CIPSERVER=1,{port}"),
    ))
}

/// `AT+CIPSERVER=0`
pub fn server_disable() -> Request {
    Request::new(CommandKind::ServerDisable, "AT+CIPSERVER=0")
}

/// Idle timeout for server-side links, 0..=7200 seconds
pub fn server_timeout(seconds: u16) -> Result<Request, EspError> {
    if seconds > 7200 {
        return Err(EspError::InvalidArgument(format!(
            "server timeout {seconds}s exceeds 7200s"
        )));
    }
    Ok(Request::new(
        CommandKind::ServerTimeout,
        format!("AT+CIPSTO={seconds}"),
    ))
}

/// `AT+PING="<host>"`
pub fn ping(host: &str) -> Result<Request, EspError> {
    non_empty(host, "host")?;
    Ok(Request::new(CommandKind::Ping, format!("AT+PING={}", quote(host))))
}

/// `AT+CIPSNTPCFG?`
pub fn sntp_get_config() -> Request {
    Request::new(CommandKind::SntpGetConfig, "AT+CIPSNTPCFG?")
}

/// `AT+CIPSNTPCFG=...`
pub fn sntp_set_config(config: &SntpConfig) -> Result<Request, EspError> {
    if !(-11..=13).contains(&config.timezone) {
        return Err(EspError::InvalidArgument(format!(
            "timezone {} out of range",
            config.timezone
        )));
    }
    if config.servers.len() > 3 {
        return Err(EspError::InvalidArgument(
            "at most three SNTP servers".to_string(),
        ));
    }

    let mut text = format!(
        "AT+CIPSNTPCFG={},{}",
        u8::from(config.enabled),
        config.timezone
    );
    for server in &config.servers {
        non_empty(server, "SNTP server")?;
        text.push(',');
        text.push_str(&quote(server));
    }
    Ok(Request::new(CommandKind::SntpSetConfig, text))
}

/// `AT+CIPSNTPTIME?`
pub fn sntp_time() -> Request {
    Request::new(CommandKind::SntpGetTime, "AT+CIPSNTPTIME?")
}

/// `AT+CIPMODE=<0|1>`
pub fn set_transfer_mode(mode: TransferMode) -> Request {
    let code = match mode {
        TransferMode::Normal => 0,
        TransferMode::Transparent => 1,
    };
    Request::new(
        CommandKind::SetTransferMode(mode),
        format!("AT+CIPMODE={code}"),
    )
}

/// `AT+CIPSEND` in transparent mode
pub fn transparent_start() -> Request {
    Request::new(CommandKind::TransparentStart, "AT+CIPSEND")
}

/// `+++` with no line terminator
pub fn transparent_stop() -> Request {
    Request::bare(CommandKind::TransparentStop, b"+++")
}

/// Arbitrary command line, terminated with `\r\n`
pub fn raw(text: &str) -> Result<Request, EspError> {
    non_empty(text, "command")?;
    Ok(Request::new(CommandKind::Raw, text))
}
