//! Response classification
//!
//! Turns text lines from the parser into typed responses and parses the
//! payload lines of informational commands.

use chrono::NaiveDateTime;
use std::net::Ipv4Addr;

use super::EspError;
use crate::wifi::{AccessPoint, AddressInfo, Encryption, JoinFailure, SntpConfig, StationInfo};

/// Tokens that can end a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminal {
    /// `OK`
    Ok,
    /// `ERROR`
    Error,
    /// `FAIL`
    Fail,
    /// `SEND OK`
    SendOk,
    /// `SEND FAIL`
    SendFail,
    /// `busy p...` / `busy s...`
    Busy,
    /// Ready banner after a restart
    Ready,
    /// `>` prompt
    Prompt,
}

impl Terminal {
    /// Text used when reporting a device-side failure
    pub fn as_str(&self) -> &'static str {
        match self {
            Terminal::Ok => "OK",
            Terminal::Error => "ERROR",
            Terminal::Fail => "FAIL",
            Terminal::SendOk => "SEND OK",
            Terminal::SendFail => "SEND FAIL",
            Terminal::Busy => "busy",
            Terminal::Ready => "ready",
            Terminal::Prompt => ">",
        }
    }
}

/// A classified line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// `OK`
    Ok,
    /// `ERROR`
    Error,
    /// `FAIL`
    Fail,
    /// `SEND OK`
    SendOk,
    /// `SEND FAIL`
    SendFail,
    /// `busy`
    Busy,
    /// `ready`
    Ready,
    /// `ALREADY CONNECTED`
    AlreadyConnected,
    /// `WIFI CONNECTED`
    WifiConnected,
    /// `WIFI GOT IP`
    WifiGotIp,
    /// `WIFI DISCONNECT`
    WifiDisconnect,
    /// `<id>,CONNECT`
    Connect(u8),
    /// `<id>,CLOSED`
    Closed(u8),
    /// `<id>,CONNECT FAIL`
    ConnectFail(u8),
    /// `+STA_CONNECTED:"<mac>"`
    StationConnected(String),
    /// `+STA_DISCONNECTED:"<mac>"`
    StationDisconnected(String),
    /// `Recv N bytes` echo during a send
    Recv(usize),
    /// `+<ms>` ping reply
    PingTime(u32),
    /// `+TAG:body`
    Info {
        /// Text between `+` and `:`
        tag: String,
        /// Everything after the colon
        body: String,
    },
    /// Anything else
    Other(String),
}

impl Response {
    /// Terminal token carried by this line, if any
    pub fn terminal(&self) -> Option<Terminal> {
        match self {
            Response::Ok => Some(Terminal::Ok),
            Response::Error => Some(Terminal::Error),
            Response::Fail => Some(Terminal::Fail),
            Response::SendOk => Some(Terminal::SendOk),
            Response::SendFail => Some(Terminal::SendFail),
            Response::Busy => Some(Terminal::Busy),
            Response::Ready => Some(Terminal::Ready),
            _ => None,
        }
    }
}

/// Classify one line
pub fn classify(line: &str) -> Response {
    match line {
        "OK" => return Response::Ok,
        "ERROR" => return Response::Error,
        "FAIL" => return Response::Fail,
        "SEND OK" => return Response::SendOk,
        "SEND FAIL" => return Response::SendFail,
        "ready" => return Response::Ready,
        "ALREADY CONNECTED" => return Response::AlreadyConnected,
        "WIFI CONNECTED" => return Response::WifiConnected,
        "WIFI GOT IP" => return Response::WifiGotIp,
        "WIFI DISCONNECT" => return Response::WifiDisconnect,
        "CONNECT" => return Response::Connect(0),
        "CLOSED" => return Response::Closed(0),
        "CONNECT FAIL" => return Response::ConnectFail(0),
        _ => {}
    }

    if line.starts_with("busy") {
        return Response::Busy;
    }

    if let Some((id, rest)) = line.split_once(',') {
        if let Ok(id) = id.parse::<u8>() {
            match rest {
                "CONNECT" => return Response::Connect(id),
                "CLOSED" => return Response::Closed(id),
                "CONNECT FAIL" => return Response::ConnectFail(id),
                _ => {}
            }
        }
    }

    if let Some(n) = line
        .strip_prefix("Recv ")
        .and_then(|rest| rest.strip_suffix(" bytes"))
        .and_then(|n| n.parse::<usize>().ok())
    {
        return Response::Recv(n);
    }

    if let Some(rest) = line.strip_prefix('+') {
        if !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(ms) = rest.parse::<u32>() {
                return Response::PingTime(ms);
            }
        }
        if let Some((tag, body)) = rest.split_once(':') {
            match tag {
                "STA_CONNECTED" => return Response::StationConnected(unquote(body)),
                "STA_DISCONNECTED" => return Response::StationDisconnected(unquote(body)),
                _ => {
                    return Response::Info {
                        tag: tag.to_string(),
                        body: body.to_string(),
                    }
                }
            }
        }
    }

    Response::Other(line.to_string())
}

fn unquote(s: &str) -> String {
    let s = s.trim();
    s.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(s)
        .to_string()
}

/// Split a comma separated field list, honouring quotes and `\` escapes
///
/// Surrounding parentheses (as in `+CWLAP:(...)`) are removed first.
pub fn split_fields(body: &str) -> Vec<String> {
    let body = body.trim();
    let body = body
        .strip_prefix('(')
        .and_then(|b| b.strip_suffix(')'))
        .unwrap_or(body);

    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = body.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' if in_quotes => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

fn field<'a>(fields: &'a [String], index: usize, what: &str) -> Result<&'a str, EspError> {
    fields
        .get(index)
        .map(|s| s.as_str())
        .ok_or_else(|| EspError::InvalidResponse(format!("missing {what}")))
}

fn number<T: std::str::FromStr>(value: &str, what: &str) -> Result<T, EspError> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| EspError::InvalidResponse(format!("bad {what}: {value:?}")))
}

fn ipv4(value: &str) -> Result<Ipv4Addr, EspError> {
    value
        .trim()
        .parse::<Ipv4Addr>()
        .map_err(|_| EspError::InvalidResponse(format!("bad IPv4 address: {value:?}")))
}

/// Parse the body of a `+CWLAP:` line
pub fn parse_access_point(body: &str) -> Result<AccessPoint, EspError> {
    let fields = split_fields(body);
    Ok(AccessPoint {
        encryption: Encryption::from_code(number(field(&fields, 0, "encryption")?, "encryption")?),
        ssid: field(&fields, 1, "ssid")?.to_string(),
        rssi: number(field(&fields, 2, "rssi")?, "rssi")?,
        mac: field(&fields, 3, "mac")?.to_string(),
        channel: number(field(&fields, 4, "channel")?, "channel")?,
    })
}

/// Apply the body of one `+CIFSR:` line to `info`
pub fn parse_cifsr(body: &str, info: &mut AddressInfo) -> Result<(), EspError> {
    let fields = split_fields(body);
    let kind = field(&fields, 0, "address kind")?;
    let value = field(&fields, 1, "address")?;

    match kind {
        "STAIP" => info.station_ip = Some(ipv4(value)?),
        "STAMAC" => info.station_mac = Some(value.to_string()),
        "APIP" => info.ap_ip = Some(ipv4(value)?),
        "APMAC" => info.ap_mac = Some(value.to_string()),
        // IPv6 and gateway entries on newer firmware
        _ => {}
    }
    Ok(())
}

/// Parse one `AT+CWLIF` line (`<ip>,<mac>`)
pub fn parse_station(line: &str) -> Result<StationInfo, EspError> {
    let fields = split_fields(line);
    Ok(StationInfo {
        ip: ipv4(field(&fields, 0, "station ip")?)?,
        mac: field(&fields, 1, "station mac")?.to_string(),
    })
}

/// Parse the body of `+CIPSNTPCFG:`
pub fn parse_sntp_config(body: &str) -> Result<SntpConfig, EspError> {
    let fields = split_fields(body);
    let enabled = number::<u8>(field(&fields, 0, "sntp enable flag")?, "sntp enable flag")? != 0;
    let timezone = match fields.get(1) {
        Some(tz) => number::<i8>(tz, "timezone")?,
        None => 0,
    };
    let servers = fields
        .iter()
        .skip(2)
        .filter(|s| !s.is_empty())
        .cloned()
        .collect();

    Ok(SntpConfig {
        enabled,
        timezone,
        servers,
    })
}

/// Parse the body of `+CIPSNTPTIME:` (e.g. `Thu Aug 04 14:48:05 2016`)
pub fn parse_sntp_time(body: &str) -> Result<NaiveDateTime, EspError> {
    let parts: Vec<&str> = body.split_whitespace().collect();
    if parts.len() != 5 {
        return Err(EspError::InvalidResponse(format!("bad SNTP time: {body:?}")));
    }
    // The module pads single digit days with a space rather than a zero
    let normalized = format!(
        "{} {} {:0>2} {} {}",
        parts[0], parts[1], parts[2], parts[3], parts[4]
    );
    NaiveDateTime::parse_from_str(&normalized, "%a %b %d %H:%M:%S %Y")
        .map_err(|e| EspError::InvalidResponse(format!("bad SNTP time {body:?}: {e}")))
}

/// Parse the body of `+CWJAP:<n>` reported before a failed join
pub fn parse_join_failure(body: &str) -> Option<JoinFailure> {
    body.trim().parse::<u8>().ok().map(JoinFailure::from_code)
}
