mod common;

use common::default_harness;
use espat_core::buffer::rx_buffer;
use espat_core::clock::Clock;
use espat_core::config::EngineConfig;
use espat_core::connection::ConnectionType;
use espat_core::engine::{Engine, Platform};
use espat_core::event::Event;
use espat_core::protocol::{CommandKind, CommandOutput, EspError};
use espat_core::wifi::{Encryption, JoinFailure, WifiMode};
use pretty_assertions::assert_eq;

#[test]
fn test_set_mode_succeeds_then_idles() {
    let mut h = default_harness();
    h.sim.respond("AT+CWMODE=3", "\r\nOK\r\n");

    h.engine.set_wifi_mode(WifiMode::StationAndSoftAp).unwrap();

    assert_eq!(h.sim.sent(), vec!["AT+CWMODE=3"]);
    assert_eq!(h.engine.status().mode, Some(WifiMode::StationAndSoftAp));
    assert_eq!(h.engine.last_status(), Some(&Ok(())));
    assert!(h.engine.is_idle());
    assert_eq!(h.event_names(), vec!["idle"]);
}

#[test]
fn test_second_command_is_refused_while_one_is_pending() {
    let mut h = default_harness();
    let first = h.engine.start_set_wifi_mode(WifiMode::Station).unwrap();

    assert_eq!(h.engine.start_scan(), Err(EspError::Busy));
    assert_eq!(h.sim.sent(), vec!["AT+CWMODE=1"]);
    assert_eq!(
        h.engine.pending_command().map(|p| p.kind),
        Some(CommandKind::SetWifiMode(WifiMode::Station))
    );

    h.sim.inject(b"\r\nOK\r\n");
    h.engine.update();
    assert_eq!(h.engine.poll(first), Some(Ok(CommandOutput::None)));
    assert!(h.engine.start_scan().is_ok());
}

#[test]
fn test_timeout_fires_exactly_once() {
    let mut h = default_harness();
    let ticket = h.engine.start_set_wifi_mode(WifiMode::Station).unwrap();

    h.clock.advance_time(1999);
    h.engine.update();
    assert_eq!(h.engine.poll(ticket), None);

    h.clock.advance_time(1);
    h.engine.update();
    assert_eq!(h.engine.poll(ticket), Some(Err(EspError::Timeout)));
    assert_eq!(h.engine.poll(ticket), None);
    assert_eq!(h.engine.last_status(), Some(&Err(EspError::Timeout)));

    // A late terminal has nothing left to complete
    h.sim.inject(b"\r\nOK\r\n");
    h.clock.advance_time(5000);
    assert_eq!(h.event_names(), vec!["idle"]);
    assert_eq!(h.engine.last_status(), Some(&Err(EspError::Timeout)));
}

#[test]
fn test_blocking_call_times_out_through_yield_hook() {
    let mut h = default_harness();
    assert_eq!(h.engine.leave(), Err(EspError::Timeout));
    assert!(h.clock.now() >= 2000);
    assert!(h.engine.is_idle());
}

#[test]
fn test_device_error_and_busy_replies() {
    let mut h = default_harness();
    h.sim.respond("AT+CWMODE=2", "\r\nERROR\r\n");
    h.sim.respond("AT+CWLAP", "busy p...\r\n");

    assert_eq!(
        h.engine.set_wifi_mode(WifiMode::SoftAp),
        Err(EspError::DeviceError("ERROR".to_string()))
    );
    assert_eq!(h.engine.status().mode, None);
    assert_eq!(h.engine.scan(), Err(EspError::Busy));
}

#[test]
fn test_echoed_command_line_is_skipped() {
    let mut h = default_harness();
    h.sim.respond("AT+CWMODE=1", "AT+CWMODE=1\r\n\r\nOK\r\n");
    h.engine.set_wifi_mode(WifiMode::Station).unwrap();
    assert_eq!(h.event_names(), vec!["idle"]);
}

#[test]
fn test_initialize_runs_setup_sequence() {
    let mut h = default_harness();
    for command in ["AT", "ATE0", "AT+CIPMUX=1", "AT+CIPDINFO=0"] {
        h.sim.respond(command, "\r\nOK\r\n");
    }

    h.engine.initialize().unwrap();

    assert_eq!(h.sim.sent(), vec!["AT", "ATE0", "AT+CIPMUX=1", "AT+CIPDINFO=0"]);
    assert!(h.engine.is_idle());
}

#[test]
fn test_initialize_stops_at_first_failure() {
    let mut h = default_harness();
    h.sim.respond("AT", "\r\nOK\r\n");
    h.sim.respond("ATE0", "\r\nOK\r\n");
    h.sim.respond("AT+CIPMUX=1", "\r\nERROR\r\n");

    assert_eq!(
        h.engine.initialize(),
        Err(EspError::DeviceError("ERROR".to_string()))
    );
    assert_eq!(h.sim.sent(), vec!["AT", "ATE0", "AT+CIPMUX=1"]);
    assert!(h.engine.is_idle());
}

#[test]
fn test_reset_resolves_on_ready_banner() {
    let mut h = default_harness();
    h.sim.respond(
        "AT+RST",
        "\r\nOK\r\n\r\n ets Jan  8 2013,rst cause:2, boot mode:(3,7)\r\n\r\nready\r\n",
    );

    h.engine.reset().unwrap();
    assert_eq!(h.event_names(), vec!["module-ready", "idle"]);
}

#[test]
fn test_unexpected_restart_fails_pending_command() {
    let mut h = default_harness();
    h.sim.respond_prefix("AT+CIPSTART=0,", "0,CONNECT\r\n\r\nOK\r\n");
    let conn = h.engine.open(ConnectionType::Tcp, "example.com", 80).unwrap();
    h.engine.take_events();

    let ticket = h.engine.start_scan().unwrap();
    h.sim.inject(b"\r\nready\r\n");

    assert_eq!(
        h.event_names(),
        vec!["watchdog-reset", "connection-closed", "idle"]
    );
    assert_eq!(h.engine.poll(ticket), Some(Err(EspError::WatchdogReset)));
    assert!(h.engine.connection(conn).unwrap().is_closed());
    assert_eq!(h.engine.occupied_connections(), 0);
}

#[test]
fn test_join_failure_reports_reason() {
    let mut h = default_harness();
    h.sim
        .respond_prefix("AT+CWJAP=", "+CWJAP:2\r\n\r\nFAIL\r\n");

    assert_eq!(
        h.engine.join("HomeNet", "wrong"),
        Err(EspError::DeviceError("FAIL".to_string()))
    );
    assert_eq!(
        h.engine.status().last_join_failure,
        Some(JoinFailure::WrongPassword)
    );
    assert!(h.events().contains(&Event::WifiJoinFailed {
        reason: JoinFailure::WrongPassword
    }));
}

#[test]
fn test_join_then_got_ip_updates_status() {
    let mut h = default_harness();
    h.sim.respond_prefix(
        "AT+CWJAP=",
        "WIFI CONNECTED\r\nWIFI GOT IP\r\n\r\nOK\r\n",
    );

    h.engine.join("HomeNet", "secret").unwrap();
    let status = h.engine.status();
    assert!(status.station_connected);
    assert!(status.has_ip);
    assert_eq!(status.last_join_failure, None);
    assert_eq!(h.event_names(), vec!["wifi-connected", "wifi-got-ip", "idle"]);
}

#[test]
fn test_missing_address_raises_dhcp_timeout() {
    let mut h = default_harness();
    h.sim.inject(b"WIFI CONNECTED\r\n");
    assert_eq!(h.event_names(), vec!["wifi-connected"]);

    h.clock.advance_time(9_999);
    assert!(h.events().is_empty());
    h.clock.advance_time(1);
    assert_eq!(h.event_names(), vec!["dhcp-timeout"]);
    h.clock.advance_time(20_000);
    assert!(h.events().is_empty());
}

#[test]
fn test_scan_collects_access_points() {
    let mut h = default_harness();
    h.sim.respond(
        "AT+CWLAP",
        "+CWLAP:(3,\"HomeNet\",-60,\"aa:bb:cc:dd:ee:ff\",6)\r\n\
         +CWLAP:(0,\"Cafe\",-82,\"11:22:33:44:55:66\",11)\r\n\r\nOK\r\n",
    );

    let list = h.engine.scan().unwrap();
    assert_eq!(list.len(), 2);
    assert_eq!(list[0].ssid, "HomeNet");
    assert_eq!(list[0].encryption, Encryption::Wpa2Psk);
    assert_eq!(list[1].rssi, -82);
    assert_eq!(list[1].channel, 11);

    let events = h.events();
    assert!(matches!(
        &events[0],
        Event::ScanResult { access_points } if access_points == &list
    ));
}

#[test]
fn test_query_addresses_updates_status() {
    let mut h = default_harness();
    h.sim.respond(
        "AT+CIFSR",
        "+CIFSR:APIP,\"192.168.4.1\"\r\n+CIFSR:STAIP,\"192.168.1.20\"\r\n\
         +CIFSR:STAMAC,\"18:fe:34:00:00:01\"\r\n\r\nOK\r\n",
    );

    let info = h.engine.query_addresses().unwrap();
    assert_eq!(info.station_ip, Some("192.168.1.20".parse().unwrap()));
    assert_eq!(info.ap_ip, Some("192.168.4.1".parse().unwrap()));
    assert_eq!(h.engine.status().addresses, info);
}

#[test]
fn test_list_stations() {
    let mut h = default_harness();
    h.sim.respond(
        "AT+CWLIF",
        "192.168.4.2,5c:cf:7f:aa:bb:cc\r\n192.168.4.3,5c:cf:7f:aa:bb:cd\r\n\r\nOK\r\n",
    );

    let stations = h.engine.list_stations().unwrap();
    assert_eq!(stations.len(), 2);
    assert_eq!(stations[1].mac, "5c:cf:7f:aa:bb:cd");
}

#[test]
fn test_station_events() {
    let mut h = default_harness();
    h.sim.inject(b"+STA_CONNECTED:\"5c:cf:7f:aa:bb:cc\"\r\n+STA_DISCONNECTED:\"5c:cf:7f:aa:bb:cc\"\r\n");
    assert_eq!(
        h.events(),
        vec![
            Event::StationJoined {
                mac: "5c:cf:7f:aa:bb:cc".to_string()
            },
            Event::StationLeft {
                mac: "5c:cf:7f:aa:bb:cc".to_string()
            },
        ]
    );
}

#[test]
fn test_ping_and_sntp_time() {
    let mut h = default_harness();
    h.sim.respond("AT+PING=\"example.com\"", "+27\r\n\r\nOK\r\n");
    h.sim.respond(
        "AT+CIPSNTPTIME?",
        "+CIPSNTPTIME:Thu Aug 04 14:48:05 2016\r\nOK\r\n",
    );

    assert_eq!(h.engine.ping("example.com").unwrap(), 27);
    let time = h.engine.sntp_time().unwrap();
    assert_eq!(time.to_string(), "2016-08-04 14:48:05");

    let names = h.event_names();
    assert!(names.contains(&"ping-result"));
    assert!(names.contains(&"sntp-time"));
}

#[test]
fn test_server_port_tracked_in_status() {
    let mut h = default_harness();
    h.sim.respond("AT+CIPSERVER=1,8080", "\r\nOK\r\n");
    h.sim.respond("AT+CIPSERVER=0", "\r\nOK\r\n");

    h.engine.enable_server(8080).unwrap();
    assert_eq!(h.engine.status().server_port, Some(8080));
    h.engine.disable_server().unwrap();
    assert_eq!(h.engine.status().server_port, None);
}

#[test]
fn test_raw_command_returns_lines() {
    let mut h = default_harness();
    h.sim.respond(
        "AT+GMR",
        "AT version:1.7.4.0\r\nSDK version:3.0.4\r\n\r\nOK\r\n",
    );

    let lines = h.engine.raw("AT+GMR", None).unwrap();
    assert_eq!(lines, vec!["AT version:1.7.4.0", "SDK version:3.0.4"]);
}

#[test]
fn test_transmit_failure_records_nothing() {
    let mut h = default_harness();
    h.sim.fail_writes(true);
    assert!(matches!(
        h.engine.start_leave(),
        Err(EspError::Transport(_))
    ));
    assert!(h.engine.is_idle());
    assert!(h.engine.pending_command().is_none());
}

#[test]
fn test_invalid_config_is_rejected() {
    let (_producer, rx) = rx_buffer(16);
    let config = EngineConfig {
        max_connections: 0,
        ..EngineConfig::default()
    };
    let result = Engine::new(
        config,
        Platform {
            transport: Box::new(|_: &[u8]| -> Result<(), EspError> { Ok(()) }),
            rx,
            clock: Clock::new(),
        },
    );
    assert!(matches!(result, Err(EspError::Config(_))));
}
