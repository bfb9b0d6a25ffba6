//! Output must not depend on how the serial input is split across updates

mod common;

use common::{default_harness, harness};
use espat_core::config::EngineConfig;
use espat_core::event::Event;
use pretty_assertions::assert_eq;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const STREAM: &[u8] = b"0,CONNECT\r\n\
+IPD,0,12:hello world!\r\n\
1,CONNECT\r\n\
WIFI CONNECTED\r\n\
+IPD,1,7:a\r\nb\r\nc\r\n\
WIFI GOT IP\r\n\
+IPD,0,4:\r\n\r\n\r\n\
+STA_CONNECTED:\"5c:cf:7f:aa:bb:cc\"\r\n\
+IPD,1,20:abcdefghijklmnopqrst\r\n\
0,CLOSED\r\n\
1,CLOSED\r\n";

fn feed_whole(config: EngineConfig) -> Vec<Event<'static>> {
    let mut h = harness(config);
    h.sim.inject(STREAM);
    h.events()
}

fn feed_split(config: EngineConfig, rng: &mut StdRng) -> Vec<Event<'static>> {
    let mut h = harness(config);
    let mut events = Vec::new();
    let mut rest = STREAM;
    while !rest.is_empty() {
        let n = rng.gen_range(1..=rest.len().min(9));
        let (piece, tail) = rest.split_at(n);
        h.sim.inject(piece);
        events.extend(h.events());
        rest = tail;
    }
    events
}

#[test]
fn test_whole_stream_events() {
    let events = feed_whole(EngineConfig::default());
    let names: Vec<_> = events.iter().map(|e| e.name()).collect();
    assert_eq!(
        names,
        vec![
            "connection-active",
            "data-received",
            "connection-active",
            "wifi-connected",
            "data-received",
            "wifi-got-ip",
            "data-received",
            "station-joined",
            "data-received",
            "connection-closed",
            "connection-closed",
        ]
    );
}

#[test]
fn test_random_splits_give_identical_events() {
    let expected = feed_whole(EngineConfig::default());
    let mut rng = StdRng::seed_from_u64(0x5eed);
    for _ in 0..200 {
        assert_eq!(feed_split(EngineConfig::default(), &mut rng), expected);
    }
}

#[test]
fn test_byte_at_a_time_with_small_buffers() {
    let config = EngineConfig {
        connection_buffer_size: 3,
        ..EngineConfig::default()
    };
    let expected = feed_whole(config.clone());

    let mut h = harness(config);
    let mut events = Vec::new();
    for byte in STREAM {
        h.sim.inject(std::slice::from_ref(byte));
        events.extend(h.events());
    }
    assert_eq!(events, expected);
}

#[test]
fn test_split_inside_frame_header_keeps_data_intact() {
    let mut h = default_harness();
    h.sim.inject(b"0,CONNECT\r\n+IP");
    h.engine.update();
    h.sim.inject(b"D,0,");
    h.engine.update();
    h.sim.inject(b"3:x");
    h.engine.update();
    h.sim.inject(b"yz\r\n");

    let data: Vec<u8> = h
        .events()
        .into_iter()
        .filter_map(|e| match e {
            Event::DataReceived { data, .. } => Some(data.into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .concat();
    assert_eq!(data, b"xyz");
}
