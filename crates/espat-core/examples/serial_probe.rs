//! Probe a module on a serial port and print what it reports
//!
//! ```text
//! cargo run --example serial_probe -- /dev/ttyUSB0
//! ```

use std::time::Duration;

use anyhow::Context;
use espat_core::prelude::*;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let port = match std::env::args().nth(1) {
        Some(port) => port,
        None => {
            let ports = list_ports();
            for p in &ports {
                info!("found {} ({:?})", p.name, p.product);
            }
            ports
                .first()
                .map(|p| p.name.clone())
                .context("no serial ports found")?
        }
    };

    let config = EngineConfig {
        delivery: DeliveryMode::Immediate,
        ..EngineConfig::default()
    };
    let (producer, rx) = rx_buffer(config.rx_buffer_capacity);
    let transport = SerialTransport::open(&port, config.baud_rate, producer)
        .with_context(|| format!("opening {port}"))?;

    let clock = Clock::new();
    let _ticker = clock.spawn_ticker(Duration::from_millis(1));

    let mut engine = Engine::new(
        config,
        Platform {
            transport: Box::new(transport),
            rx,
            clock,
        },
    )?;
    engine.set_event_callback(|event, _actions| info!("event {}", event.name()));
    engine.set_yield(|| std::thread::sleep(Duration::from_millis(1)));

    engine.initialize().context("module did not answer")?;
    for line in engine.raw("AT+GMR", None)? {
        info!("{line}");
    }

    engine.set_wifi_mode(WifiMode::Station)?;
    for ap in engine.scan()? {
        println!("{:>4} dBm  ch {:>2}  {}", ap.rssi, ap.channel, ap.ssid);
    }

    let addresses = engine.query_addresses()?;
    println!("station ip: {:?}", addresses.station_ip);
    Ok(())
}
