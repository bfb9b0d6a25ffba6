//! Shared test harness: a scripted module behind the engine's transport
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use espat_core::buffer::{rx_buffer, RxProducer};
use espat_core::clock::Clock;
use espat_core::config::EngineConfig;
use espat_core::engine::{Engine, Platform};
use espat_core::event::Event;
use espat_core::protocol::{EspError, Transmit};
use tracing_subscriber::EnvFilter;

/// How a scripted reply is matched against written bytes
enum Trigger {
    /// Whole write, ignoring a trailing CRLF
    Exact(Vec<u8>),
    Prefix(Vec<u8>),
}

impl Trigger {
    fn matches(&self, written: &[u8]) -> bool {
        match self {
            Trigger::Exact(expected) => {
                let trimmed = written.strip_suffix(b"\r\n").unwrap_or(written);
                trimmed == expected.as_slice()
            }
            Trigger::Prefix(prefix) => written.starts_with(prefix),
        }
    }
}

struct Rule {
    trigger: Trigger,
    reply: Vec<u8>,
    once: bool,
}

struct SimState {
    producer: RxProducer,
    rules: Vec<Rule>,
    writes: Vec<Vec<u8>>,
    fail_writes: bool,
}

/// Scripted module: answers writes by pushing replies into the receive buffer
#[derive(Clone)]
pub struct SimModule {
    state: Arc<Mutex<SimState>>,
}

impl SimModule {
    pub fn new(producer: RxProducer) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                producer,
                rules: Vec::new(),
                writes: Vec::new(),
                fail_writes: false,
            })),
        }
    }

    fn add(&self, trigger: Trigger, reply: &[u8], once: bool) {
        self.state.lock().unwrap().rules.push(Rule {
            trigger,
            reply: reply.to_vec(),
            once,
        });
    }

    /// Reply every time `command` is written
    pub fn respond(&self, command: &str, reply: &str) {
        self.add(Trigger::Exact(command.as_bytes().to_vec()), reply.as_bytes(), false);
    }

    /// Reply to the next write of `command` only
    pub fn respond_once(&self, command: &str, reply: &str) {
        self.add(Trigger::Exact(command.as_bytes().to_vec()), reply.as_bytes(), true);
    }

    /// Reply to every write starting with `prefix`
    pub fn respond_prefix(&self, prefix: &str, reply: &str) {
        self.add(Trigger::Prefix(prefix.as_bytes().to_vec()), reply.as_bytes(), false);
    }

    /// Unsolicited bytes from the module
    pub fn inject(&self, bytes: &[u8]) {
        self.state.lock().unwrap().producer.push_slice(bytes);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.state.lock().unwrap().fail_writes = fail;
    }

    /// Every write so far, lossily decoded with the trailing CRLF removed
    pub fn sent(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .writes
            .iter()
            .map(|w| {
                let w = w.strip_suffix(b"\r\n").unwrap_or(w);
                String::from_utf8_lossy(w).into_owned()
            })
            .collect()
    }

    pub fn clear_sent(&self) {
        self.state.lock().unwrap().writes.clear();
    }
}

impl Transmit for SimModule {
    fn transmit(&mut self, bytes: &[u8]) -> Result<(), EspError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_writes {
            return Err(EspError::Transport("write refused".to_string()));
        }
        state.writes.push(bytes.to_vec());

        if let Some(index) = state.rules.iter().position(|r| r.trigger.matches(bytes)) {
            let reply = if state.rules[index].once {
                state.rules.remove(index).reply
            } else {
                state.rules[index].reply.clone()
            };
            state.producer.push_slice(&reply);
        }
        Ok(())
    }
}

pub struct Harness {
    pub engine: Engine,
    pub sim: SimModule,
    pub clock: Clock,
}

impl Harness {
    /// Run `update` and return everything queued since the last call
    pub fn events(&mut self) -> Vec<Event<'static>> {
        self.engine.update();
        self.engine.take_events()
    }

    /// Names of queued events, for order checks
    pub fn event_names(&mut self) -> Vec<&'static str> {
        self.events().iter().map(|e| e.name()).collect()
    }
}

/// Route engine logs to the test output; `RUST_LOG` selects the level
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Engine over a scripted module; blocking calls advance the clock 10 ms per poll
pub fn harness(config: EngineConfig) -> Harness {
    init_tracing();
    let (producer, rx) = rx_buffer(config.rx_buffer_capacity);
    let sim = SimModule::new(producer);
    let clock = Clock::new();

    let mut engine = Engine::new(
        config,
        Platform {
            transport: Box::new(sim.clone()),
            rx,
            clock: clock.clone(),
        },
    )
    .expect("valid config");

    let tick = clock.clone();
    engine.set_yield(move || tick.advance_time(10));

    Harness { engine, sim, clock }
}

pub fn default_harness() -> Harness {
    harness(EngineConfig::default())
}

/// Record every delivered event
pub fn record_events(engine: &mut Engine) -> Arc<Mutex<Vec<Event<'static>>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    engine.set_event_callback(move |event, _actions| {
        sink.lock().unwrap().push(event.clone().into_owned());
    });
    seen
}
