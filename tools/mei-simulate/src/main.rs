//! Drives the MEI engine against the simulated device: bring-up, an echo
//! exchange, power gating and a suspend/resume cycle.
//!
//! ```text
//! mei-simulate [-v|-vv] [--messages N] [--size BYTES] [--threaded]
//! ```

mod logger;

use log::{LevelFilter, info};
use logger::StderrLogger;
use mei_engine::{DeviceState, Engine, EngineConfig, OwnerToken, PowerGatingState};
use mei_sim::{SimClient, SimConfig, SimPlatform, touch_properties};
use mei_sync::TicketLock;
use std::error::Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use std::{env, thread};

type SimEngine = Engine<SimPlatform>;
type Inbox = Arc<Mutex<Vec<Vec<u8>>>>;

const CLIENT_ADDRESS: u8 = 5;
const MAX_MESSAGE: u32 = 4096;
const SETTLE: Duration = Duration::from_millis(50);

struct Options {
    level: LevelFilter,
    messages: usize,
    size: usize,
    threaded: bool,
}

fn parse_args() -> Result<Options, String> {
    let mut options = Options {
        level: LevelFilter::Warn,
        messages: 8,
        size: 700,
        threaded: false,
    };
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-v" => options.level = LevelFilter::Info,
            "-vv" => options.level = LevelFilter::Trace,
            "--threaded" => options.threaded = true,
            "--messages" | "--size" => {
                let value = args
                    .next()
                    .and_then(|value| value.parse::<usize>().ok())
                    .ok_or_else(|| format!("{arg} needs a number"))?;
                if arg == "--messages" {
                    options.messages = value;
                } else {
                    options.size = value;
                }
            }
            other => return Err(format!("unknown argument {other}")),
        }
    }
    if options.size == 0 || options.size > MAX_MESSAGE as usize {
        return Err(format!("--size must be between 1 and {MAX_MESSAGE}"));
    }
    Ok(options)
}

fn message(index: usize, size: usize) -> Vec<u8> {
    (0..size).map(|i| (i + index).to_le_bytes()[0]).collect()
}

fn bring_up() -> Result<(SimEngine, Inbox), Box<dyn Error>> {
    let sim = SimConfig::default().with_client(
        CLIENT_ADDRESS,
        SimClient::new(touch_properties(MAX_MESSAGE)).with_echo(true),
    );
    let mut engine = Engine::new(SimPlatform::new(sim), EngineConfig::default().with_dma_ring(true));
    engine.start()?;
    engine.run_for(SETTLE);
    if engine.state() != DeviceState::Enabled {
        return Err(format!("device did not come up, state {:?}", engine.state()).into());
    }
    info!("bus {} enabled, features {:?}", engine.version(), engine.features());

    let inbox: Inbox = Arc::default();
    let sink = Arc::clone(&inbox);
    engine
        .client()
        .ok_or("touch client not found")?
        .register_handler(OwnerToken(1), move |message: &[u8]| {
            if let Ok(mut inbox) = sink.lock() {
                inbox.push(message.to_vec());
            }
        })?;
    Ok((engine, inbox))
}

/// Sends from this thread while another one polls.
fn exchange_threaded(engine: SimEngine, options: &Options) -> Result<SimEngine, Box<dyn Error>> {
    let shared = Arc::new(TicketLock::new(engine));
    let done = Arc::new(AtomicBool::new(false));

    let poller = {
        let shared = Arc::clone(&shared);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            while !done.load(Ordering::Acquire) {
                shared.with_lock(|engine| engine.poll(Duration::from_millis(1)));
                thread::yield_now();
            }
        })
    };

    let mut result = Ok(());
    for index in 0..options.messages {
        let data = message(index, options.size);
        let sent = shared.with_lock(|engine| {
            engine
                .client()
                .ok_or(mei_engine::SendError::NoDevice)
                .and_then(|mut client| client.send(&data, index % 2 == 0))
        });
        if let Err(err) = sent {
            result = Err(err);
            break;
        }
    }

    done.store(true, Ordering::Release);
    poller.join().map_err(|_| "poller thread panicked")?;
    result?;

    let engine = Arc::into_inner(shared)
        .ok_or("engine still shared")?
        .into_inner();
    Ok(engine)
}

fn exchange(engine: &mut SimEngine, options: &Options) -> Result<(), Box<dyn Error>> {
    for index in 0..options.messages {
        let data = message(index, options.size);
        engine
            .client()
            .ok_or("touch client disappeared")?
            .send(&data, index % 2 == 0)?;
        engine.poll(Duration::from_millis(1));
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let options = parse_args()?;
    StderrLogger::new(options.level).init()?;

    let (mut engine, inbox) = bring_up()?;

    if options.threaded {
        engine = exchange_threaded(engine, &options)?;
    } else {
        exchange(&mut engine, &options)?;
    }
    engine.run_for(SETTLE);

    let received = inbox.lock().map_err(|_| "inbox poisoned")?.clone();
    let expected: Vec<Vec<u8>> = (0..options.messages)
        .map(|index| message(index, options.size))
        .collect();
    if received != expected {
        return Err(format!(
            "echo mismatch: sent {} messages, got {} back",
            expected.len(),
            received.len()
        )
        .into());
    }
    println!("echoed {} messages of {} bytes", received.len(), options.size);

    engine.run_for(engine.config().timeouts.idle + Duration::from_secs(1));
    println!("power gating after idle: {:?}", engine.power_gating_state());
    engine.client().ok_or("touch client disappeared")?.send(b"wake", true)?;
    if engine.power_gating_state() != PowerGatingState::Off {
        return Err("device still gated after a send".into());
    }

    engine.suspend();
    engine.resume()?;
    engine.run_for(SETTLE);
    println!(
        "after resume: {:?}, {} resets seen by the device",
        engine.state(),
        engine.platform().resets()
    );

    engine.stop();
    Ok(())
}
