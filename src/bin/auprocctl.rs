use std::env;
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use auproc::units::{Gain, MidiThrough, SineSource};
use auproc::{Client, ClientConfig, ClientError, ConnectorType, Direction, Dispatcher, PortId};

const NOTE_ON: &[u8] = &[0x90, 60, 100];

struct Demo {
    client: Client,
    running: Arc<AtomicBool>,
    engine: Option<thread::JoinHandle<()>>,
}

fn build_demo() -> Result<Demo, ClientError> {
    let client = Client::open("auprocctl", ClientConfig::default())?;
    let out = client.register_port("out", ConnectorType::Audio, Direction::Out)?;
    let midi_in = client.register_port("midi_in", ConnectorType::Midi, Direction::In)?;
    let midi_out = client.register_port("midi_out", ConnectorType::Midi, Direction::Out)?;
    let mix = client.create_process_buffer(ConnectorType::Audio)?;

    let sine = client.register(
        SineSource::descriptor("sine"),
        &[mix.into()],
        SineSource::new(client.sample_rate(), 440.0, 0.5),
    )?;
    let gain = client.register(
        Gain::descriptor("gain"),
        &[mix.into(), out.into()],
        Gain::new(0.8),
    )?;
    let through = client.register(
        MidiThrough::descriptor("through"),
        &[midi_in.into(), midi_out.into()],
        MidiThrough::transposed(12),
    )?;
    client.activate_processor(sine)?;
    client.activate_processor(gain)?;
    client.activate_processor(through)?;

    let dispatcher = client
        .take_dispatcher()
        .ok_or(ClientError::ArgInvalid("dispatcher already taken"))?;
    client.activate()?;

    let running = Arc::new(AtomicBool::new(true));
    let engine = spawn_engine(dispatcher, client.clone(), midi_in, running.clone());
    Ok(Demo {
        client,
        running,
        engine: Some(engine),
    })
}

fn spawn_engine(
    mut dispatcher: Dispatcher,
    client: Client,
    midi_in: PortId,
    running: Arc<AtomicBool>,
) -> thread::JoinHandle<()> {
    let frames = client.buffer_size();
    let period = Duration::from_secs_f64(f64::from(frames) / f64::from(client.sample_rate()));
    thread::spawn(move || {
        let note = [(0u32, NOTE_ON)];
        let mut cycle = 0u64;
        while running.load(Ordering::Acquire) && !client.is_closed() {
            let events: &[(u32, &[u8])] = if cycle % 200 == 0 { &note } else { &[] };
            let _ = dispatcher.write_port_midi(midi_in, events);
            dispatcher.run_cycle(frames);
            cycle += 1;
            thread::sleep(period);
        }
    })
}

impl Demo {
    fn shutdown(mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(engine) = self.engine.take() {
            let _ = engine.join();
        }
        self.client.close();
    }
}

fn print_status() {
    match auproc::control::api::get_status() {
        Some(status) => {
            println!("Client      : {}", status.name);
            println!("Sample Rate : {} Hz", status.sample_rate);
            println!("Buffer Size : {} frames", status.buffer_size);
            println!("Frame Time  : {}", status.frame_time);
            println!(
                "State       : active={} shutdown={} severe={} closed={}",
                status.active, status.shutdown, status.severe, status.closed
            );
            println!("Processors:");
            for processor in status.processors {
                let connectors = processor
                    .connectors
                    .iter()
                    .map(|(direction, connector)| format!("{direction:?} {connector}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                println!(
                    "  [{}] {} | active={} | frames={} | {}",
                    processor.id.serial(),
                    processor.name,
                    if processor.activated { "yes" } else { "no" },
                    processor.buffer_frames,
                    connectors,
                );
            }
            println!("Ports:");
            for port in status.ports {
                println!(
                    "  {} {} | {:?} {:?} | writers={} readers={}",
                    port.id, port.name, port.ty, port.direction, port.usage.out_usage, port.usage.inp_usage,
                );
            }
            println!("ProcessBuffers:");
            for buffer in status.buffers {
                println!(
                    "  {} | {:?} | writers={} readers={} active={}/{}",
                    buffer.id,
                    buffer.ty,
                    buffer.usage.out_usage,
                    buffer.usage.inp_usage,
                    buffer.usage.out_active,
                    buffer.usage.inp_active,
                );
            }
        }
        None => {
            eprintln!("auprocctl: no attached client");
            process::exit(1);
        }
    }
}

fn main() {
    let mut args = env::args().skip(1);
    let status_only = match args.next().as_deref() {
        None => false,
        Some("--status" | "-s") => true,
        Some("--help" | "-h") => {
            println!(
                "Usage: auprocctl [--status]\n\nRuns a demo client (sine -> buffer -> gain -> port).\nWithout arguments the interactive console launches."
            );
            return;
        }
        Some(other) => {
            eprintln!("auprocctl: unknown argument '{other}'");
            process::exit(1);
        }
    };

    let demo = match build_demo() {
        Ok(demo) => demo,
        Err(err) => {
            eprintln!("auprocctl: {err}");
            process::exit(1);
        }
    };
    auproc::control::api::attach(&demo.client);

    let result = if status_only {
        thread::sleep(Duration::from_millis(100));
        print_status();
        Ok(())
    } else {
        auproc::control::ui::run()
    };

    auproc::control::api::detach();
    demo.shutdown();
    if let Err(err) = result {
        eprintln!("auprocctl: {err}");
        process::exit(1);
    }
}
