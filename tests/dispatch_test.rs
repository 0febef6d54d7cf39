use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use auproc::units::{Gain, MidiThrough, SineSource};
use auproc::{
    BindingErrorKind, Client, ClientConfig, ClientError, ClientEvent, ConnectorType, Cycle,
    Direction, Processor, ProcessorDescriptor, ProcessorFault,
};
use parking_lot::Mutex;

const FRAMES: u32 = 4;

fn open(frames: u32) -> Client {
    Client::open("dispatch", ClientConfig::default().buffer_size(frames)).expect("open client")
}

/// Writes a fixed block into its only output.
struct Block(Vec<f32>);

impl Processor for Block {
    fn process(&mut self, cycle: &mut Cycle<'_>) -> Result<(), ProcessorFault> {
        let out = cycle.audio_out(0).ok_or(ProcessorFault(-1))?;
        for (dest, value) in out.iter_mut().zip(&self.0) {
            *dest = *value;
        }
        Ok(())
    }
}

/// Copies its only input into a shared log.
struct Capture(Arc<Mutex<Vec<Vec<f32>>>>);

impl Processor for Capture {
    fn process(&mut self, cycle: &mut Cycle<'_>) -> Result<(), ProcessorFault> {
        let input = cycle.audio_in(0).ok_or(ProcessorFault(-1))?;
        self.0.lock().push(input.to_vec());
        Ok(())
    }
}

/// Counts callbacks; optionally fails every process call.
#[derive(Clone, Default)]
struct Probe {
    cycles: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
    sizes: Arc<Mutex<Vec<u32>>>,
    fail_with: Option<i32>,
    reject_size: Option<u32>,
}

impl Probe {
    fn failing(code: i32) -> Self {
        Self {
            fail_with: Some(code),
            ..Self::default()
        }
    }

    fn rejecting(frames: u32) -> Self {
        Self {
            reject_size: Some(frames),
            ..Self::default()
        }
    }
}

impl Processor for Probe {
    fn process(&mut self, _cycle: &mut Cycle<'_>) -> Result<(), ProcessorFault> {
        self.cycles.fetch_add(1, Ordering::SeqCst);
        match self.fail_with {
            Some(code) => Err(ProcessorFault(code)),
            None => Ok(()),
        }
    }

    fn buffer_size_changed(&mut self, frames: u32) -> Result<(), ProcessorFault> {
        if self.reject_size == Some(frames) {
            return Err(ProcessorFault(9));
        }
        self.sizes.lock().push(frames);
        Ok(())
    }

    fn client_closed(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }

    fn client_released(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

fn drain(client: &Client) -> Vec<ClientEvent> {
    client.events().try_iter().collect()
}

#[test]
fn producer_output_reaches_reader_in_the_same_cycle() {
    let client = open(FRAMES);
    let mix = client.create_process_buffer(ConnectorType::Audio).unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let producer = client
        .register(
            ProcessorDescriptor::new("A").output(ConnectorType::Audio),
            &[mix.into()],
            Block(vec![1.0, 2.0, 3.0, 4.0]),
        )
        .unwrap();
    let consumer = client
        .register(
            ProcessorDescriptor::new("B").input(ConnectorType::Audio),
            &[mix.into()],
            Capture(seen.clone()),
        )
        .unwrap();
    client.activate_processor(producer).unwrap();
    client.activate_processor(consumer).unwrap();

    let mut dispatcher = client.take_dispatcher().expect("dispatcher");
    client.activate().unwrap();
    dispatcher.run_cycle(FRAMES);

    assert_eq!(*seen.lock(), vec![vec![1.0f32, 2.0, 3.0, 4.0]]);
    assert_eq!(dispatcher.frame_time(), u64::from(FRAMES));
    assert_eq!(client.process_begin_frame_time(), u64::from(FRAMES));
}

#[test]
fn unregistering_the_middle_unit_keeps_the_others() {
    let client = open(FRAMES);
    let probes = [Probe::default(), Probe::default(), Probe::default()];
    let mut ids = Vec::new();
    for (name, probe) in ["a", "b", "c"].iter().zip(&probes) {
        ids.push(
            client
                .register(ProcessorDescriptor::new(*name), &[], probe.clone())
                .unwrap(),
        );
    }
    client.activate_processor(ids[0]).unwrap();
    client.activate_processor(ids[1]).unwrap();

    let mut dispatcher = client.take_dispatcher().unwrap();
    dispatcher.run_cycle(FRAMES);

    client.unregister(ids[1]).unwrap();
    dispatcher.run_cycle(FRAMES);

    let listed: Vec<(String, bool)> = client
        .processors()
        .into_iter()
        .map(|info| (info.name, info.activated))
        .collect();
    assert_eq!(listed, [("a".to_owned(), true), ("c".to_owned(), false)]);

    let cycles: Vec<usize> = probes
        .iter()
        .map(|probe| probe.cycles.load(Ordering::SeqCst))
        .collect();
    assert_eq!(cycles, [2, 1, 0]);
}

#[test]
fn process_fault_shuts_the_client_down_once() {
    let client = open(FRAMES);
    let before = Probe::default();
    let failing = Probe::failing(7);
    let after = Probe::default();
    let mut ids = Vec::new();
    for (name, probe) in [("before", &before), ("failing", &failing), ("after", &after)] {
        let id = client
            .register(ProcessorDescriptor::new(name), &[], probe.clone())
            .unwrap();
        client.activate_processor(id).unwrap();
        ids.push(id);
    }

    let mut dispatcher = client.take_dispatcher().unwrap();
    client.activate().unwrap();
    dispatcher.run_cycle(FRAMES);

    assert_eq!(before.cycles.load(Ordering::SeqCst), 1);
    assert_eq!(failing.cycles.load(Ordering::SeqCst), 1);
    assert_eq!(after.cycles.load(Ordering::SeqCst), 0);
    assert!(client.is_severe());
    assert!(client.is_shutdown());
    assert_eq!(client.fault(), Some((ids[1], 7)));

    // Halted: nothing runs any more.
    dispatcher.run_cycle(FRAMES);
    assert_eq!(before.cycles.load(Ordering::SeqCst), 1);

    let reason = client.handle_shutdown().expect("teardown performed");
    assert!(reason.contains("error 7"), "reason was {reason}");
    assert!(reason.contains("'failing'"), "reason was {reason}");
    assert!(client.handle_shutdown().is_none());
    assert!(client.is_closed());
    client.close();

    for probe in [&before, &failing, &after] {
        assert_eq!(probe.closed.load(Ordering::SeqCst), 1);
        assert_eq!(probe.released.load(Ordering::SeqCst), 0);
    }
    assert_eq!(
        drain(&client),
        [
            ClientEvent::ProcessorFailed {
                processor: ids[1],
                code: 7
            },
            ClientEvent::Shutdown { reason },
            ClientEvent::Closed,
        ]
    );

    drop(dispatcher);
    drop(client);
    for probe in [&before, &failing, &after] {
        assert_eq!(probe.released.load(Ordering::SeqCst), 1);
    }
}

#[test]
fn pending_fault_is_reported_by_the_next_control_call() {
    let client = open(FRAMES);
    let failing = Probe::failing(-3);
    let id = client
        .register(ProcessorDescriptor::new("failing"), &[], failing.clone())
        .unwrap();
    client.activate_processor(id).unwrap();
    let mut dispatcher = client.take_dispatcher().unwrap();
    dispatcher.run_cycle(FRAMES);

    let err = client
        .register(ProcessorDescriptor::new("late"), &[], Probe::default())
        .unwrap_err();
    match err {
        ClientError::Shutdown(reason) => assert!(reason.contains("error -3")),
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(failing.closed.load(Ordering::SeqCst), 1);
    assert!(matches!(client.activate(), Err(ClientError::Closed)));
}

#[test]
fn engine_shutdown_closes_every_unit() {
    let client = open(FRAMES);
    let probe = Probe::default();
    client
        .register(ProcessorDescriptor::new("unit"), &[], probe.clone())
        .unwrap();

    client.notify_shutdown("engine stopped");
    assert!(client.is_shutdown());
    assert!(!client.is_severe());
    assert_eq!(client.handle_shutdown().as_deref(), Some("engine stopped"));
    assert_eq!(probe.closed.load(Ordering::SeqCst), 1);
    assert_eq!(client.fault(), None);

    drop(client);
    assert_eq!(probe.released.load(Ordering::SeqCst), 1);
}

#[test]
fn deactivated_producer_leaves_silence() {
    let client = open(FRAMES);
    let out = client
        .register_port("out", ConnectorType::Audio, Direction::Out)
        .unwrap();
    let producer = client
        .register(
            ProcessorDescriptor::new("block").output(ConnectorType::Audio),
            &[out.into()],
            Block(vec![0.5; FRAMES as usize]),
        )
        .unwrap();
    client.activate_processor(producer).unwrap();

    let mut dispatcher = client.take_dispatcher().unwrap();
    let mut samples = [0.0f32; FRAMES as usize];
    dispatcher.run_cycle(FRAMES);
    dispatcher.read_port_audio(out, &mut samples).unwrap();
    assert_eq!(samples, [0.5; FRAMES as usize]);

    client.deactivate_processor(producer).unwrap();
    dispatcher.run_cycle(FRAMES);
    dispatcher.read_port_audio(out, &mut samples).unwrap();
    assert_eq!(samples, [0.0; FRAMES as usize]);
}

#[test]
fn unregistered_producer_leaves_silence() {
    let client = open(FRAMES);
    let out = client
        .register_port("out", ConnectorType::Audio, Direction::Out)
        .unwrap();
    let producer = client
        .register(
            ProcessorDescriptor::new("block").output(ConnectorType::Audio),
            &[out.into()],
            Block(vec![1.0, 2.0, 3.0, 4.0]),
        )
        .unwrap();
    client.activate_processor(producer).unwrap();

    let mut dispatcher = client.take_dispatcher().unwrap();
    let mut samples = [0.0f32; FRAMES as usize];
    dispatcher.run_cycle(FRAMES);
    dispatcher.read_port_audio(out, &mut samples).unwrap();
    assert_eq!(samples, [1.0, 2.0, 3.0, 4.0]);

    client.unregister(producer).unwrap();
    dispatcher.run_cycle(FRAMES);
    dispatcher.run_cycle(FRAMES);
    dispatcher.read_port_audio(out, &mut samples).unwrap();
    assert_eq!(samples, [0.0; FRAMES as usize]);
}

#[test]
fn reader_cannot_get_ahead_of_its_producer() {
    let client = open(FRAMES);
    let mix = client.create_process_buffer(ConnectorType::Audio).unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let reader = ProcessorDescriptor::new("B").input(ConnectorType::Audio);

    let early = client.register(reader.clone(), &[mix.into()], Capture(seen.clone()));
    assert!(matches!(
        early,
        Err(ClientError::Binding { index: 0, kind: BindingErrorKind::WrongDirection })
    ));

    let producer = client
        .register(
            ProcessorDescriptor::new("A").output(ConnectorType::Audio),
            &[mix.into()],
            Block(vec![1.0, 2.0, 3.0, 4.0]),
        )
        .unwrap();
    let consumer = client
        .register(reader, &[mix.into()], Capture(seen.clone()))
        .unwrap();
    client.activate_processor(producer).unwrap();
    client.activate_processor(consumer).unwrap();

    let mut dispatcher = client.take_dispatcher().unwrap();
    dispatcher.run_cycle(FRAMES);
    assert_eq!(*seen.lock(), vec![vec![1.0f32, 2.0, 3.0, 4.0]]);
}

#[test]
fn output_slot_is_handed_out_once_per_cycle() {
    struct Greedy(Arc<Mutex<Vec<bool>>>);

    impl Processor for Greedy {
        fn process(&mut self, cycle: &mut Cycle<'_>) -> Result<(), ProcessorFault> {
            let mut log = self.0.lock();
            log.push(cycle.audio_out(0).is_some());
            log.push(cycle.audio_out(0).is_some());
            log.push(cycle.audio_in(0).is_some());
            log.push(cycle.midi_out(0).is_some());
            Ok(())
        }
    }

    let client = open(FRAMES);
    let buffer = client.create_process_buffer(ConnectorType::Audio).unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));
    let id = client
        .register(
            ProcessorDescriptor::new("greedy").output(ConnectorType::Audio),
            &[buffer.into()],
            Greedy(log.clone()),
        )
        .unwrap();
    client.activate_processor(id).unwrap();
    let mut dispatcher = client.take_dispatcher().unwrap();
    dispatcher.run_cycle(FRAMES);
    dispatcher.run_cycle(FRAMES);

    assert_eq!(
        *log.lock(),
        [true, false, false, false, true, false, false, false]
    );
}

#[test]
fn midi_passes_through_ports() {
    let client = open(64);
    let midi_in = client
        .register_port("midi_in", ConnectorType::Midi, Direction::In)
        .unwrap();
    let midi_out = client
        .register_port("midi_out", ConnectorType::Midi, Direction::Out)
        .unwrap();
    let through = client
        .register(
            MidiThrough::descriptor("through"),
            &[midi_in.into(), midi_out.into()],
            MidiThrough::transposed(2),
        )
        .unwrap();
    client.activate_processor(through).unwrap();

    let mut dispatcher = client.take_dispatcher().unwrap();
    let events: [(u32, &[u8]); 2] = [(0, &[0x90, 60, 100]), (3, &[0xB0, 7, 64])];
    assert_eq!(dispatcher.write_port_midi(midi_in, &events).unwrap(), 2);
    dispatcher.run_cycle(64);

    let mut received = Vec::new();
    let count = dispatcher
        .read_port_midi(midi_out, |event| received.push((event.time, event.data.to_vec())))
        .unwrap();
    assert_eq!(count, 2);
    assert_eq!(
        received,
        [(0, vec![0x90, 62, 100]), (3, vec![0xB0, 7, 64])]
    );

    dispatcher.write_port_midi(midi_in, &[]).unwrap();
    dispatcher.run_cycle(64);
    let count = dispatcher.read_port_midi(midi_out, |_| {}).unwrap();
    assert_eq!(count, 0);
}

#[test]
fn sine_through_gain_reaches_the_output_port() {
    let client = open(64);
    let out = client
        .register_port("out", ConnectorType::Audio, Direction::Out)
        .unwrap();
    let mix = client.create_process_buffer(ConnectorType::Audio).unwrap();
    let sine = client
        .register(
            SineSource::descriptor("sine"),
            &[mix.into()],
            SineSource::new(client.sample_rate(), 1_000.0, 1.0),
        )
        .unwrap();
    let gain = Gain::new(0.5);
    let handle = gain.handle();
    let gain = client
        .register(Gain::descriptor("gain"), &[mix.into(), out.into()], gain)
        .unwrap();
    client.activate_processor(sine).unwrap();
    client.activate_processor(gain).unwrap();

    let mut dispatcher = client.take_dispatcher().unwrap();
    let mut samples = [0.0f32; 64];
    dispatcher.run_cycle(64);
    dispatcher.read_port_audio(out, &mut samples).unwrap();
    let peak = samples.iter().fold(0.0f32, |peak, s| peak.max(s.abs()));
    assert!(peak > 0.4 && peak <= 0.5 + 1e-4, "peak was {peak}");

    handle.set_db(-200.0);
    dispatcher.run_cycle(64);
    dispatcher.read_port_audio(out, &mut samples).unwrap();
    assert!(samples.iter().all(|s| *s == 0.0));
}

#[test]
fn buffer_size_change_notifies_units_once() {
    let client = open(64);
    let out = client
        .register_port("out", ConnectorType::Audio, Direction::Out)
        .unwrap();
    let probe = Probe::default();
    let id = client
        .register(
            ProcessorDescriptor::new("probe").output(ConnectorType::Audio),
            &[out.into()],
            probe.clone(),
        )
        .unwrap();
    let events = client.events();
    let mut dispatcher = client.take_dispatcher().unwrap();

    dispatcher.buffer_size_changed(128).unwrap();
    dispatcher.buffer_size_changed(128).unwrap();
    assert_eq!(*probe.sizes.lock(), [64, 128]);
    assert_eq!(client.buffer_size(), 128);
    assert_eq!(client.processors()[0].id, id);
    assert_eq!(client.processors()[0].buffer_frames, 128);
    assert_eq!(
        events.try_iter().collect::<Vec<_>>(),
        [
            ClientEvent::BufferSizeChanged(128),
            ClientEvent::BufferSizeChanged(128)
        ]
    );

    let mut samples = vec![1.0f32; 256];
    let copied = dispatcher.read_port_audio(out, &mut samples).unwrap();
    assert_eq!(copied, 128);

    assert!(matches!(
        dispatcher.buffer_size_changed(0),
        Err(ClientError::ArgInvalid(_))
    ));
}

#[test]
fn rejected_buffer_size_is_severe() {
    let client = open(64);
    let probe = Probe::rejecting(32);
    client
        .register(ProcessorDescriptor::new("picky"), &[], probe.clone())
        .unwrap();
    let mut dispatcher = client.take_dispatcher().unwrap();

    let err = dispatcher.buffer_size_changed(32).unwrap_err();
    match err {
        ClientError::Shutdown(reason) => {
            assert!(reason.contains("error 9 from buffer size callback"), "{reason}");
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(client.is_severe());
    assert!(client.is_closed());
    assert_eq!(probe.closed.load(Ordering::SeqCst), 1);
}

#[test]
fn only_one_dispatcher_at_a_time() {
    let client = open(FRAMES);
    let first = client.take_dispatcher().expect("first dispatcher");
    assert!(client.take_dispatcher().is_none());
    drop(first);
    assert!(client.take_dispatcher().is_some());
}
