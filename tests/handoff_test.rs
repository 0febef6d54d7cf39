use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use auproc::{
    Client, ClientConfig, ClientError, Cycle, Dispatcher, Processor, ProcessorDescriptor,
    ProcessorFault, ProcessorId,
};

const FRAMES: u32 = 32;
const POLL: Duration = Duration::from_millis(2);

#[derive(Clone, Default)]
struct Counter {
    cycles: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

impl Processor for Counter {
    fn process(&mut self, _cycle: &mut Cycle<'_>) -> Result<(), ProcessorFault> {
        self.cycles.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn client_closed(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

fn active_client() -> (Client, Dispatcher) {
    let client = Client::open(
        "handoff",
        ClientConfig::default().buffer_size(FRAMES).handoff_poll(POLL),
    )
    .expect("open client");
    let dispatcher = client.take_dispatcher().expect("dispatcher");
    client.activate().unwrap();
    (client, dispatcher)
}

fn spawn_register(
    client: &Client,
    name: &'static str,
    unit: Counter,
) -> thread::JoinHandle<Result<ProcessorId, ClientError>> {
    let client = client.clone();
    thread::spawn(move || client.register(ProcessorDescriptor::new(name), &[], unit))
}

fn wait_until_published(client: &Client, count: usize) {
    while client.processors().len() < count {
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn registration_waits_for_the_audio_thread() {
    let (client, mut dispatcher) = active_client();
    let unit = Counter::default();
    let waiter = spawn_register(&client, "late", unit.clone());

    thread::sleep(Duration::from_millis(50));
    assert!(!waiter.is_finished(), "register returned without a cycle");

    while !waiter.is_finished() {
        dispatcher.run_cycle(FRAMES);
        thread::sleep(Duration::from_millis(1));
    }
    let id = waiter.join().unwrap().expect("registration");

    // The confirmed list is the one the next cycle runs.
    client.activate_processor(id).unwrap();
    dispatcher.run_cycle(FRAMES);
    assert_eq!(unit.cycles.load(Ordering::SeqCst), 1);
}

#[test]
fn concurrent_registrations_keep_serial_order() {
    let (client, mut dispatcher) = active_client();
    let workers: Vec<_> = (0..4)
        .map(|_| {
            let client = client.clone();
            thread::spawn(move || {
                for _ in 0..5 {
                    client
                        .register(ProcessorDescriptor::new("unit"), &[], Counter::default())
                        .expect("registration");
                }
            })
        })
        .collect();

    while !workers.iter().all(|worker| worker.is_finished()) {
        dispatcher.run_cycle(FRAMES);
        thread::sleep(Duration::from_millis(1));
    }
    for worker in workers {
        worker.join().unwrap();
    }

    let serials: Vec<u64> = client
        .processors()
        .iter()
        .map(|info| info.id.serial())
        .collect();
    assert_eq!(serials.len(), 20);
    assert!(serials.windows(2).all(|pair| pair[0] < pair[1]));
}

#[test]
fn shutdown_interrupts_a_waiting_registration() {
    let (client, _dispatcher) = active_client();
    let unit = Counter::default();
    let waiter = spawn_register(&client, "stuck", unit.clone());
    wait_until_published(&client, 1);

    client.notify_shutdown("engine gone");
    match waiter.join().unwrap() {
        Err(ClientError::Shutdown(reason)) => assert_eq!(reason, "engine gone"),
        other => panic!("unexpected result {other:?}"),
    }
    assert!(client.is_closed());
    assert_eq!(unit.closed.load(Ordering::SeqCst), 1);
    assert!(client.handle_shutdown().is_none());
}

#[test]
fn deactivating_the_client_releases_waiters() {
    let (client, _dispatcher) = active_client();
    let waiter = spawn_register(&client, "pending", Counter::default());
    wait_until_published(&client, 1);

    client.deactivate().unwrap();
    let id = waiter.join().unwrap().expect("registration");
    assert_eq!(client.processors()[0].id, id);
    assert!(!client.is_active());
}

#[test]
fn inactive_client_confirms_immediately() {
    let client = Client::open("idle", ClientConfig::default()).unwrap();
    let unit = Counter::default();
    let id = client
        .register(ProcessorDescriptor::new("unit"), &[], unit.clone())
        .unwrap();
    client.activate_processor(id).unwrap();

    let mut dispatcher = client.take_dispatcher().unwrap();
    dispatcher.run_cycle(FRAMES);
    assert_eq!(unit.cycles.load(Ordering::SeqCst), 1);

    client.unregister(id).unwrap();
    dispatcher.run_cycle(FRAMES);
    assert_eq!(unit.cycles.load(Ordering::SeqCst), 1);
}

#[test]
fn dispatcher_runs_on_a_thread_of_its_own() {
    let (client, mut dispatcher) = active_client();
    let unit = Counter::default();
    let stop = Arc::new(AtomicBool::new(false));

    let audio = {
        let stop = stop.clone();
        thread::spawn(move || {
            while !stop.load(Ordering::SeqCst) {
                dispatcher.run_cycle(FRAMES);
                thread::sleep(Duration::from_millis(1));
            }
            dispatcher
        })
    };

    let id = client
        .register(ProcessorDescriptor::new("moved"), &[], unit.clone())
        .expect("registration");
    client.activate_processor(id).unwrap();
    while unit.cycles.load(Ordering::SeqCst) == 0 {
        thread::sleep(Duration::from_millis(1));
    }

    stop.store(true, Ordering::SeqCst);
    let dispatcher = audio.join().unwrap();
    assert!(dispatcher.frame_time() >= u64::from(FRAMES));
}
