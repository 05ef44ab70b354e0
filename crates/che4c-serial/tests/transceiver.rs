//! Transceiver lifecycle, send health checks, and poll routing

use che4c_serial::config::TransceiverConfig;
use che4c_serial::protocol::{
    ConnectionState, ControlStatus, MemoryChannel, MemoryDevice, SerialLink, StatusInterpreter,
    Transceiver, TransceiverRegistry,
};
use pretty_assertions::assert_eq;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Interpreter that records every buffer it is handed
#[derive(Default)]
struct Recorder {
    buffers: Mutex<Vec<String>>,
}

impl Recorder {
    fn buffers(&self) -> Vec<String> {
        self.buffers.lock().unwrap().clone()
    }
}

impl che4c_serial::protocol::LineInterpreter for Recorder {
    fn interpret_lines(&self, data: &str) {
        self.buffers.lock().unwrap().push(data.to_string());
    }
}

fn memory_link(name: &str) -> (SerialLink, MemoryDevice) {
    let (channel, device) = MemoryChannel::pair();
    let link = SerialLink::from_channel(name, Box::new(channel)).expect("memory link");
    (link, device)
}

fn recording_transceiver(registry: &Arc<TransceiverRegistry>) -> (Transceiver, Arc<Recorder>) {
    let recorder = Arc::new(Recorder::default());
    (Transceiver::new(registry, recorder.clone()), recorder)
}

fn fast_config(stale_after_ms: u64) -> TransceiverConfig {
    TransceiverConfig {
        stale_after_ms,
        ..TransceiverConfig::default()
    }
}

#[test]
fn test_is_connected_follows_lifecycle() {
    let registry = Arc::new(TransceiverRegistry::new());
    let (transceiver, _) = recording_transceiver(&registry);
    let (a, _dev_a) = memory_link("a");
    let (b, _dev_b) = memory_link("b");

    assert!(!transceiver.is_connected());

    transceiver.connect(a.clone());
    assert!(transceiver.is_connected());
    assert!(registry.contains(&transceiver));

    transceiver.disconnect();
    assert!(!transceiver.is_connected());
    assert!(!registry.contains(&transceiver));
    assert!(a.is_stopped());

    // disconnect twice is harmless
    transceiver.disconnect();
    assert_eq!(transceiver.state(), ConnectionState::Disconnected);

    transceiver.connect(b.clone());
    transceiver.connect(b.clone());
    assert_eq!(transceiver.state(), ConnectionState::Connected);
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_send_requires_connection() {
    let registry = Arc::new(TransceiverRegistry::new());
    let (transceiver, _) = recording_transceiver(&registry);

    assert!(!transceiver.send("x"));
    assert_eq!(transceiver.pending_transmissions(), 0);

    let (link, device) = memory_link("robot");
    transceiver.connect(link);
    transceiver.disconnect();

    assert!(!transceiver.send("x"));
    assert_eq!(transceiver.pending_transmissions(), 0);
    thread::sleep(Duration::from_millis(20));
    assert!(device.received().is_empty());
}

#[test]
fn test_back_to_back_sends_both_tracked() {
    let registry = Arc::new(TransceiverRegistry::new());
    let (transceiver, _) = recording_transceiver(&registry);
    let (link, _device) = memory_link("robot");
    transceiver.connect(link);

    assert!(transceiver.send("x"));
    assert!(transceiver.send("y"));
    assert!(transceiver.is_connected());
    assert_eq!(transceiver.pending_transmissions(), 2);
}

#[test]
fn test_stuck_write_disconnects_after_threshold() {
    let registry = Arc::new(TransceiverRegistry::new());
    let (transceiver, _) = recording_transceiver(&registry);
    let (link, device) = memory_link("robot");
    transceiver.connect(link.clone());

    device.stall_writes();
    assert!(transceiver.send("never arrives\n"));

    thread::sleep(Duration::from_millis(2100));
    assert!(!transceiver.send("z"));
    assert!(!transceiver.is_connected());
    assert!(!registry.contains(&transceiver));
    assert_eq!(transceiver.pending_transmissions(), 0);
    assert!(link.is_stopped());

    // the abandoned write may still finish; nobody is watching it
    device.resume_writes();
}

#[test]
fn test_stuck_write_within_threshold_is_tolerated() {
    let registry = Arc::new(TransceiverRegistry::new());
    let (transceiver, _) = recording_transceiver(&registry);
    let (link, device) = memory_link("robot");
    transceiver.connect(link);

    device.stall_writes();
    assert!(transceiver.send("slow"));
    thread::sleep(Duration::from_millis(50));
    assert!(transceiver.send("still fine"));
    assert!(transceiver.is_connected());

    device.resume_writes();
}

#[test]
fn test_finished_tasks_reclaimed_after_aging() {
    let registry = Arc::new(TransceiverRegistry::new());
    let recorder = Arc::new(Recorder::default());
    let transceiver = Transceiver::with_config(&registry, recorder, &fast_config(100));
    let (link, device) = memory_link("robot");
    transceiver.connect(link);

    assert!(transceiver.send("a\n"));
    assert!(transceiver.send("b\n"));
    thread::sleep(Duration::from_millis(150));
    assert_eq!(device.received_string(), "a\nb\n");
    assert_eq!(transceiver.pending_transmissions(), 2);

    assert!(transceiver.send("c\n"));
    assert!(transceiver.is_connected());
    assert_eq!(transceiver.pending_transmissions(), 1);
}

#[test]
fn test_failed_writes_do_not_disconnect() {
    let registry = Arc::new(TransceiverRegistry::new());
    let recorder = Arc::new(Recorder::default());
    let transceiver = Transceiver::with_config(&registry, recorder, &fast_config(50));
    let (link, device) = memory_link("robot");
    transceiver.connect(link.clone());

    device.fail_writes(true);
    assert!(transceiver.send("lost"));
    thread::sleep(Duration::from_millis(100));
    assert_eq!(link.stats().write_errors, 1);

    // the write finished (with an error), so the sweep only reclaims it
    assert!(transceiver.send("also lost"));
    assert!(transceiver.is_connected());
    assert_eq!(transceiver.pending_transmissions(), 1);
}

#[test]
fn test_reconnect_after_forced_disconnect() {
    let registry = Arc::new(TransceiverRegistry::new());
    let recorder = Arc::new(Recorder::default());
    let transceiver = Transceiver::with_config(&registry, recorder, &fast_config(50));
    let (wedged, wedged_device) = memory_link("wedged");
    transceiver.connect(wedged);

    wedged_device.stall_writes();
    assert!(transceiver.send("1\n"));
    thread::sleep(Duration::from_millis(100));
    assert!(!transceiver.send("2\n"));
    assert!(!transceiver.is_connected());

    let (fresh, fresh_device) = memory_link("fresh");
    transceiver.connect(fresh);
    assert!(transceiver.send_status(ControlStatus::WaitingForPlayer));
    thread::sleep(Duration::from_millis(20));
    assert_eq!(fresh_device.received_string(), "4\n");
}

#[test]
fn test_stuck_write_survives_reconnect() {
    let registry = Arc::new(TransceiverRegistry::new());
    let recorder = Arc::new(Recorder::default());
    let transceiver = Transceiver::with_config(&registry, recorder, &fast_config(50));
    let (a, dev_a) = memory_link("a");
    let (b, _dev_b) = memory_link("b");
    transceiver.connect(a);

    dev_a.stall_writes();
    assert!(transceiver.send("hang\n"));

    transceiver.connect(b.clone());
    assert_eq!(transceiver.pending_transmissions(), 1);

    thread::sleep(Duration::from_millis(100));
    assert!(!transceiver.send("z\n"));
    assert!(!transceiver.is_connected());
    assert!(!registry.contains(&transceiver));
    assert!(b.is_stopped());
    assert_eq!(transceiver.pending_transmissions(), 0);

    dev_a.resume_writes();
}

#[test]
fn test_send_racing_disconnect_never_tracks_late() {
    for _ in 0..2000 {
        let registry = Arc::new(TransceiverRegistry::new());
        let (transceiver, _) = recording_transceiver(&registry);
        let (link, _device) = memory_link("robot");
        transceiver.connect(link);

        let sender = {
            let t = transceiver.clone();
            thread::spawn(move || t.send("x\n"))
        };
        transceiver.disconnect();
        let tracked_at_disconnect = transceiver.pending_transmissions();
        let sent = sender.join().unwrap();

        // a send that lost the race must not slip its task in afterwards
        assert_eq!(transceiver.pending_transmissions(), tracked_at_disconnect);
        assert_eq!(usize::from(sent), tracked_at_disconnect);
        assert!(!transceiver.is_connected());
    }
}

#[test]
fn test_poll_none_is_noop() {
    let registry = Arc::new(TransceiverRegistry::new());
    let (transceiver, recorder) = recording_transceiver(&registry);
    let (link, _device) = memory_link("robot");
    transceiver.connect(link);

    assert_eq!(registry.poll(None), 0);
    assert!(recorder.buffers().is_empty());
}

#[test]
fn test_poll_routes_by_link() {
    let registry = Arc::new(TransceiverRegistry::new());
    let (first, first_rec) = recording_transceiver(&registry);
    let (second, second_rec) = recording_transceiver(&registry);
    let (a, dev_a) = memory_link("a");
    let (b, dev_b) = memory_link("b");
    first.connect(a.clone());
    second.connect(b.clone());

    dev_a.push_line("from a");
    dev_b.push_line("from b");
    dev_b.push_line("3");

    assert_eq!(registry.poll(Some(&b)), 1);
    assert!(first_rec.buffers().is_empty());
    assert_eq!(second_rec.buffers(), vec!["from b\n3\n".to_string()]);

    assert_eq!(registry.poll(Some(&a)), 1);
    assert_eq!(first_rec.buffers(), vec!["from a\n".to_string()]);
}

#[test]
fn test_poll_reaches_every_transceiver_on_link() {
    let registry = Arc::new(TransceiverRegistry::new());
    let (first, first_rec) = recording_transceiver(&registry);
    let (second, second_rec) = recording_transceiver(&registry);
    let (link, device) = memory_link("shared");
    first.connect(link.clone());
    second.connect(link.clone());

    device.push_line("1");
    assert_eq!(registry.poll(Some(&link)), 2);
    assert_eq!(first_rec.buffers(), second_rec.buffers());
}

#[test]
fn test_disconnected_transceiver_not_polled() {
    let registry = Arc::new(TransceiverRegistry::new());
    let (transceiver, recorder) = recording_transceiver(&registry);
    let (link, device) = memory_link("robot");
    transceiver.connect(link.clone());
    transceiver.disconnect();

    device.push_line("0");
    assert_eq!(registry.poll(Some(&link)), 0);
    assert!(recorder.buffers().is_empty());
}

#[test]
fn test_status_round_trip_through_poll() {
    let registry = Arc::new(TransceiverRegistry::new());
    let status = Arc::new(StatusInterpreter::new());
    let transceiver = Transceiver::new(&registry, status.clone());
    let (link, device) = memory_link("robot");
    transceiver.connect(link.clone());

    device.push_bytes(b"2\r\n5");
    registry.poll(Some(&link));
    assert_eq!(status.current(), Some(ControlStatus::Moving));

    device.push_bytes(b"\r\n");
    registry.poll(Some(&link));
    assert_eq!(status.current(), Some(ControlStatus::GameEnded));
}

#[test]
fn test_concurrent_sends() {
    let registry = Arc::new(TransceiverRegistry::new());
    let (transceiver, _) = recording_transceiver(&registry);
    let (link, device) = memory_link("robot");
    transceiver.connect(link);

    let workers: Vec<_> = (0..8)
        .map(|_| {
            let t = transceiver.clone();
            thread::spawn(move || t.send("x\n"))
        })
        .collect();
    for worker in workers {
        assert!(worker.join().unwrap());
    }

    assert_eq!(transceiver.pending_transmissions(), 8);
    thread::sleep(Duration::from_millis(50));
    assert_eq!(device.received_string(), "x\n".repeat(8));
}
