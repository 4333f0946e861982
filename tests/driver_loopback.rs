use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use midi_udp::{Driver, DriverConfig, DriverError, LinkState};
use parking_lot::Mutex;

const SETTLE: Duration = Duration::from_secs(2);

/// Bytes pushed into a port's sink.
#[derive(Clone, Default)]
struct Collector(Arc<Mutex<Vec<u8>>>);

impl Collector {
    fn sink(&self) -> impl Fn(u8) + Send + Sync + 'static {
        let bytes = Arc::clone(&self.0);
        move |byte| bytes.lock().push(byte)
    }

    fn bytes(&self) -> Vec<u8> {
        self.0.lock().clone()
    }
}

/// Outbound queue feeding a port's source.
#[derive(Clone, Default)]
struct Feed(Arc<Mutex<VecDeque<u8>>>);

impl Feed {
    fn source(&self) -> impl Fn() -> Option<u8> + Send + Sync + 'static {
        let queue = Arc::clone(&self.0);
        move || queue.lock().pop_front()
    }

    fn push(&self, bytes: &[u8]) {
        self.0.lock().extend(bytes.iter().copied());
    }
}

fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

fn local_config() -> DriverConfig {
    DriverConfig::default().with_bind_addr("127.0.0.1:0")
}

/// Two drivers on loopback, `b` invited by `a`.
fn connected_pair(a_config: DriverConfig, b_config: DriverConfig) -> (Driver, Driver) {
    let b = Driver::start(b_config).unwrap();
    let a = Driver::start(a_config.with_peer(b.local_addr().to_string())).unwrap();
    assert!(a.wait_for_state(LinkState::Connected, SETTLE));
    assert!(b.wait_for_state(LinkState::Connected, SETTLE));
    (a, b)
}

#[test]
fn test_handshake_publishes_peers() {
    let (a, b) = connected_pair(local_config(), local_config());
    assert_eq!(a.status().peer, Some(b.local_addr()));
    assert_eq!(b.status().peer, Some(a.local_addr()));
}

#[test]
fn test_running_status_stream_delivered() {
    let (a, b) = connected_pair(local_config(), local_config());
    let feed = Feed::default();
    let received = Collector::default();
    let tx = a.open_port(0, feed.source(), |_byte: u8| {}).unwrap();
    b.open_port(0, || -> Option<u8> { None }, received.sink())
        .unwrap();

    // note on, running-status note off, timing clock
    feed.push(&[0x90, 0x40, 0x60, 0x40, 0x00, 0xF8]);
    a.activate(tx);

    let expected = [0x90u8, 0x40, 0x60, 0x90, 0x40, 0x00, 0xF8];
    assert!(wait_until(SETTLE, || received.bytes().len() >= expected.len()));
    assert_eq!(received.bytes(), expected);
    assert_eq!(a.stats().dropped_messages, 0);
}

#[test]
fn test_ports_are_kept_apart() {
    let (a, b) = connected_pair(local_config(), local_config());
    let feeds = [Feed::default(), Feed::default()];
    let sinks = [Collector::default(), Collector::default()];
    let handles: Vec<_> = feeds
        .iter()
        .enumerate()
        .map(|(index, feed)| a.open_port(index + 2, feed.source(), |_byte: u8| {}).unwrap())
        .collect();
    for (index, sink) in sinks.iter().enumerate() {
        b.open_port(index + 2, || -> Option<u8> { None }, sink.sink())
            .unwrap();
    }

    feeds[0].push(&[0xB0, 0x07, 0x64]);
    feeds[1].push(&[0xC1, 0x05]);
    let activator = a.activator();
    for handle in &handles {
        activator.activate(*handle);
    }

    assert!(wait_until(SETTLE, || {
        sinks[0].bytes().len() == 3 && sinks[1].bytes().len() == 2
    }));
    assert_eq!(sinks[0].bytes(), [0xB0, 0x07, 0x64]);
    assert_eq!(sinks[1].bytes(), [0xC1, 0x05]);
}

#[test]
fn test_sysex_delivered_and_oversized_dropped() {
    let (a, b) = connected_pair(local_config().with_max_sysex_size(8), local_config());
    let feed = Feed::default();
    let received = Collector::default();
    let tx = a.open_port(1, feed.source(), |_byte: u8| {}).unwrap();
    b.open_port(1, || -> Option<u8> { None }, received.sink())
        .unwrap();

    feed.push(&[0xF0, 0x7D, 0x01, 0x02, 0xF7]);
    feed.push(&[0xF0, 0x7D, 0, 0, 0, 0, 0, 0, 0, 0, 0xF7]);
    feed.push(&[0x80, 0x3C, 0x00]);
    a.activate(tx);

    let expected = [0xF0u8, 0x7D, 0x01, 0x02, 0xF7, 0x80, 0x3C, 0x00];
    assert!(wait_until(SETTLE, || received.bytes().len() >= expected.len()));
    assert_eq!(received.bytes(), expected);
    assert_eq!(a.stats().invalid_midi, 1);
}

#[test]
fn test_unconnected_messages_are_dropped() {
    let driver = Driver::start(local_config()).unwrap();
    assert_eq!(driver.status().state, LinkState::Disconnected);

    let feed = Feed::default();
    let handle = driver.open_port(0, feed.source(), |_byte: u8| {}).unwrap();
    feed.push(&[0x90, 0x40, 0x60, 0xFE]);
    driver.activate(handle);

    assert!(wait_until(SETTLE, || driver.stats().dropped_messages == 2));
    assert_eq!(driver.stats().sent_packets, 0);
}

#[test]
fn test_close_port_waits_for_drain() {
    let driver = Driver::start(local_config()).unwrap();
    let started = Arc::new(AtomicBool::new(false));
    let finished = Arc::new(AtomicBool::new(false));
    let source = {
        let started = Arc::clone(&started);
        let finished = Arc::clone(&finished);
        move || -> Option<u8> {
            if !started.swap(true, Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(200));
                finished.store(true, Ordering::SeqCst);
            }
            None
        }
    };
    let handle = driver.open_port(4, source, |_byte: u8| {}).unwrap();

    driver.activate(handle);
    assert!(wait_until(SETTLE, || started.load(Ordering::SeqCst)));
    driver.close_port(handle);

    assert!(finished.load(Ordering::SeqCst), "close returned during a drain");
    assert!(!driver.is_port_open(4));
    // the slot is free again
    assert!(driver.open_port(4, || -> Option<u8> { None }, |_byte: u8| {}).is_ok());
}

#[test]
fn test_open_port_errors() {
    let driver = Driver::start(local_config()).unwrap();
    driver.open_port(0, || -> Option<u8> { None }, |_byte: u8| {}).unwrap();

    assert!(matches!(
        driver.open_port(0, || -> Option<u8> { None }, |_byte: u8| {}),
        Err(DriverError::PortInUse { index: 0 })
    ));
    assert!(matches!(
        driver.open_port(8, || -> Option<u8> { None }, |_byte: u8| {}),
        Err(DriverError::PortOutOfRange { index: 8 })
    ));
}

#[test]
fn test_third_driver_is_rejected() {
    let (a, b) = connected_pair(local_config(), local_config());
    let c = Driver::start(local_config().with_peer(b.local_addr().to_string())).unwrap();

    assert!(c.wait_for_state(LinkState::Disconnected, SETTLE));
    assert_eq!(c.status().peer, None);
    assert_eq!(b.status().peer, Some(a.local_addr()));
    assert_eq!(a.status().state, LinkState::Connected);
}

#[test]
fn test_shutdown_sends_exit() {
    let (a, b) = connected_pair(local_config(), local_config());
    b.shutdown();
    assert!(a.wait_for_state(LinkState::Disconnected, SETTLE));
}

#[test]
fn test_disconnect_and_reconnect() {
    let (a, b) = connected_pair(local_config(), local_config());

    a.disconnect().unwrap();
    assert!(a.wait_for_state(LinkState::Disconnected, SETTLE));
    assert!(b.wait_for_state(LinkState::Disconnected, SETTLE));

    b.connect(&a.local_addr().to_string()).unwrap();
    assert!(a.wait_for_state(LinkState::Connected, SETTLE));
    assert!(b.wait_for_state(LinkState::Connected, SETTLE));
    assert_eq!(b.status().peer, Some(a.local_addr()));
}

#[test]
fn test_idle_link_survives_keepalive() {
    let interval = Duration::from_millis(50);
    let (a, b) = connected_pair(
        local_config().with_keepalive_interval(interval),
        local_config().with_keepalive_interval(interval),
    );

    thread::sleep(interval * 8);
    assert_eq!(a.status().state, LinkState::Connected);
    assert_eq!(b.status().state, LinkState::Connected);
    assert!(a.stats().rtt_samples > 0);
}

#[test]
fn test_bad_config_rejected_before_start() {
    let err = Driver::start(local_config().with_max_sysex_size(1)).unwrap_err();
    assert!(matches!(err, DriverError::Config(_)));

    let err = Driver::start(local_config().with_peer("[::1")).unwrap_err();
    assert!(matches!(err, DriverError::Transport(_)));
}
