//! End-to-end tests against a mock amplifier listening on localhost.

use neets_amp_bridge::{
    Action, AmpBridge, BridgeConfig, BridgeError, BridgeEvent, DeviceState, LinkState,
    ReconnectPolicy, StateView, Subscription,
};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::time::{sleep, timeout};

const WAIT: Duration = Duration::from_secs(3);

/// One accepted bridge connection, seen from the amplifier's side
struct MockAmp {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl MockAmp {
    async fn accept(listener: &TcpListener) -> Self {
        let (stream, _) = timeout(WAIT, listener.accept())
            .await
            .expect("bridge did not connect")
            .unwrap();
        let (read_half, writer) = stream.into_split();
        Self {
            reader: BufReader::new(read_half),
            writer,
        }
    }

    async fn record(&mut self) -> String {
        let mut buf = Vec::new();
        timeout(WAIT, self.reader.read_until(b'\r', &mut buf))
            .await
            .expect("no record from bridge")
            .unwrap();
        String::from_utf8(buf).unwrap().trim_end_matches('\r').to_string()
    }

    /// Read records until `expected` arrives, skipping poll queries
    async fn expect(&mut self, expected: &str) {
        loop {
            if self.record().await == expected {
                return;
            }
        }
    }

    async fn send(&mut self, bytes: &str) {
        self.writer.write_all(bytes.as_bytes()).await.unwrap();
        self.writer.flush().await.unwrap();
    }
}

async fn mock_listener() -> (TcpListener, BridgeConfig) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let mut config = BridgeConfig::new("127.0.0.1", port);
    config.poll_interval = Duration::from_secs(60);
    config.poll_step = Duration::from_millis(5);
    config.connect_timeout = Duration::from_secs(1);
    config.reconnect = ReconnectPolicy {
        base_delay: Duration::from_millis(50),
        max_delay: Duration::from_millis(200),
        multiplier: 1.5,
        max_attempts: 5,
    };
    (listener, config)
}

async fn wait_for(bridge: &AmpBridge, check: impl Fn(&DeviceState) -> bool) -> DeviceState {
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let state = bridge.state().await;
        if check(&state) {
            return state;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "state never matched: {:?}",
            state
        );
        sleep(Duration::from_millis(10)).await;
    }
}

async fn next_event(
    subscription: &mut Subscription,
    matches: impl Fn(&BridgeEvent) -> bool,
) -> BridgeEvent {
    timeout(WAIT, async {
        loop {
            let event = subscription.recv().await.unwrap();
            if matches(&event) {
                return event;
            }
        }
    })
    .await
    .expect("event never arrived")
}

#[tokio::test]
async fn connects_and_polls_full_status() {
    let (listener, config) = mock_listener().await;
    let bridge = AmpBridge::start(config).unwrap();

    let mut amp = MockAmp::accept(&listener).await;
    assert_eq!(amp.record().await, "NEUNIT=1,POWER=?");
    assert_eq!(amp.record().await, "NEUNIT=1,VOL=?");
    amp.expect("NEUNIT=1,SETTINGS=OUTPUT,EQHIGH=?").await;

    wait_for(&bridge, |s| s.connected).await;
    let status = bridge.connection_status().await;
    assert_eq!(status.state, LinkState::Connected);
    assert_eq!(status.reconnect_attempts, 0);

    bridge.shutdown().await;
}

#[tokio::test]
async fn volume_set_is_confirmed_by_device() {
    let (listener, config) = mock_listener().await;
    let bridge = AmpBridge::start(config).unwrap();
    let mut amp = MockAmp::accept(&listener).await;
    wait_for(&bridge, |s| s.connected).await;

    bridge.submit(Action::VolumeSet { value: -20 }).await.unwrap();
    amp.expect("NEUNIT=1,VOL=-20").await;
    amp.expect("NEUNIT=1,VOL=?").await;
    amp.send("NEUNIT=1,VOL=-20\r").await;

    let state = wait_for(&bridge, |s| s.volume_db == -20).await;
    assert_eq!(StateView::from(&state).volume_percent, 61);

    bridge.shutdown().await;
}

#[tokio::test]
async fn invalid_source_is_rejected_before_sending() {
    let (listener, config) = mock_listener().await;
    let bridge = AmpBridge::start(config).unwrap();
    let mut amp = MockAmp::accept(&listener).await;
    wait_for(&bridge, |s| s.connected).await;
    amp.expect("NEUNIT=1,SETTINGS=OUTPUT,EQHIGH=?").await;

    let err = bridge.submit(Action::SourceSelect { source: 7 }).await.unwrap_err();
    assert!(matches!(err, BridgeError::InvalidParameter(_)));

    // The next thing on the wire is the valid command, not source 7
    bridge.submit(Action::SourceSelect { source: 2 }).await.unwrap();
    assert_eq!(amp.record().await, "NEUNIT=1,INPUT=2");

    bridge.shutdown().await;
}

#[tokio::test]
async fn records_split_across_writes_are_reassembled() {
    let (listener, config) = mock_listener().await;
    let bridge = AmpBridge::start(config).unwrap();
    let mut amp = MockAmp::accept(&listener).await;
    wait_for(&bridge, |s| s.connected).await;

    amp.send("NEUNIT=1,VO").await;
    sleep(Duration::from_millis(20)).await;
    amp.send("L=-30\rNEUNIT=1,POWER=ON,MUTE=ON\r").await;

    let state = wait_for(&bridge, |s| s.volume_db == -30 && s.power).await;
    assert!(state.mute);

    bridge.shutdown().await;
}

#[tokio::test]
async fn device_error_is_published() {
    let (listener, config) = mock_listener().await;
    let bridge = AmpBridge::start(config).unwrap();
    let mut events = bridge.subscribe().await;
    let mut amp = MockAmp::accept(&listener).await;
    wait_for(&bridge, |s| s.connected).await;

    amp.send("NEUNIT=1,ERROR\r").await;
    let event = next_event(&mut events, |e| matches!(e, BridgeEvent::DeviceError(_))).await;
    assert_eq!(event, BridgeEvent::DeviceError("NEUNIT=1,ERROR".to_string()));

    bridge.shutdown().await;
}

#[tokio::test]
async fn reconnects_after_device_closes() {
    let (listener, config) = mock_listener().await;
    let bridge = AmpBridge::start(config).unwrap();
    let mut events = bridge.subscribe().await;

    let amp = MockAmp::accept(&listener).await;
    wait_for(&bridge, |s| s.connected).await;
    drop(amp);

    next_event(&mut events, |e| matches!(e, BridgeEvent::State(s) if !s.connected)).await;

    let mut amp = MockAmp::accept(&listener).await;
    assert_eq!(amp.record().await, "NEUNIT=1,POWER=?");
    wait_for(&bridge, |s| s.connected).await;
    assert_eq!(bridge.connection_status().await.reconnect_attempts, 0);

    bridge.shutdown().await;
}

#[tokio::test]
async fn manual_disconnect_suppresses_reconnect() {
    let (listener, config) = mock_listener().await;
    let bridge = AmpBridge::start(config).unwrap();
    let _amp = MockAmp::accept(&listener).await;
    wait_for(&bridge, |s| s.connected).await;

    bridge.disconnect().await;
    wait_for(&bridge, |s| !s.connected).await;
    assert!(timeout(Duration::from_millis(300), listener.accept()).await.is_err());

    let status = bridge.connection_status().await;
    assert!(status.manually_disconnected);
    assert_eq!(status.state, LinkState::Disconnected);

    let err = bridge.submit(Action::PowerOn).await.unwrap_err();
    assert!(matches!(err, BridgeError::NotConnected));

    bridge.submit(Action::Connect).await.unwrap();
    let mut amp = MockAmp::accept(&listener).await;
    assert_eq!(amp.record().await, "NEUNIT=1,POWER=?");
    wait_for(&bridge, |s| s.connected).await;
    assert!(!bridge.connection_status().await.manually_disconnected);

    bridge.shutdown().await;
}

#[tokio::test]
async fn reconnect_gives_up_after_budget() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let mut config = BridgeConfig::new("127.0.0.1", port);
    config.connect_timeout = Duration::from_millis(500);
    config.reconnect = ReconnectPolicy {
        base_delay: Duration::from_millis(100),
        max_delay: Duration::from_millis(200),
        multiplier: 1.5,
        max_attempts: 2,
    };

    let bridge = AmpBridge::start(config).unwrap();
    let mut events = bridge.subscribe().await;

    let event = next_event(&mut events, |e| {
        matches!(e, BridgeEvent::ReconnectExhausted { .. })
    })
    .await;
    assert_eq!(event, BridgeEvent::ReconnectExhausted { attempts: 2 });

    let status = bridge.connection_status().await;
    assert!(status.reconnect_exhausted);
    assert!(!status.connected);

    let err = bridge.submit(Action::PowerOn).await.unwrap_err();
    assert!(matches!(err, BridgeError::ReconnectExhausted { attempts: 2 }));

    bridge.shutdown().await;
}

#[tokio::test]
async fn shutdown_publishes_disconnect_then_closes_feed() {
    let (listener, config) = mock_listener().await;
    let bridge = AmpBridge::start(config).unwrap();
    let mut amp = MockAmp::accept(&listener).await;
    wait_for(&bridge, |s| s.connected).await;
    amp.expect("NEUNIT=1,SETTINGS=OUTPUT,EQHIGH=?").await;

    let mut events = bridge.subscribe().await;
    bridge.shutdown().await;

    match timeout(WAIT, events.recv()).await.unwrap() {
        Ok(BridgeEvent::State(state)) => assert!(!state.connected),
        other => panic!("expected final disconnected state, got {:?}", other),
    }
    assert!(matches!(events.recv().await, Err(BridgeError::Closed)));

    let mut rest = Vec::new();
    let read = timeout(WAIT, amp.reader.read_to_end(&mut rest)).await.unwrap();
    assert!(read.is_ok(), "socket was not closed cleanly");
}

#[tokio::test]
async fn unusable_timing_is_rejected_at_start() {
    let (_listener, mut config) = mock_listener().await;
    config.hold.repeat_interval = Duration::ZERO;
    assert!(matches!(AmpBridge::start(config), Err(BridgeError::Config(_))));

    let (_listener, mut config) = mock_listener().await;
    config.reconnect.multiplier = f64::NAN;
    assert!(matches!(AmpBridge::start(config), Err(BridgeError::Config(_))));
}
