//! End-to-end runs of a coordinator over loopback tcp, with the test playing
//! both peers.

use growbox::config::NodeConfig;
use growbox::coordinator::barrier::StartupBarrier;
use growbox::coordinator::Coordinator;
use growbox::domain::PlantSnapshot;
use growbox::hal::MockHal;
use growbox::protocol::{Command, Framing, Message, WireReader, WireWriter, UNKNOWN_REQUEST};
use growbox::sensor::{GrowthProbe, MockEnvironment};
use growbox::state::SharedPlantState;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const HOUR_NEVER: u64 = 3_600_000;

struct CountingProbe {
    calls: Arc<AtomicUsize>,
    distance_cm: f32,
}

impl GrowthProbe for CountingProbe {
    fn distance_cm(&mut self) -> anyhow::Result<f32> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.distance_cm)
    }
}

/// gap between writes in raw mode, so every message is its own read
const RAW_PACING: Duration = Duration::from_millis(50);

struct Peer {
    rx: WireReader<OwnedReadHalf>,
    tx: WireWriter<OwnedWriteHalf>,
    framing: Framing,
}

impl Peer {
    async fn connect(port: u16, framing: Framing) -> Self {
        let stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let (read, write) = stream.into_split();
        Self { rx: WireReader::new(read, framing), tx: WireWriter::new(write, framing), framing }
    }

    async fn send(&mut self, cmd: Command) {
        self.tx.write_command(cmd).await.unwrap();
        if self.framing == Framing::Raw {
            tokio::time::sleep(RAW_PACING).await;
        }
    }

    async fn next(&mut self) -> Message {
        tokio::time::timeout(Duration::from_secs(5), self.rx.read_message())
            .await
            .expect("no message within 5s")
            .unwrap()
    }

    async fn ask(&mut self, cmd: Command) -> String {
        self.send(cmd).await;
        self.next().await.as_text().to_string()
    }

    async fn quiet(&mut self) -> bool {
        tokio::time::timeout(Duration::from_millis(200), self.rx.read_message()).await.is_err()
    }
}

struct Harness {
    port: u16,
    framing: Framing,
    state: SharedPlantState,
    barrier: Arc<StartupBarrier>,
    probe_calls: Arc<AtomicUsize>,
    shutdown: CancellationToken,
    server: JoinHandle<anyhow::Result<()>>,
}

impl Harness {
    async fn start(tick_ms: u64, distance_cm: f32) -> Self {
        Self::start_with(Framing::LengthPrefixed, tick_ms, distance_cm).await
    }

    async fn start_with(framing: Framing, tick_ms: u64, distance_cm: f32) -> Self {
        let mut config = NodeConfig::default();
        config.network.listen_port = 0;
        config.network.framing = framing;
        config.schedule.tick_interval_ms = tick_ms;
        config.sensors.sample_interval_ms = 10;

        let probe_calls = Arc::new(AtomicUsize::new(0));
        let coordinator = Coordinator::new(
            config,
            Arc::new(MockHal::new()),
            Arc::new(MockEnvironment { reading: (23.5, 56.5) }),
            Box::new(CountingProbe { calls: probe_calls.clone(), distance_cm }),
        );
        let state = coordinator.state();
        let barrier = coordinator.barrier();
        let listener = coordinator.bind().await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let shutdown = CancellationToken::new();
        let server = tokio::spawn(coordinator.serve(listener, shutdown.clone()));

        Self { port, framing, state, barrier, probe_calls, shutdown, server }
    }

    /// display first, then actuator
    async fn peers(&self) -> (Peer, Peer) {
        let display = Peer::connect(self.port, self.framing).await;
        wait_until(|| self.barrier.flags().display_ready).await;
        let actuator = Peer::connect(self.port, self.framing).await;
        wait_until(|| self.barrier.flags().released()).await;
        (display, actuator)
    }

    async fn stop(self) {
        self.shutdown.cancel();
        self.server.await.unwrap().unwrap();
    }
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached within 5s");
}

async fn water_low_reaches_display_exactly_once(framing: Framing) {
    let harness = Harness::start_with(framing, HOUR_NEVER, 40.0).await;
    let (mut display, mut actuator) = harness.peers().await;

    actuator.send(Command::WaterLow).await;
    assert_eq!(display.next().await, Message::Command(Command::WaterLow));

    actuator.send(Command::WaterLow).await;
    // TEMP round trip proves the second report was handled
    actuator.ask(Command::Temp).await;
    assert!(display.quiet().await);
    assert!(harness.state.water_low());

    actuator.send(Command::WaterOk).await;
    assert_eq!(display.next().await, Message::Command(Command::WaterOk));
    assert!(!harness.state.water_low());

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn water_low_reaches_display_exactly_once_raw() {
    water_low_reaches_display_exactly_once(Framing::Raw).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn water_low_reaches_display_exactly_once_length_prefixed() {
    water_low_reaches_display_exactly_once(Framing::LengthPrefixed).await;
}

async fn plant_update_matches_state(framing: Framing) {
    let harness = Harness::start_with(framing, HOUR_NEVER, 40.0).await;
    let (mut display, mut actuator) = harness.peers().await;

    assert_eq!(display.ask(Command::PlantName).await, "Tomato");
    assert_eq!(display.ask(Command::PlantDate).await, "2024-06-01");

    actuator.send(Command::LedOn).await;
    wait_until(|| harness.state.led_on() && harness.state.temperature_tenths() == 235).await;

    display.tx.write_command(Command::PlantUpdate).await.unwrap();
    // let the marker and the record pile up so one read sees both
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(display.next().await, Message::Command(Command::PlantData));
    let snapshot = display.rx.read_snapshot().await.unwrap();
    assert_eq!(snapshot, PlantSnapshot { temperature_tenths: 235, humidity_tenths: 565, led_on: true });
    assert_eq!(snapshot, harness.state.snapshot());

    assert_eq!(actuator.ask(Command::Humid).await, "565");

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn plant_update_matches_state_raw() {
    plant_update_matches_state(Framing::Raw).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn plant_update_matches_state_length_prefixed() {
    plant_update_matches_state(Framing::LengthPrefixed).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_requests_leave_both_links_open() {
    let harness = Harness::start(HOUR_NEVER, 40.0).await;
    let (mut display, mut actuator) = harness.peers().await;

    display.tx.write_text("plant name").await.unwrap();
    assert_eq!(display.next().await.as_text(), UNKNOWN_REQUEST);
    assert_eq!(actuator.ask(Command::LightStart).await, UNKNOWN_REQUEST);

    assert_eq!(display.ask(Command::PlantName).await, "Tomato");
    actuator.tx.write_command(Command::LedOn).await.unwrap();
    wait_until(|| harness.state.led_on()).await;

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn nothing_runs_until_both_peers_connect() {
    let harness = Harness::start(10, 40.0).await;

    let mut display = Peer::connect(harness.port, harness.framing).await;
    wait_until(|| harness.barrier.flags().display_ready).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(harness.probe_calls.load(Ordering::SeqCst), 0);
    assert_eq!(harness.state.temperature_tenths(), 0);
    assert!(!harness.barrier.flags().released());
    // the display is already served while waiting
    assert_eq!(display.ask(Command::PlantName).await, "Tomato");

    let _actuator = Peer::connect(harness.port, harness.framing).await;
    wait_until(|| harness.probe_calls.load(Ordering::SeqCst) > 0).await;
    wait_until(|| harness.state.temperature_tenths() == 235).await;

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn one_simulated_day() {
    let harness = Harness::start(20, 10.0).await;
    let (mut display, mut actuator) = harness.peers().await;

    assert_eq!(display.next().await, Message::Command(Command::GrowOk));
    wait_until(|| harness.state.get().growth_confirmed).await;

    actuator.tx.write_command(Command::LedOn).await.unwrap();
    assert_eq!(actuator.next().await, Message::Command(Command::LightStart));
    assert_eq!(actuator.next().await, Message::Command(Command::Water));
    assert_eq!(actuator.next().await, Message::Command(Command::LightEnd));
    assert!(!harness.state.led_on());

    // growth is announced once per process
    assert!(display.quiet().await);

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn bind_failure_is_reported() {
    let taken = std::net::TcpListener::bind("0.0.0.0:0").unwrap();
    let mut config = NodeConfig::default();
    config.network.listen_port = taken.local_addr().unwrap().port();

    let coordinator = Coordinator::new(
        config,
        Arc::new(MockHal::new()),
        Arc::new(MockEnvironment::default()),
        Box::new(CountingProbe { calls: Arc::new(AtomicUsize::new(0)), distance_cm: 40.0 }),
    );
    let err = coordinator.bind().await.unwrap_err();
    assert!(err.to_string().contains("could not listen"));
}
