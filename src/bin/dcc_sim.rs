//! Desktop simulator for the programming track.
//!
//! Runs the packet engine against a simulated decoder: a "waveform" task
//! drains the static queue at packet rate and turns the decoder's answers
//! into track current, while the dispatcher ticks the controller and walks
//! through a few CV operations.
//!
//! Usage: cargo run --features sim --bin dcc_sim
//!
//! Set `RUST_LOG=rs_dcc=trace` to see every packet and ack sample.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use tokio::sync::oneshot::{self, error::TryRecvError};
use tokio::time::{self, Instant};
use tracing::info;
use tracing_subscriber::EnvFilter;

use rs_dcc::hal::MockDecoder;
use rs_dcc::{
    Completion, CurrentSense, PacketQueue, PomCallback, RailcomResponder, ServiceModeResponse,
    StationConfig, TrackController,
};

const QUEUE_SIZE: usize = 64;
/// Roughly one DCC packet with preamble at 58 us per one-bit.
const PACKET_TIME: Duration = Duration::from_millis(3);
const TICK: Duration = Duration::from_millis(1);
const OP_TIMEOUT: Duration = Duration::from_secs(5);

static PROG: PacketQueue<QUEUE_SIZE> = PacketQueue::new();

type Track = TrackController<'static, SimHardware, QUEUE_SIZE>;

/// Current sensor fed by the waveform task.
struct SimHardware {
    current_ma: Arc<AtomicU32>,
    base_ma: u32,
}

impl CurrentSense for SimHardware {
    fn read_current_ma(&mut self) -> u32 {
        self.current_ma.load(Ordering::Relaxed)
    }

    fn set_base_current(&mut self) {
        self.base_ma = self.read_current_ma();
    }

    fn base_current_ma(&self) -> u32 {
        self.base_ma
    }
}

impl RailcomResponder for SimHardware {
    // No RailCom on the programming track
    fn set_pom_callback(&mut self, _callback: PomCallback) {}
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("rs_dcc=debug,dcc_sim=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

/// Waveform interrupt stand-in: one packet per `PACKET_TIME`.
async fn waveform(mut decoder: MockDecoder, present: Arc<AtomicBool>, current_ma: Arc<AtomicU32>) {
    let mut ticker = time::interval(PACKET_TIME);
    loop {
        ticker.tick().await;
        decoder.acks_enabled = present.load(Ordering::Relaxed);
        let packet = PROG.next_for_transmit();
        current_ma.store(decoder.current_for(packet.as_ref()), Ordering::Relaxed);
    }
}

fn completion() -> (Completion, oneshot::Receiver<ServiceModeResponse>) {
    let (tx, rx) = oneshot::channel();
    let done: Completion = Box::new(move |response| {
        let _ = tx.send(response);
    });
    (done, rx)
}

/// Tick the controller until the operation completes.
async fn complete(
    track: &mut Track,
    mut rx: oneshot::Receiver<ServiceModeResponse>,
) -> Result<ServiceModeResponse> {
    let mut ticker = time::interval(TICK);
    let deadline = Instant::now() + OP_TIMEOUT;
    loop {
        ticker.tick().await;
        track.tick();
        match rx.try_recv() {
            Ok(response) => return Ok(response),
            Err(TryRecvError::Empty) if Instant::now() < deadline => {}
            Err(e) => bail!("service-mode operation did not complete: {e}"),
        }
    }
}

fn report(label: &str, response: &ServiceModeResponse) {
    match response.value {
        Some(value) => info!(cv = response.cv, value, "{label}: ok"),
        None => info!(cv = response.cv, "{label}: no acknowledgment"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = StationConfig::default();
    let current_ma = Arc::new(AtomicU32::new(0));
    let present = Arc::new(AtomicBool::new(true));

    // Factory-fresh decoder: short address 3, 28/128 steps, analog on
    let decoder = MockDecoder::new().with_cv(1, 3).with_cv(29, 6);
    let waveform = tokio::spawn(waveform(decoder, present.clone(), current_ma.clone()));

    let hardware = SimHardware {
        current_ma,
        base_ma: 0,
    };
    let mut track: Track = TrackController::new(&PROG, hardware, config.prog);
    info!(track = %track.config().name, "programming track up");

    let (done, rx) = completion();
    track.read_cv(1, 1, 0, done)?;
    report("read CV1", &complete(&mut track, rx).await?);

    let (done, rx) = completion();
    track.write_cv_byte(1, 42, 2, 0, done)?;
    report("write CV1=42", &complete(&mut track, rx).await?);

    let (done, rx) = completion();
    track.read_cv(1, 3, 0, done)?;
    report("read back CV1", &complete(&mut track, rx).await?);

    // CV29 bit 5: long address in use
    let (done, rx) = completion();
    track.write_cv_bit(29, 5, true, 4, 0, done)?;
    report("set CV29 bit 5", &complete(&mut track, rx).await?);

    let (done, rx) = completion();
    track.read_cv(29, 5, 0, done)?;
    report("read back CV29", &complete(&mut track, rx).await?);

    // Lift the loco off the track: every verify times out
    present.store(false, Ordering::Relaxed);
    let (done, rx) = completion();
    track.read_cv(8, 6, 0, done)?;
    report("read CV8 with no decoder", &complete(&mut track, rx).await?);

    waveform.abort();
    Ok(())
}
