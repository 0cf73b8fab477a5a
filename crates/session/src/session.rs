use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{broadcast, mpsc, watch, RwLock};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use vapelink_core::protocol::{encode_query, encode_set_pid, encode_set_temperature};
use vapelink_core::{
    heating_percent, parse_line, pid_in_range, Direction, HistoryBuffer, HistorySample, PidState,
    Query, SetpointState, TelemetryEvent, WireVariant, PID_COEFFICIENT_MAX,
};

use crate::config::SessionConfig;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("PID coefficient {name} out of range: {value} (allowed 0.0..={max})", max = PID_COEFFICIENT_MAX)]
    PidOutOfRange { name: &'static str, value: f32 },
    #[error("the self-contained wire variant has no query telegrams")]
    QueryUnsupported,
    #[error("session is disconnected")]
    Disconnected,
}

/// Notifications toward the UI shell. The core never calls UI code; the
/// shell subscribes here and renders what it receives.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    Telemetry {
        temperature: f32,
        heating_percent: u8,
        battery_voltage: f32,
        battery_percent: u8,
    },
    Setpoint {
        desired: i32,
    },
    Pid {
        p: f32,
        i: f32,
        d: f32,
    },
    Disconnected,
}

/// Latest status telegram, normalized for display.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TelemetryReadout {
    pub temperature: f32,
    pub heating_percent: u8,
    pub battery_voltage: f32,
    pub battery_percent: u8,
}

/// One queued outbound frame plus the state change that becomes effective
/// once the frame has actually been written.
struct Outbound {
    frame: Vec<u8>,
    on_sent: OnSent,
}

enum OnSent {
    Nothing,
    /// Commit issued under this press generation; stale once a newer press
    /// has claimed the setpoint.
    CommitSetpoint { press_seq: u64 },
    ApplyPid(PidState),
}

impl Outbound {
    fn plain(frame: Vec<u8>) -> Self {
        Self { frame, on_sent: OnSent::Nothing }
    }
}

/// Everything the read loop, the write path and UI snapshots share. One lock
/// so the twin history series can never be observed torn.
struct Shared {
    history: HistoryBuffer,
    setpoint: SetpointState,
    pid: PidState,
    /// A local PID edit is queued but not yet on the wire; device reports
    /// must not overwrite it meanwhile.
    pid_edit_pending: bool,
    /// Bumped on every local tick. A commit frame that waited out the
    /// settle delay compares its stamp against this before releasing the
    /// suppress flag, so it cannot unsuppress a newer gesture.
    press_seq: u64,
    last_status: Option<TelemetryReadout>,
}

impl Shared {
    fn new() -> Self {
        Self {
            history: HistoryBuffer::new(),
            setpoint: SetpointState::new(),
            pid: PidState::default(),
            pid_edit_pending: false,
            press_seq: 0,
            last_status: None,
        }
    }
}

/// A live session with one connected vape.
///
/// Owns the byte stream and runs two tasks over it: a read loop decoding
/// telemetry lines, and a single writer that serializes every outbound frame
/// and enforces the device's settle delay between them. Cheap to clone; all
/// clones talk to the same session.
#[derive(Clone)]
pub struct DeviceSession {
    shared: Arc<RwLock<Shared>>,
    commands_tx: mpsc::Sender<Outbound>,
    events_tx: broadcast::Sender<SessionEvent>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    connected: Arc<AtomicBool>,
    variant: WireVariant,
}

impl DeviceSession {
    /// Takes over an already connected byte stream (the RFCOMM socket) and
    /// spawns the read loop and the write path.
    pub fn spawn<S>(stream: S, config: SessionConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let shared = Arc::new(RwLock::new(Shared::new()));
        let (events_tx, _) = broadcast::channel(config.event_capacity);
        let (commands_tx, commands_rx) = mpsc::channel(config.command_capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let connected = Arc::new(AtomicBool::new(true));

        tokio::spawn(read_loop(
            reader,
            shared.clone(),
            events_tx.clone(),
            connected.clone(),
            shutdown_rx.clone(),
            config.variant,
        ));
        tokio::spawn(write_loop(
            writer,
            commands_rx,
            shared.clone(),
            events_tx.clone(),
            connected.clone(),
            shutdown_rx,
            config.settle_delay,
        ));

        let session = Self {
            shared,
            commands_tx,
            events_tx,
            shutdown_tx: Arc::new(shutdown_tx),
            connected,
            variant: config.variant,
        };

        // Legacy firmware answers t?/p?; the newer one reports unprompted.
        if config.query_on_start && config.variant == WireVariant::Legacy {
            let _ = session.commands_tx.try_send(Outbound::plain(encode_query(Query::Target)));
            let _ = session.commands_tx.try_send(Outbound::plain(encode_query(Query::Pid)));
        }

        session
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events_tx.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// One local increment/decrement tick. Claims the setpoint from remote
    /// updates, clamps and returns the value for optimistic display. Never
    /// writes to the device by itself.
    pub async fn adjust_setpoint(&self, direction: Direction) -> i32 {
        let desired = {
            let mut shared = self.shared.write().await;
            shared.press_seq += 1;
            shared.setpoint.apply_tick(direction)
        };
        let _ = self.events_tx.send(SessionEvent::Setpoint { desired });
        desired
    }

    /// Sends the final setpoint of a gesture: exactly one `t=` frame no
    /// matter how long the press lasted. The suppress flag is released once
    /// the frame is on the wire.
    pub async fn commit_setpoint(&self) -> Result<(), SessionError> {
        let (desired, press_seq) = {
            let shared = self.shared.read().await;
            (shared.setpoint.desired, shared.press_seq)
        };
        self.send(Outbound {
            frame: encode_set_temperature(self.variant, desired),
            on_sent: OnSent::CommitSetpoint { press_seq },
        })
        .await
    }

    /// Validates and sends new PID coefficients. Out-of-range values are
    /// rejected before anything is encoded; the staged coefficients become
    /// authoritative only after the frame has been written.
    pub async fn submit_pid(&self, p: f32, i: f32, d: f32) -> Result<(), SessionError> {
        for (name, value) in [("p", p), ("i", i), ("d", d)] {
            if !pid_in_range(value) {
                return Err(SessionError::PidOutOfRange { name, value });
            }
        }
        // staged before the frame is queued so a report cannot slip in
        // between enqueue and flag; rolled back if nothing was queued
        self.shared.write().await.pid_edit_pending = true;
        let sent = self
            .send(Outbound {
                frame: encode_set_pid(p, i, d),
                on_sent: OnSent::ApplyPid(PidState { p, i, d }),
            })
            .await;
        if sent.is_err() {
            self.shared.write().await.pid_edit_pending = false;
        }
        sent
    }

    /// Asks legacy firmware for its current target or PID coefficients.
    /// Self-contained firmware reports unprompted and takes no queries.
    pub async fn query(&self, query: Query) -> Result<(), SessionError> {
        if self.variant == WireVariant::SelfContained {
            return Err(SessionError::QueryUnsupported);
        }
        self.send(Outbound::plain(encode_query(query))).await
    }

    /// Consistent snapshot of the twin chart series, oldest first.
    pub async fn history_series(&self) -> (Vec<f32>, Vec<f32>) {
        self.shared.read().await.history.to_series()
    }

    pub async fn setpoint(&self) -> SetpointState {
        self.shared.read().await.setpoint
    }

    pub async fn pid(&self) -> PidState {
        self.shared.read().await.pid
    }

    pub async fn telemetry(&self) -> Option<TelemetryReadout> {
        self.shared.read().await.last_status
    }

    /// Cancels both loops; a pending settle delay is not waited out.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    async fn send(&self, out: Outbound) -> Result<(), SessionError> {
        if !self.is_connected() {
            return Err(SessionError::Disconnected);
        }
        self.commands_tx
            .send(out)
            .await
            .map_err(|_| SessionError::Disconnected)
    }
}

async fn read_loop<R>(
    reader: R,
    shared: Arc<RwLock<Shared>>,
    events_tx: broadcast::Sender<SessionEvent>,
    connected: Arc<AtomicBool>,
    mut shutdown_rx: watch::Receiver<bool>,
    variant: WireVariant,
) where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                debug!("read loop cancelled");
                return;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => match parse_line(variant, &line) {
                    Some(event) => apply_event(&shared, &events_tx, event).await,
                    // expected under serial noise, drop and keep reading
                    None => debug!(%line, "dropping unparseable telegram"),
                },
                Ok(None) => {
                    info!("device closed the link");
                    break;
                }
                Err(error) => {
                    warn!(%error, "link read failed");
                    break;
                }
            }
        }
    }
    mark_disconnected(&connected, &events_tx);
}

async fn apply_event(
    shared: &Arc<RwLock<Shared>>,
    events_tx: &broadcast::Sender<SessionEvent>,
    event: TelemetryEvent,
) {
    match event {
        TelemetryEvent::Status { target, temperature, heating, battery_voltage, battery_percent } => {
            let readout = TelemetryReadout {
                temperature,
                heating_percent: heating_percent(heating),
                battery_voltage,
                battery_percent,
            };
            let mut applied_target = None;
            {
                let mut shared = shared.write().await;
                shared.history.push(HistorySample { temperature, heating });
                shared.last_status = Some(readout);
                if let Some(target) = target {
                    if shared.setpoint.apply_remote(target) {
                        applied_target = Some(target);
                    }
                }
            }
            let _ = events_tx.send(SessionEvent::Telemetry {
                temperature: readout.temperature,
                heating_percent: readout.heating_percent,
                battery_voltage: readout.battery_voltage,
                battery_percent: readout.battery_percent,
            });
            if let Some(desired) = applied_target {
                let _ = events_tx.send(SessionEvent::Setpoint { desired });
            }
        }
        TelemetryEvent::PidReport { p, i, d } => {
            let applied = {
                let mut shared = shared.write().await;
                if shared.pid_edit_pending {
                    false
                } else {
                    shared.pid = PidState { p, i, d };
                    true
                }
            };
            if applied {
                let _ = events_tx.send(SessionEvent::Pid { p, i, d });
            } else {
                debug!("PID report ignored, local edit pending");
            }
        }
        TelemetryEvent::TargetReport { target } => {
            let applied = shared.write().await.setpoint.apply_remote(target);
            if applied {
                let _ = events_tx.send(SessionEvent::Setpoint { desired: target });
            } else {
                debug!(target, "target report ignored, local press in progress");
            }
        }
    }
}

async fn write_loop<W>(
    mut writer: W,
    mut commands_rx: mpsc::Receiver<Outbound>,
    shared: Arc<RwLock<Shared>>,
    events_tx: broadcast::Sender<SessionEvent>,
    connected: Arc<AtomicBool>,
    mut shutdown_rx: watch::Receiver<bool>,
    settle_delay: Duration,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        let out = tokio::select! {
            _ = shutdown_rx.changed() => {
                debug!("write path cancelled");
                return;
            }
            command = commands_rx.recv() => match command {
                Some(out) => out,
                None => return,
            },
        };

        if let Err(error) = write_frame(&mut writer, &out.frame).await {
            warn!(%error, "link write failed");
            break;
        }

        match out.on_sent {
            OnSent::Nothing => {}
            OnSent::CommitSetpoint { press_seq } => {
                let mut shared = shared.write().await;
                if shared.press_seq == press_seq {
                    let desired = shared.setpoint.commit();
                    debug!(desired, "setpoint committed");
                } else {
                    // a newer press re-claimed the setpoint while this frame
                    // waited out the settle delay; it keeps ownership
                    debug!("commit superseded by a newer press");
                }
            }
            OnSent::ApplyPid(pid) => {
                let mut shared = shared.write().await;
                shared.pid = pid;
                shared.pid_edit_pending = false;
            }
        }

        // The device cannot take another frame before its serial turnaround
        // elapses; shutdown does not wait this out.
        tokio::select! {
            _ = sleep(settle_delay) => {}
            _ = shutdown_rx.changed() => return,
        }
    }
    mark_disconnected(&connected, &events_tx);
}

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &[u8]) -> io::Result<()> {
    writer.write_all(frame).await?;
    writer.flush().await
}

// Transport faults from either loop surface as one Disconnected event, never
// more.
fn mark_disconnected(connected: &AtomicBool, events_tx: &broadcast::Sender<SessionEvent>) {
    if connected.swap(false, Ordering::SeqCst) {
        let _ = events_tx.send(SessionEvent::Disconnected);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
    use tokio::time::{timeout, Duration, Instant};

    fn quiet_config() -> SessionConfig {
        SessionConfig {
            query_on_start: false,
            ..SessionConfig::default()
        }
    }

    async fn recv(events: &mut broadcast::Receiver<SessionEvent>) -> SessionEvent {
        timeout(Duration::from_secs(1), events.recv())
            .await
            .expect("no event within deadline")
            .expect("event channel closed")
    }

    fn connect(config: SessionConfig) -> (DeviceSession, DuplexStream) {
        let (near, far) = tokio::io::duplex(1024);
        (DeviceSession::spawn(near, config), far)
    }

    #[tokio::test]
    async fn status_line_updates_history_and_readout() {
        let (session, mut device) = connect(quiet_config());
        let mut events = session.events();

        device.write_all(b"s;150.0;128;3.7;62\n").await.unwrap();

        assert_eq!(
            recv(&mut events).await,
            SessionEvent::Telemetry {
                temperature: 150.0,
                heating_percent: 50,
                battery_voltage: 3.7,
                battery_percent: 62,
            }
        );
        let (temps, heats) = session.history_series().await;
        assert_eq!(temps, vec![150.0]);
        assert_eq!(heats, vec![128.0]);
        let readout = session.telemetry().await.unwrap();
        assert_eq!(readout.battery_voltage, 3.7);
        assert_eq!(readout.battery_percent, 62);
    }

    #[tokio::test]
    async fn local_press_suppresses_remote_target() {
        let (session, mut device) = connect(quiet_config());
        let mut events = session.events();

        let desired = session.adjust_setpoint(Direction::Increase).await;
        assert_eq!(desired, 81);
        assert_eq!(recv(&mut events).await, SessionEvent::Setpoint { desired: 81 });

        // the device's own target report loses while the press is active
        device.write_all(b"t;200\ns;150.0;128;3.7;62\n").await.unwrap();
        assert!(matches!(recv(&mut events).await, SessionEvent::Telemetry { .. }));
        assert_eq!(session.setpoint().await.desired, 81);
        assert!(session.setpoint().await.suppress_remote_update);
    }

    #[tokio::test]
    async fn remote_target_applies_when_idle() {
        let (session, mut device) = connect(quiet_config());
        let mut events = session.events();

        device.write_all(b"t;185\n").await.unwrap();
        assert_eq!(recv(&mut events).await, SessionEvent::Setpoint { desired: 185 });
        assert_eq!(session.setpoint().await.desired, 185);
    }

    #[tokio::test]
    async fn commit_sends_exactly_one_legacy_frame() {
        let (session, mut device) = connect(quiet_config());

        for _ in 0..3 {
            session.adjust_setpoint(Direction::Increase).await;
        }
        session.commit_setpoint().await.unwrap();

        let mut frame = [0u8; 3];
        device.read_exact(&mut frame).await.unwrap();
        assert_eq!(frame, [b't', b'=', 83]);

        // suppress flag released once the frame is on the wire
        timeout(Duration::from_secs(1), async {
            while session.setpoint().await.suppress_remote_update {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("suppress flag never cleared");
    }

    #[tokio::test]
    async fn self_contained_commit_is_ascii() {
        let config = SessionConfig {
            variant: WireVariant::SelfContained,
            ..quiet_config()
        };
        let (session, mut device) = connect(config);

        session.adjust_setpoint(Direction::Increase).await;
        session.commit_setpoint().await.unwrap();

        let mut frame = [0u8; 5];
        device.read_exact(&mut frame).await.unwrap();
        assert_eq!(&frame, b"t=81\n");
    }

    #[tokio::test]
    async fn out_of_range_pid_is_rejected_with_no_frame() {
        let (session, mut device) = connect(quiet_config());

        let error = session.submit_pid(26.0, 1.0, 1.0).await.unwrap_err();
        assert!(matches!(
            error,
            SessionError::PidOutOfRange { name: "p", value } if value == 26.0
        ));
        let error = session.submit_pid(1.0, 1.0, -0.1).await.unwrap_err();
        assert!(matches!(error, SessionError::PidOutOfRange { name: "d", .. }));

        // the next valid frame is the first thing on the wire
        session.submit_pid(12.3, 0.0, 25.5).await.unwrap();
        let mut frame = [0u8; 5];
        device.read_exact(&mut frame).await.unwrap();
        assert_eq!(frame, [b'p', b'=', 123, 0, 255]);
    }

    #[tokio::test]
    async fn pid_report_updates_state_when_no_edit_pending() {
        let (session, mut device) = connect(quiet_config());
        let mut events = session.events();

        device.write_all(b"p;50;10;2\n").await.unwrap();
        assert_eq!(recv(&mut events).await, SessionEvent::Pid { p: 5.0, i: 1.0, d: 0.2 });
        assert_eq!(session.pid().await, PidState { p: 5.0, i: 1.0, d: 0.2 });
    }

    #[tokio::test]
    async fn garbage_lines_are_dropped_and_the_loop_continues() {
        let (session, mut device) = connect(quiet_config());
        let mut events = session.events();

        device
            .write_all(b"x;what\ns;abc;1;2;3\ns;150.0;128;3.7;62\n")
            .await
            .unwrap();

        // only the valid status line surfaces
        assert!(matches!(recv(&mut events).await, SessionEvent::Telemetry { .. }));
        assert_eq!(session.history_series().await.0.len(), 1);
        assert!(session.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn writes_are_spaced_by_the_settle_delay() {
        let (session, mut device) = connect(quiet_config());

        session.query(Query::Target).await.unwrap();
        session.query(Query::Pid).await.unwrap();

        let mut frame = [0u8; 2];
        device.read_exact(&mut frame).await.unwrap();
        assert_eq!(&frame, b"t?");

        let before = Instant::now();
        device.read_exact(&mut frame).await.unwrap();
        assert_eq!(&frame, b"p?");
        assert!(before.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn eof_surfaces_one_disconnect() {
        let (session, device) = connect(quiet_config());
        let mut events = session.events();

        drop(device);

        assert_eq!(recv(&mut events).await, SessionEvent::Disconnected);
        assert!(!session.is_connected());
        assert!(matches!(
            session.commit_setpoint().await,
            Err(SessionError::Disconnected)
        ));
        // no second notification
        assert!(timeout(Duration::from_millis(100), events.recv()).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn legacy_session_queries_on_start() {
        let (near, mut device) = tokio::io::duplex(1024);
        let _session = DeviceSession::spawn(near, SessionConfig::default());

        let mut frames = [0u8; 4];
        device.read_exact(&mut frames).await.unwrap();
        assert_eq!(&frames, b"t?p?");
    }

    #[tokio::test(start_paused = true)]
    async fn stale_commit_keeps_a_new_press_suppressed() {
        let (session, mut device) = connect(quiet_config());
        let mut events = session.events();

        // occupy the writer so the commit frame queues behind a settle delay
        session.query(Query::Target).await.unwrap();
        session.adjust_setpoint(Direction::Increase).await; // 81
        session.commit_setpoint().await.unwrap();
        // next gesture starts before the commit frame reaches the wire
        session.adjust_setpoint(Direction::Increase).await; // 82

        let mut frames = [0u8; 5];
        device.read_exact(&mut frames).await.unwrap();
        assert_eq!(&frames, &[b't', b'?', b't', b'=', 81]);
        // let the writer finish its post-send bookkeeping
        sleep(Duration::from_millis(400)).await;

        let setpoint = session.setpoint().await;
        assert!(setpoint.suppress_remote_update, "stale commit released the new press");
        assert_eq!(setpoint.desired, 82);

        // the device's target report still loses against the active press
        device.write_all(b"t;200\ns;150.0;128;3.7;62\n").await.unwrap();
        assert!(matches!(recv(&mut events).await, SessionEvent::Setpoint { .. })); // tick echoes
        loop {
            if matches!(recv(&mut events).await, SessionEvent::Telemetry { .. }) {
                break;
            }
        }
        assert_eq!(session.setpoint().await.desired, 82);
    }

    #[tokio::test(start_paused = true)]
    async fn queued_pid_edit_blocks_reports_until_written() {
        let (session, mut device) = connect(quiet_config());
        let mut events = session.events();

        // the edit queues behind the query's settle delay; the pending flag
        // is already up by the time submit_pid returns
        session.query(Query::Pid).await.unwrap();
        session.submit_pid(5.0, 1.0, 0.2).await.unwrap();

        device.write_all(b"p;99;99;99\ns;150.0;128;3.7;62\n").await.unwrap();
        assert!(matches!(recv(&mut events).await, SessionEvent::Telemetry { .. }));
        // the report arrived while the edit was queued and was dropped
        assert_eq!(session.pid().await, PidState::default());

        let mut frames = [0u8; 7];
        device.read_exact(&mut frames).await.unwrap();
        assert_eq!(&frames, &[b'p', b'?', b'p', b'=', 50, 10, 2]);
        sleep(Duration::from_millis(400)).await;

        // the written edit is authoritative and reports flow again
        assert_eq!(session.pid().await, PidState { p: 5.0, i: 1.0, d: 0.2 });
        device.write_all(b"p;20;20;20\n").await.unwrap();
        assert_eq!(recv(&mut events).await, SessionEvent::Pid { p: 2.0, i: 2.0, d: 2.0 });
    }

    #[tokio::test]
    async fn self_contained_session_rejects_queries() {
        let config = SessionConfig {
            variant: WireVariant::SelfContained,
            ..quiet_config()
        };
        let (session, mut device) = connect(config);

        assert!(matches!(
            session.query(Query::Target).await,
            Err(SessionError::QueryUnsupported)
        ));
        assert!(matches!(
            session.query(Query::Pid).await,
            Err(SessionError::QueryUnsupported)
        ));

        // nothing hit the wire; the next commit is the first frame
        session.adjust_setpoint(Direction::Increase).await;
        session.commit_setpoint().await.unwrap();
        let mut frame = [0u8; 5];
        device.read_exact(&mut frame).await.unwrap();
        assert_eq!(&frame, b"t=81\n");
    }

    #[tokio::test]
    async fn shutdown_unblocks_both_loops() {
        let (session, mut device) = connect(quiet_config());
        session.shutdown();

        // once the loops are gone the far end sees EOF
        let mut buf = [0u8; 1];
        let read = timeout(Duration::from_secs(1), device.read(&mut buf))
            .await
            .expect("far end still open after shutdown")
            .unwrap();
        assert_eq!(read, 0);
    }
}
