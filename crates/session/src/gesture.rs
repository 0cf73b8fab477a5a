// Bridges raw touch input from the shell to the repeat-press state machine.
// The shell only reports press and release; this task owns the repeat timer
// and turns the gesture into setpoint ticks plus one commit.

use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

use vapelink_core::{Direction, RepeatPress};

use crate::session::DeviceSession;

/// Raw gesture as the shell sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gesture {
    Press(Direction),
    Release,
}

/// Spawns the driver task; the shell feeds gestures into the returned
/// channel. Dropping the sender ends the task.
pub fn spawn_repeat_press(session: DeviceSession) -> mpsc::Sender<Gesture> {
    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(run_repeat_press(rx, session));
    tx
}

async fn run_repeat_press(mut gestures: mpsc::Receiver<Gesture>, session: DeviceSession) {
    let mut press = RepeatPress::new();
    let mut deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            gesture = gestures.recv() => match gesture {
                Some(Gesture::Press(direction)) => {
                    // duplicate presses return None and leave the timer alone
                    if let Some((direction, delay)) = press.press(direction) {
                        session.adjust_setpoint(direction).await;
                        deadline = Some(Instant::now() + delay);
                    }
                }
                Some(Gesture::Release) => {
                    deadline = None;
                    if press.release() {
                        if let Err(error) = session.commit_setpoint().await {
                            warn!(%error, "could not commit setpoint");
                        }
                    }
                }
                None => {
                    debug!("gesture channel closed, stopping repeat press driver");
                    break;
                }
            },
            _ = async { sleep_until(deadline.unwrap()).await }, if deadline.is_some() => {
                match press.timer_fired() {
                    Some((direction, delay)) => {
                        session.adjust_setpoint(direction).await;
                        deadline = Some(Instant::now() + delay);
                    }
                    None => deadline = None,
                }
            }
        }
    }
}
