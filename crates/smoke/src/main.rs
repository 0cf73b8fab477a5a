// Connects to a TCP-bridged RFCOMM socket (e.g. `rfcomm` + ser2net in front
// of /dev/rfcomm0) and prints the decoded session events as JSON lines.
// Useful for checking that a device actually speaks the configured wire
// variant before pointing the real shell at it.

use dotenvy::dotenv;
use tokio::net::TcpStream;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use vapelink_session::{DeviceSession, SessionConfig, SessionEvent};

#[tokio::main]
async fn main() {
    dotenv().ok();
    init_tracing();

    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:3333".to_string());
    let config = SessionConfig::from_env();
    info!(%addr, variant = ?config.variant, "connecting");

    let stream = TcpStream::connect(&addr).await.expect("connect failed");
    let session = DeviceSession::spawn(stream, config);
    let mut events = session.events();

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("interrupted, shutting down");
                session.shutdown();
                break;
            }
            event = events.recv() => match event {
                Ok(SessionEvent::Disconnected) => {
                    eprintln!("device disconnected");
                    std::process::exit(2);
                }
                Ok(event) => {
                    println!("{}", serde_json::to_string(&event).unwrap());
                }
                Err(e) => {
                    eprintln!("event stream error: {}", e);
                    std::process::exit(3);
                }
            }
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
