pub mod config;
pub mod gesture;
pub mod session;

pub use config::SessionConfig;
pub use gesture::{spawn_repeat_press, Gesture};
pub use session::{DeviceSession, SessionError, SessionEvent};
