pub mod audio_io;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod routing;
pub mod session;
pub mod waveform;

pub use config::PlayerConfig;
pub use session::PlayerSession;
