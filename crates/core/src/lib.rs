pub mod error;
pub mod media;
pub mod media_session;
pub mod protocol;
pub mod random;
pub mod server;
pub mod session;
pub mod transport;

pub use error::{Result, RtspError};
pub use media::h264::H264FileSubsession;
pub use media::{FrameSource, MediaSubsession, RtpSink};
pub use media_session::{MediaSession, MediaSessionRegistry};
pub use random::{RandomSource, SeededRandom, ThreadRandom};
pub use server::{Server, ServerConfig};
