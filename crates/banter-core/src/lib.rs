pub mod config;
pub mod dispatch;
pub mod framer;
pub mod history;
pub mod protocol;
pub mod rate;
pub mod session;
pub mod transport;
pub mod util;

pub use config::{Config, ConfigStore};
pub use dispatch::{Dispatcher, MessageHandler, SystemHandler};
pub use framer::LineFramer;
pub use history::{InMemoryTranscripts, TranscriptStore};
pub use protocol::{parse_line, ChannelMessage, Command, ProtocolEvent};
pub use rate::{RateLimiter, RateWindow};
pub use session::{ConnectionParams, Session, SessionHandle, SessionState};
