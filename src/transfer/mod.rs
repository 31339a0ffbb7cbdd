//! Transfer orchestration: preamble, pipeline composition, sessions.

pub mod pipeline;
pub mod preamble;
pub mod progress;
pub mod session;

pub use preamble::TransferMetadata;
pub use progress::Progress;
pub use session::{ReceiveSession, SendSession};
