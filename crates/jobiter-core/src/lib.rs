//! jobiter Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - An async runtime
//! - A queue backend
//! - Process lifecycle / signals
//!
//! All types here describe what an interruptible iteration job carries
//! between runs: the cursor, the codec that guards it, the run state and
//! the payload that a transport moves around.

pub mod codec;
pub mod cursor;
pub mod error;
pub mod ids;
pub mod payload;
pub mod status;

// Re-export commonly used types
pub use codec::{CursorCodec, JsonCodec};
pub use cursor::Cursor;
pub use error::{BoxError, CursorError, ErrorKind, IterationError};
pub use ids::JobId;
pub use payload::{JobPayload, RunState};
pub use status::RunPhase;
