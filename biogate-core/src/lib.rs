//! # Biogate Core
//!
//! Pure domain types and business logic for fingerprint enrollment sessions.
//!
//! ## Design Principles
//!
//! This crate is intentionally **IO-free**:
//! - No sockets or device handles
//! - No async runtime
//! - No logging
//! - No clocks other than the timestamps recorded on transitions
//!
//! All types are plain Rust structs/enums with serde serialization. The actual
//! IO (device arbitration, capture calls, the WebSocket transport) lives in
//! `biogate-daemon`.
//!
//! ## Stability
//!
//! The public API includes the serde serialization format of
//! [`protocol::ClientCommand`] and [`protocol::ServerMessage`]. Browser
//! clients depend on those field names, so changing them is a breaking change.
//!
//! ## Modules
//!
//! - [`session`] - Enrollment session data model and state machine
//! - [`quality`] - Quality bands and the acceptance/retry policy
//! - [`template`] - Captured template value type
//! - [`protocol`] - Inbound commands and outbound messages

pub mod protocol;
pub mod quality;
pub mod session;
pub mod template;

// Re-export commonly used types at crate root for convenience.

pub use protocol::{ClientCommand, ServerMessage};
pub use quality::{QualityLevel, QualityPolicy};
pub use session::{
    CaptureMiss, EnrollmentSession, FailureReason, InvalidTransition, SessionId, SessionResult,
    SessionState, SessionStatus, SubjectKey, Verdict,
};
pub use template::CapturedTemplate;
