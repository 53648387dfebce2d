//! Host-side controller for the MCHI shared-memory debug channel.
//!
//! A running target (usually a game inside an emulator) exposes a block of
//! memory holding two byte rings. mchi speaks the tag protocol carried on
//! those rings and mirrors the target's tree of debug objects.
//!
//! # Crate Structure
//!
//! - [`transport`] - shared regions, ring channels and chunk framing
//! - [`frame`] - binary cursors, Shift-JIS strings, tags and tag routing
//! - [`jor`] - the object tree protocol and the session poll loop

/// Re-export transport types.
pub mod transport {
    pub use mchi_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use mchi_frame::*;
}

/// Re-export object tree types.
pub mod jor {
    pub use mchi_jor::*;
}
