//! WebRTC sessions
//!
//! One session per browser viewer: a peer connection with a single outgoing
//! video track fed by the frame source through the session's filter.

mod manager;
mod registry;

pub use manager::SessionManager;
pub use registry::{on_ice_state, Session, SessionPeer, SessionRegistry};
