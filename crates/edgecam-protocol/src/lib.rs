//! Wire types shared by the Edgecam server, its embedded page and tests.

pub mod messages;
pub mod types;

pub use messages::*;
pub use types::*;
