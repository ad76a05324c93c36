//! Core SMTP types (replies, capabilities, session state).

mod capability;
mod reply;
mod state;

pub use capability::{parse_ehlo, AuthMechanism, AuthMode, Capability, CapabilitySet, EhloInfo};
pub use reply::{Reply, ReplyCode};
pub use state::SessionState;
