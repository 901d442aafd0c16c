//! Server Directory
//!
//! The registry of live game servers plus its WebSocket front end and the
//! client-side announcer game servers use to stay listed.

pub mod announcer;
pub mod protocol;
pub mod registry;
pub mod server;

pub use announcer::Announcer;
pub use protocol::{ErrorCode, HubRequest, HubResponse};
pub use registry::{Hub, HubError, PlayerLookup, Region, ServerFilter, ServerRecord};
pub use server::{HubServer, HubServerError};
