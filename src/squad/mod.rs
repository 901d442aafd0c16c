//! Squads
//!
//! Persistent player groups with invites, a single leader and aggregate
//! stats.

pub mod manager;
pub mod state;

pub use manager::{default_squads_path, PersistError, SquadManager};
pub use state::{
    MemberStats, Squad, SquadError, SquadInvariant, SquadInvite, SquadMember, SquadStats, MAX_SQUAD_SIZE,
};
