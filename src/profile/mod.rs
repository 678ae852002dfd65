pub mod profile_models;
pub mod roster_service;

pub use profile_models::{Presence, Profile};
pub use roster_service::{filter_roster, RosterService};
