pub mod conflict;
pub mod models;
pub mod overlap;
pub mod schedule;
pub mod slot_resolver;
