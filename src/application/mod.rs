pub mod bootstrap;
pub mod calendar_sync;
pub mod commands;
pub mod reconcile;
