pub mod chains;
pub mod classify;
pub mod error;
pub mod events;
pub mod generate;
pub mod policy;
