pub mod events;
pub mod health;
pub mod policy;
pub mod queue;
pub mod resolution;
