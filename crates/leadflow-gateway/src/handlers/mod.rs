//! Request handlers, one module per surface.

pub mod health;
pub mod messages;
pub mod stats;
pub mod webhooks;
