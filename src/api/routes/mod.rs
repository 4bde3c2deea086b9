//! API Routes
//!
//! Route handlers organized by functionality.

pub mod backend;
pub mod client;
pub mod health;
