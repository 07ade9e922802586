//! Command handlers.

pub mod bind9;
pub mod serve;
