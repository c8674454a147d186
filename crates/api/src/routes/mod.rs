//! HTTP route handlers

pub mod frames;
pub mod reports;
pub mod sessions;
pub mod system;
