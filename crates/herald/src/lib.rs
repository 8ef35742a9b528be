//! Herald - outbound message-delivery gateway in front of a single messaging session.

// ============================================================================
// Core Infrastructure
// ============================================================================

pub mod build_info;
pub mod config;

// ============================================================================
// Server & HTTP
// ============================================================================

pub mod api;
pub mod handlers;
pub mod server;

// ============================================================================
// Domain
// ============================================================================

pub mod delivery;
pub mod notify;
pub mod session;

// ============================================================================
// Client & Utilities
// ============================================================================

pub mod background;
pub mod client;
