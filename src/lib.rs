//! Ratekeeper - rule-matched fixed-window rate limiting
//!
//! This crate decides whether a batch of request descriptors must be
//! rate-limited. Each descriptor is matched to the most specific configured
//! rule for its account, client IP and request type, and the rule's counter
//! is tested and advanced in a shared key-value store whose key expiry
//! closes each window.

pub mod config;
pub mod error;
pub mod ratelimit;
pub mod store;
