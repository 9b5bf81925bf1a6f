//! Request context helpers.

pub mod user_agent;
