//! Shared value types used across features

pub mod models;
