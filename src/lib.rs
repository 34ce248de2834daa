#![allow(dead_code)]

//! Marasi: an interactive HTTP/HTTPS intercepting proxy with a sandboxed
//! scripting runtime for security testing.

pub mod bridge;
pub mod ca;
pub mod config;
pub mod error;
pub mod extensions;
pub mod intercept;
pub mod metrics;
pub mod persistence;
pub mod pipeline;
pub mod proxy;
pub mod scope;
pub mod scripting;
pub mod transaction;
pub mod waypoints;
