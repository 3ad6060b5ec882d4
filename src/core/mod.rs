//! Core domain models for relay chains
//!
//! This module defines nodes and their chain topology, request and response
//! documents, per-node state, results and configuration.

pub mod config;
pub mod node;
pub mod request;
pub mod result;
pub mod state;
pub mod topology;

pub use config::*;
pub use node::*;
pub use request::*;
pub use result::*;
pub use state::*;
pub use topology::{resolve, Hop};
