//! Adapter service vocabulary.
//!
//! This module contains the lifecycle states of the out-of-process adapter
//! service and the messages exchanged with it.

pub mod protocol;
pub mod state;
