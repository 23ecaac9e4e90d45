//! Adapter service lifecycle supervision.
//!
//! This module provides the state machine that brings the adapter service
//! up and down, together with the collaborators it drives: binding, bind
//! deadlines, observer notification, restriction policy and persistence.

pub mod binding;
pub mod manager;
pub mod notify;
pub mod persist;
pub mod restriction;
pub mod timeout;
