//! Managed windows and their rendering state.

pub mod context;
pub mod kind;
pub mod manager;
pub mod route;

/// Raw window handle value.
pub type WindowId = usize;
