//! Abstract target objects for an in-circuit debugger. A transport scanner
//! fills a [`registry::TargetRegistry`] with targets, each one driven through
//! the backend-supplied [`ops::TargetOps`] capability surface.

pub mod breakwatch;
pub mod controller;
pub mod flash;
pub mod ops;
pub mod registry;
pub mod target;
