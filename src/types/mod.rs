//! Core types for threadrelay.

pub mod message;
pub mod ui;

pub use message::*;
pub use ui::*;
