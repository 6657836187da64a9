//! Terminal User Interface
//!
//! Interactive view of attached devices and their trust status, with the
//! operator actions bound to single keys.

pub mod app;
pub mod events;
pub mod ui;

pub use app::run;
