//! Slidesync Library
//!
//! Keeps a remote-controlled slideshow display and its presenter controllers
//! in sync over a hosted realtime relay. The binary is headless; everything
//! it does is available here.

pub mod headless;

// Re-export main entry points
pub use headless::runner::{run_control, run_display, RunOptions};

pub use slidesync_app as app;
pub use slidesync_core as core;
pub use slidesync_relay as relay;
