// ABOUTME: Binary-side pieces of roombot: wiring, console transport and logging setup.
// ABOUTME: The presence and dispatch logic lives in roombot-core.

pub mod app;
pub mod console;
pub mod logging;
