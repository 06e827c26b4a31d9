//! Process coordination primitives

pub mod shutdown;

pub use shutdown::{shutdown_signal, Shutdown, ShutdownListener};
