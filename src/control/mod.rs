//! Control layer exposing client state to external tooling.

/// High-level control API for the attached client.
pub mod api;
/// Ratatui-based developer console.
pub mod ui;
