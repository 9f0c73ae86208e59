//! Live estimate of Claude plan usage against the rolling 5-hour quota,
//! derived from Claude Code's local session logs.

pub mod models;
pub mod services;
pub mod ui;
