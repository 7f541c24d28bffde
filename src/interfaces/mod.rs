//! Adapters that turn external input into engine calls.

pub mod csv;
pub mod script;
pub mod webhook;
