//! unbox - bulk archive extraction
//!
//! Discovers archives under one or more roots, reassembles multi-part sets
//! (even ones scattered across directories), and extracts each logical
//! archive with the right tool, optionally recursing into freshly extracted
//! output until no archives remain.

pub mod aggregate;
pub mod classify;
pub mod extract;
pub mod report;
pub mod tools;
