//! Timeline codec and export.
//!
//! Endpoints collect filesystem timelines and ship them back as compressed,
//! length-framed chunks. This crate stores those chunks, decodes them back
//! into entries, and exports single jobs or whole fleets for offline
//! analysis.

pub mod blob;
pub mod config;
pub mod export;
pub mod job;
pub mod registry;
pub mod timeline;
