//! Core module containing the GCS protocol machinery
//!
//! This module provides:
//! - Transport layer (Serial, TCP, USB, native GCS library, scripted)
//! - End-of-line detection
//! - Message layer with error checking and bulk data reader
//! - Answer parsing helpers
//! - Command building and a typed command façade
//! - GCS and camera error tables
//! - Communication log

pub mod camera;
pub mod command;
pub mod commands;
pub mod eol;
pub mod error;
pub mod logger;
pub mod messages;
pub mod parse;
pub mod transport;
