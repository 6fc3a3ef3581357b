//! Data models for Logbook.
//!
//! This module contains the level descriptor and the record structures
//! produced by every logging call.

pub mod level;
pub mod record;

pub use level::{Level, LevelRef, LevelUpdate};
pub use record::{
    Callsite, Message, Record, RecordException, RecordFile, RecordLevel, RecordProcess,
    RecordThread,
};
