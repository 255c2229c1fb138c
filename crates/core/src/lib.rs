//! Adaptive curriculum engine: BKT mastery tracking, readiness gates,
//! session-mode selection and problem-length scaling.
//!
//! Everything here is synchronous and does no I/O beyond reading a config
//! file. Plan composition lives in `services`, persistence in `storage`.

pub mod bkt;
pub mod config;
pub mod error;
pub mod history;
pub mod mode;
pub mod model;
pub mod progress;
pub mod readiness;
pub mod synth;
pub mod term_count;
pub mod time;

pub use error::Error;
pub use time::Clock;
