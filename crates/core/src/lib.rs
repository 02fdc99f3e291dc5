#![forbid(unsafe_code)]

pub mod calculator;
pub mod error;
pub mod model;
pub mod stats;
pub mod time;

pub use error::ProgressError;
pub use time::Clock;
