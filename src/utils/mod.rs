//! Shared helpers: logging setup, timing, panic payload rendering

pub mod logger;
mod panic;
mod timer;

pub use panic::{panic_message, truncate, MAX_DETAIL_LEN};
pub use timer::Timer;
