//! Low-level helpers shared by the AMR dispatch crates: JSON snapshot files
//! for reports and cost models, and unix-millisecond run stamps.

pub mod json_file;
pub mod time_utils;

pub use json_file::{read_json_if_exists, write_json_atomic};
pub use time_utils::{current_unix_timestamp_ms, elapsed_ms_since};
