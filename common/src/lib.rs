pub mod file_format;
pub mod file_utils;
pub mod log_setup;
pub mod serde;
