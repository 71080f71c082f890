pub mod config;
pub mod result_broadcaster;
pub mod retention;
