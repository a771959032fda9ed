pub mod config;
pub mod error;
pub mod meter;
pub mod run;
