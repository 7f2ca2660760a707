pub mod config;
pub mod context;
pub mod ops_file;
pub mod run;
