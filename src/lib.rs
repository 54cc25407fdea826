pub mod build_info;
pub mod commands;
pub mod config;
pub mod error;
pub mod exec;
pub mod logging;
pub mod model;
pub mod output;
pub mod plan;
pub mod store;
pub mod task_id;
