pub mod app;
pub mod audio;
pub mod batch;
pub mod cli;
pub mod config;
pub mod logging;
pub mod model;
pub mod output;
pub mod scanner;
pub mod storage;
pub mod store;
pub mod transcriber;
pub mod vocabulary;

pub use app::run;
