pub mod app;
pub mod config;
pub mod error;
pub mod event;
pub mod logger;
pub mod model;
pub mod persist;
pub mod repl;
pub mod service;
pub mod store;
pub mod time;

pub trait Located {
    fn location(&self) -> snafu::Location;
}
