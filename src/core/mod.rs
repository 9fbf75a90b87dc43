pub mod config;
pub mod session;
pub mod shared;
pub mod urls;
