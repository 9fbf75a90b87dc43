pub mod auth;
pub mod core;
pub mod email;
pub mod insurers;
pub mod main_module;
pub mod security;
pub mod tickets;
