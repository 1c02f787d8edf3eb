pub mod config;
pub mod filter;
pub mod forward;
pub mod pending;
pub mod route;
pub mod upstream;
pub mod wire;
