pub mod config;
pub mod coordinator;
pub mod gateway;
pub mod notification;
pub mod pending;
pub mod sync;
