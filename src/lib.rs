pub mod attacker;
pub mod cinematic;
pub mod config;
pub mod constants;
pub mod error;
pub mod incapacitation_store;
pub mod lifecycle;
pub mod play_mode;
pub mod presentation;
pub mod revival;
pub mod server_protocol;
pub mod server_utils;
pub mod types;
pub mod world;
