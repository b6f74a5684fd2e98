pub mod artifact;
pub mod common;
pub mod crypto;
pub mod exec;
pub mod profile_store;
