pub mod migration;
pub mod profile;
pub mod replication;
pub mod settings;
