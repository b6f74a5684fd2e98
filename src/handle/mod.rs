pub mod capture;
pub mod databases;
pub mod guard;
pub mod help;
pub mod migrate;
pub mod report;
pub mod resolve;
pub mod select;
pub mod service;
