pub mod dialect;
pub mod mysql_db;
pub mod session;
