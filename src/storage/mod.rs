pub mod migrations;
pub mod sqlite;
