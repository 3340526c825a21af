pub mod cli;
pub mod database;
pub mod fixtures;
