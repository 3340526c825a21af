// Integration tests for pgshift

pub mod cli;
pub mod helpers;
pub mod migrations;
pub mod postgres;
