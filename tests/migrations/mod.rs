pub mod hooks;
pub mod scenarios;
pub mod verification;
