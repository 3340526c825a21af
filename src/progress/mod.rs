mod run_reporter;

pub use run_reporter::RunReporter;
