use console::style;
use std::time::Duration;

use crate::changeset::Timing;
use crate::error::MigrationError;
use crate::orchestrator::RunReport;
use crate::task::TaskList;

/// Human progress output for a sequence of migration runs, one per timing class.
pub struct RunReporter {
    total_runs: usize,
    current_run: usize,
    verbose: bool,
}

impl RunReporter {
    pub fn new(total_runs: usize, verbose: bool) -> Self {
        Self {
            total_runs,
            current_run: 0,
            verbose,
        }
    }

    pub fn start_run(&mut self, timing: Timing, tasks: &TaskList) {
        self.current_run += 1;

        let prefix = if self.total_runs > 1 {
            format!("Run {}/{}: ", self.current_run, self.total_runs)
        } else {
            String::new()
        };
        println!(
            "{}{} ({} task{})",
            prefix,
            style(timing).bold(),
            tasks.len(),
            if tasks.len() == 1 { "" } else { "s" }
        );

        if self.verbose {
            self.task_list(tasks);
        }
    }

    pub fn skip_run(&mut self, timing: Timing) {
        self.current_run += 1;
        if self.total_runs > 1 {
            println!(
                "Run {}/{}: {} (nothing to do)",
                self.current_run, self.total_runs, timing
            );
        }
    }

    /// Print a task list in execution order, with unresolved entries last.
    pub fn task_list(&self, tasks: &TaskList) {
        for line in tasks.summary() {
            println!("  {}", line);
        }
        for unresolved in &tasks.unresolved {
            println!("  {} {}", style("✗").red(), style(unresolved).red());
        }
    }

    pub fn committed(&self, report: &RunReport, duration: Duration) {
        let backups = if report.backups.is_empty() {
            String::new()
        } else {
            format!(", {} backup(s) dropped", report.backups.len())
        };
        println!(
            "  {} {} operation(s) committed in {}{}",
            style("✓").green(),
            report.completed.len(),
            style(format_duration(duration)).green(),
            backups
        );
    }

    pub fn rolled_back(&self, report: &RunReport) {
        if let Some(failure) = &report.failure {
            println!("  {} {}", style("✗").red(), style(failure).red());
            if let MigrationError::Unverifiable(unresolved) = failure {
                for entry in unresolved {
                    println!("      {}", style(entry).dim());
                }
            }
        }

        if report.completed.is_empty() {
            println!("  {} Nothing was executed", style("↺").yellow());
        } else {
            println!(
                "  {} Rolled back after {} operation(s), restored: {}",
                style("↺").yellow(),
                report.completed.len(),
                if report.restored.is_empty() {
                    "none".to_string()
                } else {
                    report.restored.join(", ")
                }
            );
        }

        if self.verbose {
            for operation in &report.completed {
                println!("      {}", style(operation).dim());
            }
        }
    }

    pub fn rollback_failed(&self, error: &MigrationError) {
        println!("  {} {}", style("✗").red().bold(), style(error).red().bold());
        if let MigrationError::RollbackFailed { failures } = error {
            for failed in failures {
                println!("      {}: {}", style(&failed.table).bold(), failed.reason);
            }
        }
        println!(
            "  {} The database needs manual attention: backup tables were left in place",
            style("⚠").yellow()
        );
    }

    pub fn summary(&self, total_duration: Duration) {
        println!(
            "{} Completed in {}",
            style("✓").green(),
            style(format_duration(total_duration)).green()
        );
    }
}

fn format_duration(d: Duration) -> String {
    let total_secs = d.as_secs();
    let millis = d.subsec_millis();

    if total_secs == 0 {
        format!("{}ms", millis)
    } else if total_secs < 60 {
        if millis >= 100 {
            format!("{}.{}s", total_secs, millis / 100)
        } else {
            format!("{}s", total_secs)
        }
    } else {
        let mins = total_secs / 60;
        let secs = total_secs % 60;
        if secs > 0 {
            format!("{}m{}s", mins, secs)
        } else {
            format!("{}m", mins)
        }
    }
}
