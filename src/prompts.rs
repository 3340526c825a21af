use anyhow::Result;
use console::style;
use dialoguer::Confirm;

use crate::task::TaskList;

/// How a destructive run gets approved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Approval {
    /// `--yes`, or a dry run that changes nothing
    Granted,
    /// Ask on the terminal
    Prompt,
    /// Non-interactive without `--yes`: refuse to run
    Refused,
}

impl Approval {
    pub fn select(yes: bool, dry_run: bool, interactive: bool) -> Self {
        if yes || dry_run {
            Approval::Granted
        } else if interactive {
            Approval::Prompt
        } else {
            Approval::Refused
        }
    }
}

/// Show the destructive task list and ask whether to run it.
pub fn confirm_destructive(tasks: &TaskList) -> Result<bool> {
    println!(
        "\n⚠️  {}",
        style("This run removes or narrows existing schema objects").bold()
    );
    for line in tasks.summary() {
        println!("   {}", line);
    }

    let confirmed = Confirm::new()
        .with_prompt("Run the destructive changes? Backups are taken first")
        .default(false)
        .interact()?;

    Ok(confirmed)
}
