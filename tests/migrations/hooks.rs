//! Before/after hook contract during runs.

use anyhow::Result;
use pgshift::audit::MemoryAudit;
use pgshift::changeset::{Changeset, FieldChanges, TableChange, TableRename, Timing};
use pgshift::definition::{Definition, FieldDef, TableDef};
use pgshift::driver::Driver;
use pgshift::error::MigrationError;
use pgshift::hooks::{HookOperation, HookPhase};
use pgshift::orchestrator::{Orchestrator, RunOptions, RunState};

use crate::helpers::fixtures::{RecordingHooks, seeded, table1, table2};

fn changeset() -> Changeset {
    let mut changeset = Changeset::default();
    changeset.constructive.tables.rename.push(TableRename {
        name: "pairs".to_string(),
        was: "table2".to_string(),
    });
    changeset.constructive.tables.change.insert(
        "table1".to_string(),
        TableChange {
            fields: FieldChanges {
                add: vec![FieldDef::new("note", "text")],
                ..Default::default()
            },
            ..Default::default()
        },
    );
    changeset.constructive.tables.add.push(TableDef::new(
        "fresh",
        vec![FieldDef::new("id", "integer")],
        vec![],
    ));
    changeset
}

fn live() -> Definition {
    Definition::new(vec![table1(32, ""), table2()])
}

#[tokio::test]
async fn hooks_run_once_around_each_operation_in_order() -> Result<()> {
    let mut hooks = RecordingHooks::new();
    hooks.around(HookOperation::RenameTable, "pairs", None, None);
    hooks.around(HookOperation::AddField, "table1", Some("note"), None);
    hooks.around(HookOperation::AddTable, "fresh", None, None);
    // no operation matches this one
    hooks.around(HookOperation::RemoveTable, "table1", None, None);

    let mut driver = seeded(&live())?;
    let mut audit = MemoryAudit::new();

    let report = Orchestrator::new(
        &mut driver,
        &mut hooks.registry,
        &mut audit,
        RunOptions::new(Timing::Constructive),
    )
    .run(&changeset())
    .await?;

    assert!(report.committed());
    assert_eq!(
        hooks.calls(),
        vec![
            "beforeRenameTable__pairs",
            "afterRenameTable__pairs",
            "beforeAddField__table1__note",
            "afterAddField__table1__note",
            "beforeAddTable__fresh",
            "afterAddTable__fresh",
        ]
    );
    Ok(())
}

#[tokio::test]
async fn failing_before_hook_prevents_the_operation_and_its_after_hook() -> Result<()> {
    let mut hooks = RecordingHooks::new();
    hooks.around(
        HookOperation::AddField,
        "table1",
        Some("note"),
        Some(HookPhase::Before),
    );

    let mut driver = seeded(&live())?;
    let mut audit = MemoryAudit::new();

    let report = Orchestrator::new(
        &mut driver,
        &mut hooks.registry,
        &mut audit,
        RunOptions::new(Timing::Constructive),
    )
    .run(&changeset())
    .await?;

    assert_eq!(report.state, RunState::RolledBack);
    assert!(matches!(
        report.failure,
        Some(MigrationError::HookFailed { ref key }) if key.to_string() == "beforeAddField__table1__note"
    ));
    assert_eq!(hooks.calls(), vec!["beforeAddField__table1__note"]);

    // the earlier rename was undone, nothing later ran
    assert!(driver.table_exists("table2").await?);
    assert!(!driver.table_exists("pairs").await?);
    assert!(!driver.table_exists("fresh").await?);
    assert!(!driver.describe_table("table1").await?.unwrap().has_field("note"));
    Ok(())
}

#[tokio::test]
async fn failing_after_hook_rolls_back_its_completed_operation() -> Result<()> {
    let mut hooks = RecordingHooks::new();
    hooks.around(HookOperation::AddTable, "fresh", None, Some(HookPhase::After));

    let mut driver = seeded(&live())?;
    let mut audit = MemoryAudit::new();

    let report = Orchestrator::new(
        &mut driver,
        &mut hooks.registry,
        &mut audit,
        RunOptions::new(Timing::Constructive),
    )
    .run(&changeset())
    .await?;

    assert_eq!(report.state, RunState::RolledBack);
    assert!(report.completed.contains(&"add table fresh".to_string()));
    assert_eq!(
        hooks.calls(),
        vec!["beforeAddTable__fresh", "afterAddTable__fresh"]
    );
    assert!(!driver.table_exists("fresh").await?);
    assert!(!driver.describe_table("table1").await?.unwrap().has_field("note"));
    assert_eq!(driver.rows("table2").unwrap().len(), 2);
    Ok(())
}
