//! Task list building against live databases that drifted from the changeset.

use anyhow::Result;
use pgshift::audit::MemoryAudit;
use pgshift::changeset::{Changeset, FieldChanges, IndexChanges, TableChange, Timing};
use pgshift::definition::compare::compare;
use pgshift::definition::{Definition, FieldDef};
use pgshift::error::MigrationError;
use pgshift::hooks::NoHooks;
use pgshift::orchestrator::{Orchestrator, RunOptions, RunState};
use pgshift::task;
use rstest::rstest;

use crate::helpers::fixtures::{seeded, table1, table2};

fn live() -> Definition {
    Definition::new(vec![table1(32, ""), table2()])
}

#[tokio::test]
async fn building_twice_yields_the_same_task_list() -> Result<()> {
    let target = Definition::new(vec![table1(64, "foo")]);
    let changeset = compare(&target, &live());
    let mut driver = seeded(&live())?;

    for timing in [Timing::Constructive, Timing::Destructive] {
        let (first, _) = task::build(changeset.partition(timing), &mut driver).await?;
        let (second, _) = task::build(changeset.partition(timing), &mut driver).await?;
        assert_eq!(first, second);
        assert!(first.is_resolved());
    }
    assert!(driver.journal().is_empty());
    Ok(())
}

#[tokio::test]
async fn applied_changesets_verify_to_nothing() -> Result<()> {
    let target = Definition::new(vec![table1(64, "foo")]);
    let changeset = compare(&target, &live());
    let mut driver = seeded(&live())?;
    let mut audit = MemoryAudit::new();

    for timing in [Timing::Constructive, Timing::Destructive] {
        let report = Orchestrator::new(&mut driver, &mut NoHooks, &mut audit, RunOptions::new(timing))
            .run(&changeset)
            .await?;
        assert!(report.committed());
    }
    assert!(driver.rows("table2").is_none());

    for timing in [Timing::Constructive, Timing::Destructive] {
        let (tasks, _) = task::build(changeset.partition(timing), &mut driver).await?;
        assert!(tasks.is_empty(), "{:?}", tasks.summary());
        assert!(tasks.is_resolved());
    }
    Ok(())
}

#[rstest]
#[case::table_removed(|c: &mut Changeset| c.destructive.tables.remove.push("ghost".to_string()))]
#[case::field_removed(|c: &mut Changeset| {
    c.destructive.tables.change.insert("table2".to_string(), TableChange {
        fields: FieldChanges { remove: vec!["gone".to_string()], ..Default::default() },
        ..Default::default()
    });
})]
#[case::index_removed(|c: &mut Changeset| {
    c.destructive.tables.change.insert("table1".to_string(), TableChange {
        indexes: IndexChanges { remove: vec!["table1_gone_idx".to_string()], ..Default::default() },
        ..Default::default()
    });
})]
#[tokio::test]
async fn removing_what_is_already_gone_is_a_no_op(#[case] edit: fn(&mut Changeset)) -> Result<()> {
    let mut changeset = Changeset::default();
    edit(&mut changeset);
    let mut driver = seeded(&live())?;

    let (tasks, _) = task::build(changeset.partition(Timing::Destructive), &mut driver).await?;

    assert!(tasks.is_resolved());
    assert!(tasks.is_empty());
    Ok(())
}

#[tokio::test]
async fn contradicting_entries_abort_before_execution() -> Result<()> {
    let mut changeset = Changeset::default();
    // table1 already exists
    changeset.constructive.tables.add.push(table1(32, ""));
    changeset.constructive.tables.change.insert(
        "table2".to_string(),
        TableChange {
            fields: FieldChanges {
                add: vec![FieldDef::new("c", "text")],
                ..Default::default()
            },
            ..Default::default()
        },
    );
    changeset.constructive.tables.change.insert(
        "nowhere".to_string(),
        TableChange {
            fields: FieldChanges {
                add: vec![FieldDef::new("x", "text")],
                ..Default::default()
            },
            ..Default::default()
        },
    );

    let mut driver = seeded(&live())?;
    let mut audit = MemoryAudit::new();

    let report = Orchestrator::new(
        &mut driver,
        &mut NoHooks,
        &mut audit,
        RunOptions::new(Timing::Constructive),
    )
    .run(&changeset)
    .await?;

    assert_eq!(
        report.states,
        vec![RunState::Init, RunState::Verifying, RunState::RolledBack]
    );
    match &report.failure {
        Some(MigrationError::Unverifiable(unresolved)) => {
            let objects: Vec<_> = unresolved.iter().map(|u| u.object.as_str()).collect();
            assert_eq!(objects, vec!["table1", "nowhere"]);
        }
        other => panic!("expected unresolved entries, got {:?}", other),
    }
    assert!(driver.journal().is_empty());
    assert!(report.backups.is_empty());
    Ok(())
}
