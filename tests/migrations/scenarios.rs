//! End-to-end runs of compared and edited changesets against an in-memory database.

use anyhow::Result;
use pgshift::audit::{AuditAction, MemoryAudit};
use pgshift::changeset::{Changeset, Timing, edit};
use pgshift::definition::compare::compare;
use pgshift::definition::{Definition, FieldDef, IndexDef, IndexField, IndexNames, TableDef};
use pgshift::definition;
use pgshift::driver::{Driver, MemoryDriver, Prefixed};
use pgshift::driver::memory::DriverOp;
use pgshift::error::MigrationError;
use pgshift::hooks::NoHooks;
use pgshift::orchestrator::{Orchestrator, RunOptions, RunReport, RunState};
use rstest::rstest;

use crate::helpers::fixtures::{row, seeded, table1, table2};

async fn run<D: Driver>(
    driver: &mut D,
    audit: &mut MemoryAudit,
    changeset: &Changeset,
    timing: Timing,
) -> Result<RunReport, MigrationError> {
    Orchestrator::new(driver, &mut NoHooks, audit, RunOptions::new(timing))
        .run(changeset)
        .await
}

#[tokio::test]
async fn widening_a_field_and_changing_its_default() -> Result<()> {
    let current = Definition::new(vec![table1(32, "")]);
    let target = Definition::new(vec![table1(64, "foo")]);
    let changeset = compare(&target, &current);
    let mut driver = seeded(&current)?;
    let mut audit = MemoryAudit::new();

    let report = run(&mut driver, &mut audit, &changeset, Timing::Constructive).await?;

    assert!(report.committed());
    assert_eq!(
        report.states,
        vec![
            RunState::Init,
            RunState::Verifying,
            RunState::Executing,
            RunState::Committed
        ]
    );
    assert_eq!(report.completed, vec!["alter field table1.a_text_field varchar(64)"]);

    let live = driver.describe_table("table1").await?.unwrap();
    let field = live.field("a_text_field").unwrap();
    assert_eq!(field.length, Some(64));
    assert_eq!(field.default.as_deref(), Some("foo"));
    assert_eq!(driver.rows("table1").unwrap().len(), 2);
    assert!(!driver.table_exists("table1__bak").await?);

    assert_eq!(
        audit.actions(),
        vec![
            AuditAction::RunStarted,
            AuditAction::BackupCreated,
            AuditAction::BackupDropped,
            AuditAction::Committed,
        ]
    );
    Ok(())
}

#[tokio::test]
async fn renamed_table_keeps_its_rows() -> Result<()> {
    let current = Definition::new(vec![table1(32, "")]);
    let mut renamed = table1(64, "foo");
    renamed.name = "table1_rename".to_string();
    let target = Definition::new(vec![renamed]);

    let changeset = edit::rename_table(
        &compare(&target, &current),
        "table1",
        "table1_rename",
        &current,
    )?;
    let mut driver = seeded(&current)?;
    let mut audit = MemoryAudit::new();

    let report = run(&mut driver, &mut audit, &changeset, Timing::Constructive).await?;
    assert!(report.committed());
    assert_eq!(
        report.completed,
        vec![
            "rename table table1 -> table1_rename",
            "alter field table1_rename.a_text_field varchar(64)",
        ]
    );
    assert_eq!(report.backups, vec![("table1".to_string(), "table1__bak".to_string())]);

    assert!(!driver.table_exists("table1").await?);
    let live = driver.describe_table("table1_rename").await?.unwrap();
    assert_eq!(live.field("a_text_field").unwrap().length, Some(64));
    assert_eq!(driver.rows("table1_rename").unwrap().len(), 2);

    // the rename consumed the removal, so nothing destructive is left
    let report = run(&mut driver, &mut audit, &changeset, Timing::Destructive).await?;
    assert!(report.committed());
    assert!(report.tasks.is_empty());
    assert_eq!(
        report.states,
        vec![RunState::Init, RunState::Verifying, RunState::Committed]
    );
    Ok(())
}

#[tokio::test]
async fn failed_alter_after_rename_restores_the_original_table() -> Result<()> {
    let current = Definition::new(vec![table1(32, "")]);
    let mut renamed = table1(64, "foo");
    renamed.name = "table1_rename".to_string();
    let target = Definition::new(vec![renamed]);

    let changeset = edit::rename_table(
        &compare(&target, &current),
        "table1",
        "table1_rename",
        &current,
    )?;
    let mut driver = seeded(&current)?;
    driver.fail_on(DriverOp::AlterField, "table1_rename.a_text_field");
    let mut audit = MemoryAudit::new();

    let report = run(&mut driver, &mut audit, &changeset, Timing::Constructive).await?;

    assert_eq!(report.state, RunState::RolledBack);
    assert!(matches!(report.failure, Some(MigrationError::Driver { .. })));
    assert_eq!(report.restored, vec!["table1".to_string()]);

    assert!(!driver.table_exists("table1_rename").await?);
    assert!(!driver.table_exists("table1__bak").await?);
    let restored = driver.describe_table("table1").await?.unwrap();
    assert_eq!(
        current.tables[0].structural_mismatch(&restored, IndexNames::Compare),
        None
    );
    assert_eq!(driver.rows("table1").unwrap().len(), 2);
    assert!(audit.actions().contains(&AuditAction::RolledBack));
    Ok(())
}

#[tokio::test]
async fn unique_and_primary_indexes_are_added() -> Result<()> {
    let current = Definition::new(vec![table2()]);
    let mut indexed = table2();
    indexed.indexes = vec![
        IndexDef::unique("table2_a_key", vec![IndexField::desc("a")]),
        IndexDef::primary("table2_pkey", vec![IndexField::asc("b")]),
    ];
    indexed.fields[1] = indexed.fields[1].clone().primary();
    let target = Definition::new(vec![indexed.clone()]);

    let changeset = compare(&target, &current);
    // the primary flag on `b` tightens the field, so it lands in the destructive partition
    assert!(!changeset.destructive.is_empty());

    let mut driver = seeded(&current)?;
    let mut audit = MemoryAudit::new();

    let report = run(&mut driver, &mut audit, &changeset, Timing::Constructive).await?;
    assert!(report.committed());
    assert_eq!(
        report.completed,
        vec!["add unique index table2.table2_a_key", "add primary key table2.table2_pkey"]
    );

    // creating the primary key already made `b` a NOT NULL key member
    let report = run(&mut driver, &mut audit, &changeset, Timing::Destructive).await?;
    assert!(report.committed());
    assert!(report.tasks.is_empty());

    let live = driver.describe_table("table2").await?.unwrap();
    assert_eq!(indexed.structural_mismatch(&live, IndexNames::Compare), None);
    Ok(())
}

#[tokio::test]
async fn failed_unique_index_rolls_back_the_primary_key() -> Result<()> {
    let current = Definition::new(vec![table2()]);
    let mut indexed = table2();
    indexed.indexes = vec![
        IndexDef::primary("table2_pkey", vec![IndexField::asc("b")]),
        IndexDef::unique("table2_a_key", vec![IndexField::asc("a")]),
    ];
    let changeset = compare(&Definition::new(vec![indexed]), &current);

    let mut driver = seeded(&current)?;
    driver.insert_row("table2", row(&[("a", "x"), ("b", "3")]))?;
    let mut audit = MemoryAudit::new();

    let report = run(&mut driver, &mut audit, &changeset, Timing::Constructive).await?;

    assert_eq!(report.state, RunState::RolledBack);
    assert_eq!(report.completed, vec!["add primary key table2.table2_pkey"]);
    let failure = report.failure.as_ref().map(ToString::to_string).unwrap_or_default();
    assert!(failure.contains("duplicate key"), "{}", failure);

    let live = driver.describe_table("table2").await?.unwrap();
    assert!(live.indexes.is_empty());
    assert!(!live.field("b").unwrap().primary);
    assert_eq!(driver.rows("table2").unwrap().len(), 3);
    Ok(())
}

/// `table1` with a plain index on `a_text_field` in the given direction.
fn indexed_table1(name: &str, length: u32, direction: fn(&str) -> IndexField) -> TableDef {
    let mut table = table1(length, "");
    table.name = name.to_string();
    table
        .indexes
        .push(IndexDef::plain("idx_a", vec![direction("a_text_field")]));
    table
}

#[tokio::test]
async fn renamed_table_gets_its_field_and_index_changes() -> Result<()> {
    let current = Definition::new(vec![indexed_table1("table1", 32, IndexField::asc)]);
    let mut renamed = indexed_table1("table1_rename", 64, IndexField::desc);
    renamed.fields.push(FieldDef::new("note", "text"));
    let target = Definition::new(vec![renamed.clone()]);

    let changeset = edit::rename_table(
        &compare(&target, &current),
        "table1",
        "table1_rename",
        &current,
    )?;
    let mut driver = seeded(&current)?;
    let mut audit = MemoryAudit::new();

    let report = run(&mut driver, &mut audit, &changeset, Timing::Constructive).await?;

    assert!(report.committed(), "{:?}", report.failure);
    assert_eq!(
        report.completed,
        vec![
            "remove index table1.idx_a",
            "rename table table1 -> table1_rename",
            "add field table1_rename.note text",
            "alter field table1_rename.a_text_field varchar(64)",
            "add index table1_rename.idx_a",
        ]
    );

    let report = run(&mut driver, &mut audit, &changeset, Timing::Destructive).await?;
    assert!(report.committed());

    let live = driver.describe_table("table1_rename").await?.unwrap();
    assert_eq!(renamed.structural_mismatch(&live, IndexNames::Compare), None);
    assert_eq!(driver.rows("table1_rename").unwrap().len(), 2);
    assert!(!driver.table_exists("table1").await?);
    Ok(())
}

#[tokio::test]
async fn failed_index_on_renamed_table_restores_the_original() -> Result<()> {
    let current = Definition::new(vec![indexed_table1("table1", 32, IndexField::asc)]);
    let target = Definition::new(vec![indexed_table1("table1_rename", 32, IndexField::desc)]);

    let changeset = edit::rename_table(
        &compare(&target, &current),
        "table1",
        "table1_rename",
        &current,
    )?;
    let mut driver = seeded(&current)?;
    driver.fail_on(DriverOp::CreateIndex, "table1_rename.idx_a");
    let mut audit = MemoryAudit::new();

    let report = run(&mut driver, &mut audit, &changeset, Timing::Constructive).await?;

    assert_eq!(report.state, RunState::RolledBack);
    assert_eq!(
        report.completed,
        vec!["remove index table1.idx_a", "rename table table1 -> table1_rename"]
    );
    assert_eq!(report.restored, vec!["table1".to_string()]);

    let restored = driver.describe_table("table1").await?.unwrap();
    assert_eq!(
        current.tables[0].structural_mismatch(&restored, IndexNames::Compare),
        None
    );
    assert!(!driver.table_exists("table1_rename").await?);
    Ok(())
}

#[rstest]
#[case::removed(None)]
#[case::rolled_back(Some("table1.a_text_field"))]
#[tokio::test]
async fn removing_a_field_covered_by_an_index(#[case] failing: Option<&str>) -> Result<()> {
    let current = Definition::new(vec![indexed_table1("table1", 32, IndexField::asc)]);
    let mut trimmed = table1(32, "");
    trimmed.fields.retain(|f| f.name != "a_text_field");
    let target = Definition::new(vec![trimmed.clone()]);

    let changeset = compare(&target, &current);
    let mut driver = seeded(&current)?;
    if let Some(field) = failing {
        driver.fail_on(DriverOp::DropField, field);
    }
    let mut audit = MemoryAudit::new();

    let report = run(&mut driver, &mut audit, &changeset, Timing::Destructive).await?;

    let live = driver.describe_table("table1").await?.unwrap();
    match failing {
        None => {
            assert!(report.committed());
            assert_eq!(
                report.completed,
                vec!["remove index table1.idx_a", "remove field table1.a_text_field"]
            );
            assert_eq!(trimmed.structural_mismatch(&live, IndexNames::Compare), None);
        }
        Some(_) => {
            assert_eq!(report.state, RunState::RolledBack);
            assert_eq!(report.completed, vec!["remove index table1.idx_a"]);
            assert_eq!(
                current.tables[0].structural_mismatch(&live, IndexNames::Compare),
                None
            );
        }
    }
    assert_eq!(driver.rows("table1").unwrap().len(), 2);
    Ok(())
}

#[tokio::test]
async fn prefixed_tables_migrate_under_their_bare_names() -> Result<()> {
    let mut physical = table1(32, "");
    physical.name = "xyz_table1".to_string();
    physical.indexes[0].name = "xyz_table1_pkey".to_string();
    let mut inner = MemoryDriver::from_definition(&Definition::new(vec![physical, table2()]));
    inner.insert_row("xyz_table1", row(&[("id", "1"), ("a_text_field", "first")]))?;
    let mut driver = Prefixed::new(inner, "xyz_");

    let current = definition::load_live(&mut driver, None).await?;
    assert_eq!(current, Definition::new(vec![table1(32, "")]));

    let changeset = compare(&Definition::new(vec![table1(64, "foo")]), &current);
    let mut audit = MemoryAudit::new();
    let report = run(&mut driver, &mut audit, &changeset, Timing::Constructive).await?;

    assert!(report.committed());
    assert_eq!(report.backups, vec![("table1".to_string(), "table1__bak".to_string())]);
    let inner = driver.inner();
    assert!(
        inner
            .journal()
            .contains(&"copy_table xyz_table1 -> xyz_table1__bak".to_string())
    );
    assert!(inner.rows("xyz_table1__bak").is_none());
    assert!(inner.rows("table2").is_some());
    let live = driver.describe_table("table1").await?.unwrap();
    assert_eq!(live.field("a_text_field").unwrap().length, Some(64));
    Ok(())
}
