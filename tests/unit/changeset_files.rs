use anyhow::Result;
use pgshift::changeset::io::{self, DumpOptions};
use pgshift::changeset::{Timing, edit};
use pgshift::definition::compare::compare;
use pgshift::definition::{Definition, FieldDef, TableDef};
use tempfile::TempDir;

fn definitions() -> (Definition, Definition) {
    let current = Definition::new(vec![
        TableDef::new(
            "accounts",
            vec![
                FieldDef::new("id", "integer").not_null(),
                FieldDef::new("nick", "varchar").length(16),
            ],
            vec![],
        ),
        TableDef::new("legacy", vec![FieldDef::new("x", "text")], vec![]),
    ]);
    let target = Definition::new(vec![TableDef::new(
        "accounts",
        vec![
            FieldDef::new("id", "integer").not_null(),
            FieldDef::new("handle", "varchar").length(16),
        ],
        vec![],
    )]);
    (current, target)
}

#[test]
fn saved_changeset_reloads_with_a_stable_checksum() -> Result<()> {
    let (current, target) = definitions();
    let changeset = compare(&target, &current);
    let dir = TempDir::new()?;
    let path = dir.path().join("changes.yaml");

    io::save(&path, &changeset, DumpOptions::default())?;
    let first = io::load(&path)?;
    let second = io::load(&path)?;

    assert_eq!(first.changeset, changeset);
    assert_eq!(first.checksum, second.checksum);
    assert_eq!(first.checksum, io::checksum(&std::fs::read_to_string(&path)?));
    Ok(())
}

#[test]
fn editing_a_changeset_changes_its_checksum() -> Result<()> {
    let (current, target) = definitions();
    let changeset = compare(&target, &current);
    let dir = TempDir::new()?;
    let path = dir.path().join("changes.yaml");

    io::save(&path, &changeset, DumpOptions::default())?;
    let before = io::load(&path)?;

    let edited = edit::rename_field(&before.changeset, "accounts", "nick", "handle")?;
    io::save(&path, &edited, DumpOptions::default())?;
    let after = io::load(&path)?;

    assert_ne!(before.checksum, after.checksum);
    let change = &after.changeset.constructive.tables.change["accounts"];
    assert_eq!(change.fields.rename[0].was, "nick");
    assert!(!after.changeset.destructive.tables.change.contains_key("accounts"));
    assert_eq!(after.changeset.destructive.tables.remove, vec!["legacy"]);
    Ok(())
}

#[test]
fn single_partition_dump_omits_the_other() -> Result<()> {
    let (current, target) = definitions();
    let changeset = compare(&target, &current);

    let text = io::dump(
        &changeset,
        DumpOptions {
            timing: Some(Timing::Constructive),
        },
    )?;
    let reloaded = io::load_str(&text)?.changeset;

    assert_eq!(reloaded.constructive, changeset.constructive);
    assert!(reloaded.destructive.is_empty());
    Ok(())
}
