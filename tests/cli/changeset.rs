//! `pgshift changeset` edits of saved files. These need no database.

use crate::helpers::cli::with_cli_helper;
use anyhow::Result;
use pgshift::changeset::io;
use predicates::prelude::*;

const SPLIT_RENAME: &str = r#"
constructive:
  tables:
    change:
      table1:
        fields:
          add:
            - name: label
              type: varchar
              length: 64
destructive:
  tables:
    change:
      table1:
        fields:
          remove: [a_text_field]
"#;

#[test]
fn help_lists_every_command() -> Result<()> {
    with_cli_helper(|helper| {
        helper
            .command()
            .arg("--help")
            .assert()
            .success()
            .stdout(
                predicate::str::contains("diff")
                    .and(predicate::str::contains("changeset"))
                    .and(predicate::str::contains("verify"))
                    .and(predicate::str::contains("run"))
                    .and(predicate::str::contains("history")),
            );
        Ok(())
    })
}

#[test]
fn rename_field_rewrites_the_file() -> Result<()> {
    with_cli_helper(|helper| {
        let path = helper.write_file("changes.yaml", SPLIT_RENAME)?;

        helper
            .command()
            .args(["changeset", "rename-field"])
            .arg(&path)
            .args(["table1", "a_text_field", "label"])
            .assert()
            .success()
            .stdout(predicate::str::contains("is now a rename of"));

        let edited = io::load_str(&helper.read_file("changes.yaml")?)?.changeset;
        let change = &edited.constructive.tables.change["table1"];
        assert!(change.fields.add.is_empty());
        assert_eq!(change.fields.rename[0].was, "a_text_field");
        assert_eq!(change.fields.rename[0].field.name, "label");
        assert!(edited.destructive.is_empty());
        Ok(())
    })
}

#[test]
fn rename_field_without_a_matching_pair_fails() -> Result<()> {
    with_cli_helper(|helper| {
        let path = helper.write_file("changes.yaml", SPLIT_RENAME)?;

        helper
            .command()
            .args(["changeset", "rename-field"])
            .arg(&path)
            .args(["table1", "a_text_field", "title"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("No added field 'table1.title'"));

        // the file is left as it was
        assert_eq!(helper.read_file("changes.yaml")?, SPLIT_RENAME);
        Ok(())
    })
}
