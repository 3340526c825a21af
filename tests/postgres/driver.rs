//! Backup, restore and commit through `PgDriver`.

use anyhow::Result;
use pgshift::audit::MemoryAudit;
use pgshift::backup::BackupManager;
use pgshift::changeset::{Timing, edit};
use pgshift::definition::compare::compare;
use pgshift::definition::{Definition, FieldDef, IndexNames, SortDirection};
use pgshift::driver::{Driver, Prefixed};
use pgshift::hooks::NoHooks;
use pgshift::orchestrator::{Orchestrator, RunOptions};

use crate::helpers::database::with_test_schema;

#[tokio::test]
async fn serial_copy_survives_dropping_the_original() -> Result<()> {
    with_test_schema(async |db| {
        db.execute("CREATE TABLE counters (id serial PRIMARY KEY, label text UNIQUE)")
            .await;
        db.execute("INSERT INTO counters (label) VALUES ('a'), ('b')").await;
        let mut driver = db.driver().await;
        let before = driver.describe_table("counters").await?.unwrap();

        let mut backups = BackupManager::new("__bak");
        backups.backup_table(&mut driver, "counters").await?;

        assert_eq!(
            db.fetch_text("SELECT pg_get_serial_sequence('counters__bak', 'id')")
                .await,
            Some(format!("{}.counters__bak_id_seq", db.schema()))
        );
        // fails with 2BP01 while the copy's default still uses the original's sequence
        db.execute("DROP TABLE counters").await;

        assert_eq!(
            backups.rollback(&mut driver).await,
            Ok(vec!["counters".to_string()])
        );

        assert_eq!(driver.describe_table("counters").await?, Some(before));
        assert!(!driver.table_exists("counters__bak").await?);
        assert_eq!(
            db.fetch_text("SELECT pg_get_serial_sequence('counters', 'id')")
                .await,
            Some(format!("{}.counters_id_seq", db.schema()))
        );
        assert_eq!(
            db.fetch_i64("INSERT INTO counters (label) VALUES ('c') RETURNING id::bigint")
                .await,
            3
        );
        Ok(())
    })
    .await
}

#[tokio::test]
async fn identity_copy_counts_on_its_own() -> Result<()> {
    with_test_schema(async |db| {
        db.execute(
            "CREATE TABLE events (id bigint GENERATED ALWAYS AS IDENTITY PRIMARY KEY, \
             kind text NOT NULL, at timestamptz)",
        )
        .await;
        db.execute("CREATE INDEX events_at_idx ON events (at DESC, kind)").await;
        db.execute("INSERT INTO events (kind, at) VALUES ('a', now()), ('b', now())")
            .await;
        let mut driver = db.driver().await;

        let mut backups = BackupManager::new("__bak");
        let snapshot = backups.backup_table(&mut driver, "events").await?;
        let index = snapshot.definition.index("events_at_idx").unwrap();
        assert_eq!(index.fields[0].direction, SortDirection::Desc);

        assert_eq!(
            db.fetch_i64("INSERT INTO events__bak (kind) VALUES ('copy') RETURNING id")
                .await,
            3
        );
        assert_eq!(
            db.fetch_i64("INSERT INTO events (kind) VALUES ('original') RETURNING id")
                .await,
            3
        );

        assert_eq!(backups.commit(&mut driver).await, vec!["events__bak"]);
        assert!(!driver.table_exists("events__bak").await?);
        assert_eq!(db.fetch_i64("SELECT count(*) FROM events").await, 3);
        Ok(())
    })
    .await
}

#[tokio::test]
async fn rollback_restores_rows_indexes_and_identity() -> Result<()> {
    with_test_schema(async |db| {
        db.execute(
            "CREATE TABLE events (id bigint GENERATED BY DEFAULT AS IDENTITY PRIMARY KEY, \
             kind text NOT NULL UNIQUE, at timestamptz)",
        )
        .await;
        db.execute("CREATE INDEX events_at_idx ON events (at DESC)").await;
        db.execute("INSERT INTO events (kind) VALUES ('a'), ('b')").await;
        let mut driver = db.driver().await;
        let before = driver.describe_table("events").await?.unwrap();

        let mut backups = BackupManager::new("__bak");
        backups.backup_table(&mut driver, "events").await?;
        db.execute("DROP INDEX events_at_idx").await;
        db.execute("ALTER TABLE events ADD COLUMN extra integer").await;
        db.execute("DELETE FROM events").await;

        assert_eq!(
            backups.rollback(&mut driver).await,
            Ok(vec!["events".to_string()])
        );

        let after = driver.describe_table("events").await?.unwrap();
        assert_eq!(before.structural_mismatch(&after, IndexNames::Compare), None);
        assert!(after.index("events_kind_key").unwrap().unique);
        assert_eq!(db.fetch_i64("SELECT count(*) FROM events").await, 2);
        assert_eq!(
            db.fetch_i64("INSERT INTO events (kind) VALUES ('c') RETURNING id")
                .await,
            3
        );
        Ok(())
    })
    .await
}

#[tokio::test]
async fn incoming_foreign_keys_are_lifted_and_restored() -> Result<()> {
    with_test_schema(async |db| {
        db.execute("CREATE TABLE parents (id serial PRIMARY KEY, name text)").await;
        db.execute(
            "CREATE TABLE children (id serial PRIMARY KEY, \
             parent_id integer REFERENCES parents (id) ON DELETE CASCADE)",
        )
        .await;
        db.execute("INSERT INTO parents (name) VALUES ('p')").await;
        db.execute("INSERT INTO children (parent_id) VALUES (1)").await;
        let mut driver = db.driver().await;
        let keys = driver.foreign_keys("parents").await?;
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].name, "children_parent_id_fkey");
        assert!(keys[0].is_incoming("parents"));

        let mut backups = BackupManager::new("__bak");
        let snapshot = backups.backup_table(&mut driver, "parents").await?;
        assert_eq!(snapshot.foreign_keys, keys);
        assert!(driver.foreign_keys("parents__bak").await?.is_empty());

        db.execute("ALTER TABLE parents ADD COLUMN extra integer").await;
        assert_eq!(
            backups.rollback(&mut driver).await,
            Ok(vec!["parents".to_string()])
        );

        assert_eq!(driver.foreign_keys("parents").await?, keys);
        assert_eq!(db.fetch_i64("SELECT count(*) FROM children").await, 1);
        db.execute("DELETE FROM parents").await;
        assert_eq!(db.fetch_i64("SELECT count(*) FROM children").await, 0);
        Ok(())
    })
    .await
}

#[tokio::test]
async fn renamed_table_migrates_with_its_sequence() -> Result<()> {
    with_test_schema(async |db| {
        db.execute(
            "CREATE TABLE table1 (id serial PRIMARY KEY, a_text_field varchar(32) DEFAULT '')",
        )
        .await;
        db.execute("CREATE INDEX idx_a ON table1 (a_text_field)").await;
        db.execute("INSERT INTO table1 (a_text_field) VALUES ('first'), ('second')")
            .await;
        let mut driver = db.driver().await;

        let live = driver.describe_table("table1").await?.unwrap();
        let current = Definition::new(vec![live.clone()]);
        let mut renamed = live.clone();
        renamed.name = "table1_rename".to_string();
        renamed.fields[1].length = Some(64);
        renamed.fields.push(FieldDef::new("note", "text"));
        renamed.indexes[1].fields[0].direction = SortDirection::Desc;
        let target = Definition::new(vec![renamed.clone()]);
        let changeset = edit::rename_table(
            &compare(&target, &current),
            "table1",
            "table1_rename",
            &current,
        )?;

        let mut audit = MemoryAudit::new();
        for timing in [Timing::Constructive, Timing::Destructive] {
            let report =
                Orchestrator::new(&mut driver, &mut NoHooks, &mut audit, RunOptions::new(timing))
                    .run(&changeset)
                    .await?;
            assert!(report.committed(), "{:?}", report.failure);
        }

        let migrated = driver.describe_table("table1_rename").await?.unwrap();
        assert_eq!(renamed.structural_mismatch(&migrated, IndexNames::Compare), None);
        assert_eq!(driver.table_names().await?, vec!["table1_rename"]);
        assert_eq!(
            db.fetch_text("SELECT pg_get_serial_sequence('table1_rename', 'id')")
                .await,
            Some(format!("{}.table1_rename_id_seq", db.schema()))
        );
        assert_eq!(db.fetch_i64("SELECT count(*) FROM table1_rename").await, 2);
        Ok(())
    })
    .await
}

#[tokio::test]
async fn prefixed_backups_stay_inside_the_prefix() -> Result<()> {
    with_test_schema(async |db| {
        db.execute("CREATE TABLE app_users (id serial PRIMARY KEY, email text UNIQUE)")
            .await;
        db.execute("CREATE TABLE users (id serial PRIMARY KEY)").await;
        let mut driver = Prefixed::new(db.driver().await, "app_");
        assert_eq!(driver.table_names().await?, vec!["users"]);

        let mut backups = BackupManager::new("__bak");
        let snapshot = backups.backup_table(&mut driver, "users").await?;
        assert_eq!(snapshot.backup, "users__bak");
        assert!(snapshot.definition.index("users_email_key").is_some());
        assert!(driver.inner_mut().table_exists("app_users__bak").await?);

        db.execute("ALTER TABLE app_users DROP COLUMN email").await;
        assert_eq!(
            backups.rollback(&mut driver).await,
            Ok(vec!["users".to_string()])
        );

        let restored = driver.describe_table("users").await?.unwrap();
        assert!(restored.has_field("email"));
        assert!(restored.index("users_email_key").is_some());
        assert_eq!(
            driver.inner_mut().table_names().await?,
            vec!["app_users", "users"]
        );
        Ok(())
    })
    .await
}
