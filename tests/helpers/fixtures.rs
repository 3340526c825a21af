//! Shared schemas and seeded drivers for engine tests.

use anyhow::Result;
use pgshift::definition::{Definition, FieldDef, IndexDef, IndexField, TableDef};
use pgshift::driver::MemoryDriver;
use pgshift::driver::memory::Row;
use std::cell::RefCell;
use std::rc::Rc;

use pgshift::hooks::{HookKey, HookOperation, HookPhase, HookRegistry};

/// `table1 (id serial primary key, a_text_field varchar(length) default '...')`
pub fn table1(length: u32, default: &str) -> TableDef {
    TableDef::new(
        "table1",
        vec![
            FieldDef::new("id", "integer").autoincrement().primary(),
            FieldDef::new("a_text_field", "varchar")
                .length(length)
                .default_value(default),
        ],
        vec![IndexDef::primary("table1_pkey", vec![IndexField::asc("id")])],
    )
}

/// `table2 (a text, b integer)` without any index.
pub fn table2() -> TableDef {
    TableDef::new(
        "table2",
        vec![FieldDef::new("a", "text"), FieldDef::new("b", "integer")],
        vec![],
    )
}

pub fn row(values: &[(&str, &str)]) -> Row {
    values
        .iter()
        .map(|(k, v)| (k.to_string(), Some(v.to_string())))
        .collect()
}

/// A driver holding `definition`, with two rows in each of `table1` and `table2` when present.
pub fn seeded(definition: &Definition) -> Result<MemoryDriver> {
    let mut driver = MemoryDriver::from_definition(definition);

    if definition.contains_table("table1") {
        driver.insert_row("table1", row(&[("id", "1"), ("a_text_field", "first")]))?;
        driver.insert_row("table1", row(&[("id", "2"), ("a_text_field", "second")]))?;
    }
    if definition.contains_table("table2") {
        driver.insert_row("table2", row(&[("a", "x"), ("b", "1")]))?;
        driver.insert_row("table2", row(&[("a", "y"), ("b", "2")]))?;
    }

    Ok(driver)
}

/// A hook registry that records every hook it runs, in order.
pub struct RecordingHooks {
    pub registry: HookRegistry,
    pub calls: Rc<RefCell<Vec<String>>>,
}

impl RecordingHooks {
    pub fn new() -> Self {
        Self {
            registry: HookRegistry::new(),
            calls: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Register both phases of a table or field hook. `fail` names the phase that reports failure.
    pub fn around(
        &mut self,
        operation: HookOperation,
        table: &str,
        field: Option<&str>,
        fail: Option<HookPhase>,
    ) {
        let before = match field {
            Some(field) => HookKey::field(HookPhase::Before, operation, table, field),
            None => HookKey::table(HookPhase::Before, operation, table),
        };

        for key in [before.clone(), before.with_phase(HookPhase::After)] {
            let calls = Rc::clone(&self.calls);
            let succeed = fail != Some(key.phase);
            self.registry.register(key, move |key| {
                calls.borrow_mut().push(key.to_string());
                succeed
            });
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }
}
