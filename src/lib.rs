//! pgshift: a PostgreSQL schema migration engine.
//!
//! A [`changeset::Changeset`] (usually produced by [`definition::compare::compare`] and reviewed
//! by an operator) is applied one timing class at a time by an [`orchestrator::Orchestrator`]:
//! it is verified against the live database into a [`task::TaskList`], every table the run will
//! touch is snapshotted by the [`backup::BackupManager`], and the tasks run through the
//! [`executor::Executor`] with before/after hooks. Any failure restores every snapshot.

pub mod audit;
pub mod backup;
pub mod changeset;
pub mod commands;
pub mod config;
pub mod constants;
pub mod db;
pub mod definition;
pub mod driver;
pub mod error;
pub mod executor;
pub mod hooks;
pub mod orchestrator;
pub mod progress;
pub mod prompts;
pub mod render;
pub mod task;
