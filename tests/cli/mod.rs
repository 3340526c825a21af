pub mod changeset;
