//! Static entity schema declarations.
//!
//! # Responsibility
//! - Describe tables, key columns, scalar columns and many-to-one relations.
//! - Resolve caller-supplied field names to declared fields.
//!
//! # Invariants
//! - Every schema has exactly one key field, declared apart from `fields`.
//! - Field names (not column names) are the vocabulary of query descriptions
//!   and result column aliases.

use crate::db::transaction::LockTarget;
use crate::error::{RepoError, RepoResult};

/// Storage role of one declared field.
#[derive(Debug, Clone, Copy)]
pub enum FieldKind {
    Key,
    Scalar,
    /// Foreign key column pointing at `target`'s key.
    ManyToOne { target: &'static EntitySchema },
}

#[derive(Debug, Clone, Copy)]
pub struct FieldDef {
    pub name: &'static str,
    pub column: &'static str,
    pub kind: FieldKind,
}

impl FieldDef {
    pub const fn key(name: &'static str, column: &'static str) -> Self {
        Self {
            name,
            column,
            kind: FieldKind::Key,
        }
    }

    pub const fn scalar(name: &'static str, column: &'static str) -> Self {
        Self {
            name,
            column,
            kind: FieldKind::Scalar,
        }
    }

    pub const fn many_to_one(
        name: &'static str,
        column: &'static str,
        target: &'static EntitySchema,
    ) -> Self {
        Self {
            name,
            column,
            kind: FieldKind::ManyToOne { target },
        }
    }

    pub fn is_relation(&self) -> bool {
        matches!(self.kind, FieldKind::ManyToOne { .. })
    }

    pub fn relation_target(&self) -> Option<&'static EntitySchema> {
        match self.kind {
            FieldKind::ManyToOne { target } => Some(target),
            FieldKind::Key | FieldKind::Scalar => None,
        }
    }
}

/// Declared shape of one entity table.
#[derive(Debug)]
pub struct EntitySchema {
    pub name: &'static str,
    pub table: &'static str,
    pub key: FieldDef,
    /// Non-key fields in column order used for inserts and updates.
    pub fields: &'static [FieldDef],
}

impl EntitySchema {
    /// Key field followed by every declared field.
    pub fn all_fields(&self) -> impl Iterator<Item = &FieldDef> {
        std::iter::once(&self.key).chain(self.fields.iter())
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.all_fields().find(|field| field.name == name)
    }

    /// Resolves `name` or fails with `UnknownField`.
    pub fn require_field(&self, name: &str) -> RepoResult<&FieldDef> {
        self.field(name).ok_or_else(|| RepoError::UnknownField {
            entity: self.name,
            field: name.to_string(),
        })
    }

    /// Resolves a many-to-one relation field and its target schema.
    pub fn require_relation(&self, name: &str) -> RepoResult<(&FieldDef, &'static EntitySchema)> {
        let field = self.require_field(name)?;
        match field.relation_target() {
            Some(target) => Ok((field, target)),
            None => Err(RepoError::UnknownField {
                entity: self.name,
                field: name.to_string(),
            }),
        }
    }

    pub fn lock_target(&self) -> LockTarget {
        LockTarget {
            table: self.table,
            key_column: self.key.column,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::error::RepoError;
    use crate::model::member::MEMBER_SCHEMA;

    #[test]
    fn require_field_resolves_key_scalar_and_relation() {
        assert_eq!(MEMBER_SCHEMA.require_field("id").unwrap().column, "member_id");
        assert_eq!(MEMBER_SCHEMA.require_field("age").unwrap().column, "age");
        assert!(MEMBER_SCHEMA.require_field("team").unwrap().is_relation());
    }

    #[test]
    fn require_relation_rejects_scalar_fields() {
        let err = MEMBER_SCHEMA.require_relation("username").unwrap_err();
        assert!(matches!(err, RepoError::UnknownField { field, .. } if field == "username"));

        let (_, target) = MEMBER_SCHEMA.require_relation("team").unwrap();
        assert_eq!(target.table, "team");
    }
}
