//! Statement classification for the table allowlist.
//!
//! The replicator treats classifier output as a hint: it only ever uses the
//! extracted references to decide whether a QUERY event is in scope, never
//! to rewrite the statement.

use std::ops::ControlFlow;

use sqlparser::ast::visit_relations;
use sqlparser::dialect::MySqlDialect;
use sqlparser::parser::Parser;

use crate::cdc_error;
use crate::error::{CdcResult, ErrorKind};

/// A table reference extracted from a statement.
///
/// `database` is present only when the statement qualifies the table
/// explicitly; unqualified references are resolved against the event's
/// current database by the filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub database: Option<String>,
    pub table: String,
}

impl TableRef {
    /// Returns the `db.table` form, falling back to `default_db` for
    /// unqualified references.
    pub fn qualified(&self, default_db: &str) -> String {
        match &self.database {
            Some(database) => format!("{database}.{}", self.table),
            None => format!("{default_db}.{}", self.table),
        }
    }
}

/// Extracts the tables referenced by a replicated statement.
pub trait QueryClassifier: Send + Sync {
    /// Returns every table referenced by `statement`, or an error when the
    /// statement cannot be understood.
    fn table_references(&self, statement: &str) -> CdcResult<Vec<TableRef>>;
}

/// [`QueryClassifier`] backed by a structural SQL parser.
///
/// Because references are taken from the parsed tree, quoted identifiers
/// containing literal dots keep their exact name instead of being re-split
/// on `.`.
#[derive(Debug, Clone, Default)]
pub struct SqlClassifier;

impl QueryClassifier for SqlClassifier {
    fn table_references(&self, statement: &str) -> CdcResult<Vec<TableRef>> {
        let statements = Parser::parse_sql(&MySqlDialect {}, statement).map_err(|err| {
            cdc_error!(
                ErrorKind::StatementParseFailed,
                "failed to parse replicated statement"
            )
            .with_source(err)
        })?;

        let mut references = Vec::new();
        visit_relations(&statements, |relation| {
            let mut parts: Vec<String> = relation
                .0
                .iter()
                .map(|ident| ident.value.clone())
                .collect();

            if let Some(table) = parts.pop() {
                references.push(TableRef {
                    database: parts.pop(),
                    table,
                });
            }

            ControlFlow::<()>::Continue(())
        });

        Ok(references)
    }
}
