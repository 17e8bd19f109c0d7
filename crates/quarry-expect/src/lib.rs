//! Declarative data-quality expectations evaluated against in-memory tables.
//!
//! A [`Dataset`] wraps a materialised [`Table`] together with the
//! [`ExpectationSuite`] attached to it. [`Dataset::validate`] runs every
//! expectation synchronously and returns one aggregate [`Verdict`].

pub mod evaluate;
pub mod suite;

pub use evaluate::{evaluate, PARTIAL_UNEXPECTED_LIMIT};
pub use suite::{Expectation, ExpectationSuite};

use quarry_types::{QuarryError, Result, Table, Verdict};

/// A loaded table annotated with its active expectation suite.
#[derive(Debug, Clone)]
pub struct Dataset {
    table: Table,
    suite: Option<ExpectationSuite>,
}

impl Dataset {
    pub fn new(table: Table) -> Self {
        Self { table, suite: None }
    }

    /// Attach `suite` as the active rule set, replacing any previous one.
    pub fn with_suite(mut self, suite: ExpectationSuite) -> Self {
        self.suite = Some(suite);
        self
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    /// Evaluate the attached suite against the table.
    pub fn validate(&self) -> Result<Verdict> {
        let suite = self
            .suite
            .as_ref()
            .ok_or_else(|| QuarryError::InvalidSuite("no expectation suite attached".into()))?;
        Ok(validate(&self.table, suite))
    }
}

/// Evaluate every expectation of `suite` against `table`, in suite order.
pub fn validate(table: &Table, suite: &ExpectationSuite) -> Verdict {
    let results = suite
        .expectations
        .iter()
        .map(|expectation| {
            let result = evaluate(expectation, table);
            tracing::debug!(
                expectation = %result.expectation_type,
                success = result.success,
                "Evaluated expectation"
            );
            result
        })
        .collect();
    Verdict::from_results(results)
}
