//! EquivalenceJudge (§4.9): decides whether a generated SQL statement is
//! equivalent to the gold statement, by exact match (syntactic, after
//! normalization) and by execution match (the two statements' result sets
//! compare equal). Never panics or propagates an error upward — an
//! unparseable or unexecutable candidate is simply "not a match", which the
//! Runner records on the Result row.
//!
//! Grounded in `executor/safety.rs`'s sqlparser-AST-with-fail-closed-fallback
//! idiom, reused here for normalization instead of rejection, and in
//! `executor/mod.rs`'s `CellValue`/`ExecutionOutcome` shape for the
//! execution-match comparison.

use sqlparser::ast::Statement;
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::executor::{CellValue, ExecutionOutcome, QueryExecutor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JudgeOutcome {
    pub exact_match: bool,
    pub exec_match: bool,
}

pub struct EquivalenceJudge<'a> {
    executor: &'a QueryExecutor,
    tolerance: f64,
}

impl<'a> EquivalenceJudge<'a> {
    pub fn new(executor: &'a QueryExecutor, tolerance: f64) -> Self {
        EquivalenceJudge { executor, tolerance }
    }

    /// Judge `candidate_sql` against `gold_sql` for `database` (§4.9). Both
    /// checks are attempted independently; a failure in one does not prevent
    /// the other from being computed.
    pub async fn judge(&self, database: &str, candidate_sql: &str, gold_sql: &str) -> JudgeOutcome {
        JudgeOutcome {
            exact_match: exact_match(database, candidate_sql, gold_sql),
            exec_match: self.exec_match(database, candidate_sql, gold_sql).await,
        }
    }

    async fn exec_match(&self, database: &str, candidate_sql: &str, gold_sql: &str) -> bool {
        let candidate = self.executor.execute(database, candidate_sql).await;
        let gold = self.executor.execute(database, gold_sql).await;

        match (candidate, gold) {
            (Ok(candidate_outcome), Ok(gold_outcome)) => {
                result_sets_equivalent(&candidate_outcome, &gold_outcome, gold_sql, self.tolerance)
            }
            _ => false,
        }
    }
}

/// Exact-match: normalize both statements via sqlparser re-emission; fall
/// back to lexical normalization if either fails to parse (§4.9).
fn exact_match(database: &str, candidate_sql: &str, gold_sql: &str) -> bool {
    let candidate_norm = normalize_sql(database, candidate_sql);
    let gold_norm = normalize_sql(database, gold_sql);
    candidate_norm == gold_norm
}

fn normalize_sql(database: &str, sql: &str) -> String {
    match Parser::parse_sql(&PostgreSqlDialect {}, sql) {
        Ok(statements) if statements.len() == 1 => strip_schema_prefix(&statements[0].to_string(), database),
        _ => strip_schema_prefix(&lexical_normalize(sql), database),
    }
}

/// Collapse whitespace, lowercase, and strip a single trailing semicolon —
/// the fallback path when a candidate fails to parse (§4.9).
fn lexical_normalize(sql: &str) -> String {
    let trimmed = sql.trim().trim_end_matches(';').trim();
    trimmed.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// Strip a `{database}.` prefix from fully qualified table references only
/// when it matches the target database exactly, per §4.9's policy: a prefix
/// naming a *different* database is a real semantic difference and must not
/// be stripped.
fn strip_schema_prefix(sql: &str, database: &str) -> String {
    let prefix_lower = format!("{}.", database.to_lowercase());
    let sql_lower = sql.to_lowercase();
    if !sql_lower.contains(&prefix_lower) {
        return sql_lower;
    }
    sql_lower.replace(&prefix_lower, "")
}

/// Whether `sql`'s parsed AST contains a top-level ORDER BY clause; governs
/// whether row comparison is order-sensitive or a multiset comparison (§4.9).
fn has_order_by(sql: &str) -> bool {
    match Parser::parse_sql(&PostgreSqlDialect {}, sql) {
        Ok(statements) => statements.iter().any(|stmt| match stmt {
            Statement::Query(query) => !query.order_by.is_empty(),
            _ => false,
        }),
        Err(_) => false,
    }
}

fn result_sets_equivalent(
    candidate: &ExecutionOutcome,
    gold: &ExecutionOutcome,
    gold_sql: &str,
    tolerance: f64,
) -> bool {
    if candidate.columns.len() != gold.columns.len() {
        return false;
    }
    if candidate.rows.len() != gold.rows.len() {
        return false;
    }

    let order_sensitive = has_order_by(gold_sql);
    let rows_match = if order_sensitive {
        candidate.rows.iter().zip(gold.rows.iter()).all(|(c, g)| rows_equal(c, g, tolerance))
    } else {
        rows_as_multiset_equal(&candidate.rows, &gold.rows, tolerance)
    };

    // §4.9: the row cap applies symmetrically. One side truncated and the
    // other not is never a match (the untruncated side may hold rows beyond
    // the cap that were simply never compared). Both sides truncated is only
    // a match when the truncated sets are, as captured, exactly identical —
    // same length (checked above) and equal content.
    match (candidate.truncated, gold.truncated) {
        (false, false) => rows_match,
        (true, true) => rows_match,
        _ => false,
    }
}

fn rows_equal(a: &[CellValue], b: &[CellValue], tolerance: f64) -> bool {
    a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| cells_equal(x, y, tolerance))
}

fn cells_equal(a: &CellValue, b: &CellValue, tolerance: f64) -> bool {
    match (a, b) {
        (CellValue::Null, CellValue::Null) => true,
        (CellValue::Bool(x), CellValue::Bool(y)) => x == y,
        (CellValue::Int(x), CellValue::Int(y)) => x == y,
        (CellValue::Int(x), CellValue::Float(y)) | (CellValue::Float(y), CellValue::Int(x)) => {
            (*x as f64 - y).abs() <= tolerance
        }
        (CellValue::Float(x), CellValue::Float(y)) => (x - y).abs() <= tolerance,
        (CellValue::Text(x), CellValue::Text(y)) => x.trim() == y.trim(),
        _ => false,
    }
}

/// Order-insensitive row comparison: since `CellValue` carries no total
/// ordering we want to lean on for float tolerance, rows are matched greedily
/// rather than sorted (§4.9: exact duplicates and near-equal floats both need
/// to line up without a canonical sort key).
fn rows_as_multiset_equal(a: &[Vec<CellValue>], b: &[Vec<CellValue>], tolerance: f64) -> bool {
    let mut remaining: Vec<&Vec<CellValue>> = b.iter().collect();
    for row in a {
        let Some(pos) = remaining.iter().position(|candidate| rows_equal(row, candidate, tolerance)) else {
            return false;
        };
        remaining.remove(pos);
    }
    remaining.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_ignores_keyword_case_and_whitespace() {
        assert!(exact_match("world_1", "select * from country", "SELECT   *   FROM country"));
    }

    #[test]
    fn exact_match_strips_matching_schema_prefix() {
        assert!(exact_match(
            "world_1",
            "SELECT * FROM world_1.country",
            "SELECT * FROM country"
        ));
    }

    #[test]
    fn exact_match_does_not_strip_a_different_databases_prefix() {
        assert!(!exact_match(
            "world_1",
            "SELECT * FROM other_db.country",
            "SELECT * FROM country"
        ));
    }

    #[test]
    fn exact_match_falls_back_to_lexical_normalization_on_parse_failure() {
        // Neither side parses, both fall back to the lexical path.
        assert!(exact_match("world_1", "SELEKT * FORM country;", "selekt * form country"));
    }

    #[test]
    fn cells_equal_applies_tolerance_to_numeric_cross_type_comparison() {
        assert!(cells_equal(&CellValue::Int(3), &CellValue::Float(3.0000001), 1e-6));
        assert!(!cells_equal(&CellValue::Int(3), &CellValue::Float(3.1), 1e-6));
    }

    #[test]
    fn cells_equal_treats_null_as_equal_to_null() {
        assert!(cells_equal(&CellValue::Null, &CellValue::Null, 1e-6));
        assert!(!cells_equal(&CellValue::Null, &CellValue::Int(0), 1e-6));
    }

    #[test]
    fn multiset_comparison_ignores_row_order() {
        let a = vec![vec![CellValue::Int(1)], vec![CellValue::Int(2)]];
        let b = vec![vec![CellValue::Int(2)], vec![CellValue::Int(1)]];
        assert!(rows_as_multiset_equal(&a, &b, 1e-6));
    }

    #[test]
    fn multiset_comparison_respects_duplicate_counts() {
        let a = vec![vec![CellValue::Int(1)], vec![CellValue::Int(1)]];
        let b = vec![vec![CellValue::Int(1)], vec![CellValue::Int(2)]];
        assert!(!rows_as_multiset_equal(&a, &b, 1e-6));
    }

    #[test]
    fn has_order_by_detects_top_level_clause() {
        assert!(has_order_by("SELECT * FROM country ORDER BY code"));
        assert!(!has_order_by("SELECT * FROM country"));
    }

    fn outcome(rows: Vec<Vec<CellValue>>, truncated: bool) -> ExecutionOutcome {
        ExecutionOutcome { columns: vec!["c".to_string()], rows, truncated, execution_ms: 1 }
    }

    #[test]
    fn one_sided_truncation_is_never_a_match() {
        let candidate = outcome(vec![vec![CellValue::Int(1)]], true);
        let gold = outcome(vec![vec![CellValue::Int(1)]], false);
        assert!(!result_sets_equivalent(&candidate, &gold, "SELECT * FROM t", 1e-6));
    }

    #[test]
    fn both_truncated_with_identical_sets_is_a_match() {
        let candidate = outcome(vec![vec![CellValue::Int(1)], vec![CellValue::Int(2)]], true);
        let gold = outcome(vec![vec![CellValue::Int(1)], vec![CellValue::Int(2)]], true);
        assert!(result_sets_equivalent(&candidate, &gold, "SELECT * FROM t", 1e-6));
    }

    #[test]
    fn both_truncated_with_different_sets_is_not_a_match() {
        let candidate = outcome(vec![vec![CellValue::Int(1)], vec![CellValue::Int(2)]], true);
        let gold = outcome(vec![vec![CellValue::Int(1)], vec![CellValue::Int(3)]], true);
        assert!(!result_sets_equivalent(&candidate, &gold, "SELECT * FROM t", 1e-6));
    }
}
