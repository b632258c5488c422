//! SQL safety validator (§4.2): rejects data-modifying or schema-modifying
//! statements before they reach the pool, by both a cheap regex pre-filter
//! and AST inspection. A statement that fails to parse is rejected rather
//! than allowed through on the regex alone (fail closed).

use std::sync::OnceLock;

use regex::Regex;
use sqlparser::ast::Statement;
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::errors::ExecutorError;

fn forbidden_keywords() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(insert|update|delete|drop|create|alter|truncate|grant|revoke)\b").unwrap()
    })
}

pub fn validate_statement(sql: &str) -> Result<(), ExecutorError> {
    if forbidden_keywords().is_match(sql) {
        return Err(ExecutorError::SafetyRejected {
            rule: "forbidden keyword in statement".to_string(),
        });
    }

    reject_multiple_statements(sql)?;

    let statements = Parser::parse_sql(&PostgreSqlDialect {}, sql).map_err(|e| ExecutorError::SafetyRejected {
        rule: format!("statement failed to parse, rejected fail-closed: {e}"),
    })?;

    if statements.len() != 1 {
        return Err(ExecutorError::SafetyRejected {
            rule: "only a single statement is permitted".to_string(),
        });
    }

    match &statements[0] {
        Statement::Query(_) => Ok(()),
        other => Err(ExecutorError::SafetyRejected {
            rule: format!("statement kind not permitted: {other}"),
        }),
    }
}

/// Reject `;`-separated multiple statements unless the only trailing content
/// after the final `;` is whitespace (per §4.2).
fn reject_multiple_statements(sql: &str) -> Result<(), ExecutorError> {
    let trimmed = sql.trim_end();
    let Some(first_semi) = trimmed.find(';') else {
        return Ok(());
    };
    let remainder = trimmed[first_semi + 1..].trim();
    if !remainder.is_empty() {
        return Err(ExecutorError::SafetyRejected {
            rule: "multiple statements are not permitted".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_plain_select() {
        assert!(validate_statement("SELECT * FROM country").is_ok());
    }

    #[test]
    fn allows_trailing_semicolon() {
        assert!(validate_statement("SELECT * FROM country;").is_ok());
    }

    #[test]
    fn rejects_insert() {
        assert!(validate_statement("INSERT INTO country VALUES (1)").is_err());
    }

    #[test]
    fn rejects_drop_table() {
        assert!(validate_statement("DROP TABLE country").is_err());
    }

    #[test]
    fn rejects_stacked_statements() {
        assert!(validate_statement("SELECT 1; DROP TABLE country;").is_err());
    }

    #[test]
    fn rejects_unparseable_sql_fail_closed() {
        assert!(validate_statement("SELEKT * FROM country").is_err());
    }
}
