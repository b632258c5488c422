//! Spider benchmark dataset loading (§4.11).
//!
//! Matches the Spider 1.0 dev-set schema:
//! https://yale-lily.github.io/spider
//!
//! Only `db_id`, `question`, `query`, and an optional hardness label are
//! consumed — Spider's dev.json carries additional fields (`sql`,
//! `query_toks`, ...) that this benchmark never reads. Grounded in
//! `benchmark/dataset.rs`'s flat deserialize-then-normalize shape.

use serde::Deserialize;

use crate::models::Difficulty;

/// One row of Spider's `dev.json`.
#[derive(Debug, Deserialize)]
pub struct SpiderQuestion {
    pub db_id: String,
    pub question: String,
    pub query: String,
    /// Present in Spider's `dev_gold.sql`/annotated variants, absent in the
    /// plain `dev.json` release — treated as unknown difficulty when missing.
    #[serde(default)]
    pub hardness: Option<String>,
}

impl SpiderQuestion {
    pub fn difficulty(&self) -> Option<Difficulty> {
        match self.hardness.as_deref() {
            Some("easy") => Some(Difficulty::Easy),
            Some("medium") => Some(Difficulty::Medium),
            Some("hard") => Some(Difficulty::Hard),
            Some("extra") | Some("extra hard") => Some(Difficulty::Extra),
            _ => None,
        }
    }
}

/// A Spider question paired with the zero-padded, stable question id it is
/// addressed by throughout Results and the ControlAPI (§4.11: `dev_0001`-style).
#[derive(Debug, Clone)]
pub struct BenchmarkQuestion {
    pub question_id: String,
    pub database: String,
    pub question: String,
    pub gold_sql: String,
    pub difficulty: Option<Difficulty>,
}

/// Load `dev.json` and assign stable, zero-padded question ids in file order
/// (§4.11: ids must be stable across runs so `record_result`'s idempotent
/// insert-or-ignore actually dedupes on replay).
pub fn load_dataset(path: &std::path::Path) -> Result<Vec<BenchmarkQuestion>, anyhow::Error> {
    let file = std::fs::File::open(path)?;
    let reader = std::io::BufReader::new(file);
    let questions: Vec<SpiderQuestion> = serde_json::from_reader(reader)?;

    Ok(questions
        .into_iter()
        .enumerate()
        .map(|(i, q)| BenchmarkQuestion {
            question_id: format!("dev_{:04}", i + 1),
            database: q.db_id.clone(),
            question: q.question.clone(),
            gold_sql: q.query.clone(),
            difficulty: q.difficulty(),
        })
        .collect())
}

/// Filter a loaded dataset down to an explicit allow-list of database ids
/// (§4.11, §5: Run.databases restricts the sweep to a subset of Spider).
pub fn filter_by_databases(
    questions: Vec<BenchmarkQuestion>,
    allowed: Option<&[String]>,
) -> Vec<BenchmarkQuestion> {
    match allowed {
        None => questions,
        Some(allowed) => questions.into_iter().filter(|q| allowed.iter().any(|d| d == &q.database)).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn difficulty_maps_known_hardness_strings() {
        let q = SpiderQuestion {
            db_id: "world_1".to_string(),
            question: "q".to_string(),
            query: "SELECT 1".to_string(),
            hardness: Some("extra hard".to_string()),
        };
        assert_eq!(q.difficulty(), Some(Difficulty::Extra));
    }

    #[test]
    fn difficulty_is_none_when_hardness_absent() {
        let q = SpiderQuestion {
            db_id: "world_1".to_string(),
            question: "q".to_string(),
            query: "SELECT 1".to_string(),
            hardness: None,
        };
        assert_eq!(q.difficulty(), None);
    }

    #[test]
    fn filter_by_databases_keeps_only_allowed_ids() {
        let questions = vec![
            BenchmarkQuestion {
                question_id: "dev_0001".to_string(),
                database: "world_1".to_string(),
                question: "q1".to_string(),
                gold_sql: "SELECT 1".to_string(),
                difficulty: None,
            },
            BenchmarkQuestion {
                question_id: "dev_0002".to_string(),
                database: "concert_singer".to_string(),
                question: "q2".to_string(),
                gold_sql: "SELECT 1".to_string(),
                difficulty: None,
            },
        ];
        let filtered = filter_by_databases(questions, Some(&["world_1".to_string()]));
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].database, "world_1");
    }

    #[test]
    fn filter_by_databases_is_a_passthrough_when_allowed_is_none() {
        let questions = vec![BenchmarkQuestion {
            question_id: "dev_0001".to_string(),
            database: "world_1".to_string(),
            question: "q1".to_string(),
            gold_sql: "SELECT 1".to_string(),
            difficulty: None,
        }];
        assert_eq!(filter_by_databases(questions, None).len(), 1);
    }
}
