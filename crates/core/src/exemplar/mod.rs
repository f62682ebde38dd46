//! Node templates loaded once from the exemplar JSON document.

use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read exemplar file `{path}`: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("exemplar document is not valid JSON: {0}")]
    Json(#[source] serde_json::Error),
    #[error("exemplar document must be an object keyed by node id")]
    NotAnObject,
    #[error("exemplar for node `{node_id}` is malformed: {source}")]
    InvalidNode {
        node_id: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExemplarProblem {
    pub problem_text: String,
    #[serde(default)]
    pub correct_answer: Option<Value>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Exemplar {
    #[serde(skip)]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub learning_focus: Vec<String>,
    #[serde(default)]
    pub section: String,
    #[serde(default)]
    pub exemplar_problems: Vec<ExemplarProblem>,
    #[serde(default)]
    pub variation_rules: Value,
    #[serde(default)]
    pub math_tool: Value,
    #[serde(default)]
    pub generation_guidelines: Vec<String>,
}

/// Read-only index of exemplars, iterated in the order the document declares them.
#[derive(Clone, Debug, Default)]
pub struct ExemplarRepository {
    order: Vec<String>,
    exemplars: HashMap<String, Exemplar>,
}

impl ExemplarRepository {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&contents)
    }

    pub fn from_json_str(input: &str) -> Result<Self, LoadError> {
        let document: Value = serde_json::from_str(input).map_err(LoadError::Json)?;
        let Value::Object(entries) = document else {
            return Err(LoadError::NotAnObject);
        };

        let mut repository = Self::default();
        for (node_id, raw) in entries {
            let mut exemplar: Exemplar =
                serde_json::from_value(raw).map_err(|source| LoadError::InvalidNode {
                    node_id: node_id.clone(),
                    source,
                })?;
            exemplar.id = node_id.clone();
            repository.order.push(node_id.clone());
            repository.exemplars.insert(node_id, exemplar);
        }
        Ok(repository)
    }

    pub fn get(&self, node_id: &str) -> Option<&Exemplar> {
        self.exemplars.get(node_id)
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.exemplars.contains_key(node_id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(|id| id.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Exemplar> {
        self.order.iter().filter_map(|id| self.exemplars.get(id))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const SAMPLE: &str = r#"{
        "trig-node-2": {
            "title": "Sine rule",
            "learningFocus": ["non-right triangles", "ambiguous case"],
            "section": "Trigonometry",
            "exemplarProblems": [
                {"problemText": "Find side a.", "correctAnswer": {"value": 7.2, "unit": "cm"}}
            ],
            "variationRules": {"contexts": ["surveying", "navigation"]},
            "mathTool": {"toolName": "generalTriangle"},
            "generationGuidelines": ["Use 3 s.f."]
        },
        "trig-node-1": {
            "title": "SOH CAH TOA",
            "learningFocus": [],
            "section": "Trigonometry",
            "exemplarProblems": [{"problemText": "Find angle x."}]
        }
    }"#;

    #[test]
    fn preserves_declaration_order() {
        let repository = ExemplarRepository::from_json_str(SAMPLE).unwrap();
        assert_eq!(
            repository.ids().collect::<Vec<_>>(),
            vec!["trig-node-2", "trig-node-1"]
        );
        assert_eq!(repository.len(), 2);

        let sine = repository.get("trig-node-2").unwrap();
        assert_eq!(sine.id, "trig-node-2");
        assert_eq!(sine.learning_focus.len(), 2);
        assert!(sine.exemplar_problems[0].correct_answer.is_some());

        let basic = repository.get("trig-node-1").unwrap();
        assert!(basic.math_tool.is_null());
        assert!(basic.exemplar_problems[0].correct_answer.is_none());
    }

    #[test]
    fn single_malformed_node_aborts_load() {
        let input = r#"{
            "ok": {"title": "Fine"},
            "broken": {"learningFocus": "not a list"}
        }"#;
        match ExemplarRepository::from_json_str(input) {
            Err(LoadError::InvalidNode { node_id, .. }) => assert_eq!(node_id, "broken"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn rejects_non_object_document() {
        assert!(matches!(
            ExemplarRepository::from_json_str("[1, 2]"),
            Err(LoadError::NotAnObject)
        ));
        assert!(matches!(
            ExemplarRepository::from_json_str("{"),
            Err(LoadError::Json(_))
        ));
    }

    #[test]
    fn load_reports_missing_file() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("missing.json");
        assert!(matches!(
            ExemplarRepository::load(&path),
            Err(LoadError::Io { .. })
        ));

        let present = temp.path().join("exemplars.json");
        fs::write(&present, SAMPLE).unwrap();
        assert_eq!(ExemplarRepository::load(&present).unwrap().len(), 2);
    }
}
