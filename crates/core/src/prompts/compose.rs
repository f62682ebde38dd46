use serde_json::Value;

use super::{PromptError, PromptRegistry};
use crate::exemplar::Exemplar;

pub const BATCH_GENERATION_KEY: &str = "batch_generation";
pub const ANTI_REPETITION_KEY: &str = "anti_repetition";
pub const MAX_RECENT_QUESTIONS: usize = 20;
pub const MAX_RECENT_QUESTION_CHARS: usize = 200;

/// Builds the request text for one node. Output depends only on the inputs
/// and the loaded templates.
#[derive(Debug)]
pub struct PromptComposer {
    registry: PromptRegistry,
    audience: String,
}

impl PromptComposer {
    pub fn new(registry: PromptRegistry, audience: impl Into<String>) -> Self {
        Self {
            registry,
            audience: audience.into(),
        }
    }

    pub fn registry(&self) -> &PromptRegistry {
        &self.registry
    }

    pub fn audience(&self) -> &str {
        &self.audience
    }

    pub fn compose(
        &self,
        exemplar: &Exemplar,
        count: usize,
        ordinal: usize,
        recent_question_texts: &[String],
    ) -> Result<String, PromptError> {
        let anti_repetition = self.anti_repetition_block(recent_question_texts)?;

        self.registry.render(
            BATCH_GENERATION_KEY,
            &[
                ("count", count.to_string()),
                ("audience", self.audience.clone()),
                ("node_number", ordinal.to_string()),
                ("title", exemplar.title.clone()),
                ("learning_focus", exemplar.learning_focus.join(", ")),
                ("section", exemplar.section.clone()),
                ("exemplar_problems", format_exemplar_problems(exemplar)),
                ("variation_rules", pretty_json(&exemplar.variation_rules)),
                ("math_tool", pretty_json(&exemplar.math_tool)),
                ("guidelines", format_guidelines(&exemplar.generation_guidelines)),
                ("anti_repetition", anti_repetition),
            ],
        )
    }

    fn anti_repetition_block(&self, recent: &[String]) -> Result<String, PromptError> {
        if recent.is_empty() {
            return Ok(String::new());
        }

        let window = &recent[recent.len().saturating_sub(MAX_RECENT_QUESTIONS)..];
        let mut listing = String::new();
        for (index, text) in window.iter().enumerate() {
            listing.push_str(&format!("{}. {}\n\n", index + 1, truncate_question(text)));
        }

        self.registry.render(
            ANTI_REPETITION_KEY,
            &[
                ("recent_count", window.len().to_string()),
                ("recent_questions", listing),
            ],
        )
    }
}

/// Caps a problem text at [`MAX_RECENT_QUESTION_CHARS`] characters, marking
/// the cut with `...`.
pub fn truncate_question(text: &str) -> String {
    match text.char_indices().nth(MAX_RECENT_QUESTION_CHARS) {
        Some((byte_index, _)) => format!("{}...", &text[..byte_index]),
        None => text.to_string(),
    }
}

fn format_exemplar_problems(exemplar: &Exemplar) -> String {
    let mut output = String::new();
    for problem in &exemplar.exemplar_problems {
        output.push_str(&format!("\nProblem: {}\n", problem.problem_text));
        if let Some(answer) = &problem.correct_answer {
            output.push_str(&format!("Answer: {}\n", pretty_json(answer)));
        }
    }
    output
}

fn format_guidelines(guidelines: &[String]) -> String {
    guidelines
        .iter()
        .map(|line| format!("- {line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn pretty_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exemplar::ExemplarRepository;

    fn composer() -> PromptComposer {
        PromptComposer::new(PromptRegistry::new().unwrap(), "Secondary 3 students")
    }

    fn exemplar() -> Exemplar {
        let repository = ExemplarRepository::from_json_str(
            r#"{
                "trig-node-4": {
                    "title": "Angles of elevation",
                    "learningFocus": ["elevation", "depression"],
                    "section": "Trigonometry",
                    "exemplarProblems": [
                        {"problemText": "A kite string is 40 m long.", "correctAnswer": {"value": 25.7}},
                        {"problemText": "From a cliff 80 m high..."}
                    ],
                    "variationRules": {"zeta": ["z"], "alpha": ["a", "b"]},
                    "mathTool": {"toolName": "elevationDepression"},
                    "generationGuidelines": ["Round to 3 s.f.", "Use metres"]
                }
            }"#,
        )
        .unwrap();
        repository.get("trig-node-4").unwrap().clone()
    }

    #[test]
    fn includes_node_sections_in_order() {
        let prompt = composer().compose(&exemplar(), 5, 4, &[]).unwrap();

        assert!(prompt.contains("You are generating 5 diverse practice problems for Secondary 3 students"));
        assert!(prompt.contains("**Node Number**: 4"));
        assert!(prompt.contains("**Learning Focus**: elevation, depression"));
        assert!(prompt.contains("Problem: A kite string is 40 m long."));
        assert!(prompt.contains("\"value\": 25.7"));
        assert!(prompt.contains("- Round to 3 s.f.\n- Use metres"));
        assert!(prompt.contains("exactly 5 questions"));
        assert!(!prompt.contains("ANTI-REPETITION"));

        let order = [
            "# NODE INFORMATION",
            "# EXEMPLAR PROBLEMS",
            "# VARIATION RULES",
            "# MATHTOOL SPECIFICATION",
            "# GENERATION GUIDELINES",
            "# REQUIRED OUTPUT FORMAT",
        ];
        let positions: Vec<usize> = order.iter().map(|h| prompt.find(h).unwrap()).collect();
        assert!(positions.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn variation_rules_keep_declared_key_order() {
        let prompt = composer().compose(&exemplar(), 5, 1, &[]).unwrap();
        assert!(prompt.find("\"zeta\"").unwrap() < prompt.find("\"alpha\"").unwrap());
    }

    #[test]
    fn window_keeps_most_recent_twenty() {
        let recent: Vec<String> = (1..=25).map(|i| format!("prior question {i:02}")).collect();
        let prompt = composer().compose(&exemplar(), 5, 9, &recent).unwrap();

        assert!(prompt.contains("The following 20 questions"));
        for i in 1..=5 {
            assert!(!prompt.contains(&format!("prior question {i:02}")));
        }
        for i in 6..=25 {
            assert!(prompt.contains(&format!("prior question {i:02}")));
        }
        assert!(prompt.contains("1. prior question 06\n"));
        assert!(prompt.contains("20. prior question 25\n"));
        assert!(prompt.find("prior question 06").unwrap() < prompt.find("prior question 25").unwrap());
    }

    #[test]
    fn long_entries_are_truncated() {
        let long = "x".repeat(250);
        let prompt = composer()
            .compose(&exemplar(), 5, 2, &[long.clone()])
            .unwrap();
        assert!(prompt.contains(&format!("1. {}...", "x".repeat(200))));
        assert!(!prompt.contains(&"x".repeat(201)));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let text = "é".repeat(201);
        let truncated = truncate_question(&text);
        assert_eq!(truncated.chars().count(), 203);
        assert!(truncated.ends_with("..."));
        assert_eq!(truncate_question("short"), "short");
        assert_eq!(truncate_question(&"y".repeat(200)), "y".repeat(200));
    }

    #[test]
    fn compose_is_deterministic() {
        let composer = composer();
        let recent = vec!["one".to_string(), "two".to_string()];
        let first = composer.compose(&exemplar(), 3, 2, &recent).unwrap();
        let second = composer.compose(&exemplar(), 3, 2, &recent).unwrap();
        assert_eq!(first, second);
    }
}
