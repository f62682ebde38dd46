use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub const DEFAULT_LAYER: &str = "foundation";
pub const DEFAULT_DIFFICULTY: &str = "easy";
pub const PROBLEMS_REQUIRED: u32 = 5;

/// One practice item as returned by the provider. `id` and `question_group`
/// stay empty until the orchestrator accepts the item.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedQuestion {
    #[serde(default)]
    pub problem_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_intro: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub math_tool: Option<Value>,
    #[serde(default)]
    pub final_answer: Value,
    #[serde(default, deserialize_with = "lenient_steps")]
    pub step_by_step_guideline: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub question_group: String,
}

impl GeneratedQuestion {
    pub fn is_usable(&self) -> bool {
        !self.problem_text.trim().is_empty()
    }

    pub fn tool_name(&self) -> Option<&str> {
        self.math_tool
            .as_ref()
            .and_then(|tool| tool.get("toolName"))
            .and_then(Value::as_str)
            .filter(|name| !name.trim().is_empty())
    }

    pub fn assign_ids(&mut self, ordinal: usize, position: usize) {
        self.id = format!("q{ordinal}-{position}");
        self.question_group = format!("q{ordinal}");
    }
}

fn lenient_steps<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.into_iter().map(value_to_text).collect(),
        Some(other) => vec![value_to_text(other)],
    })
}

fn value_to_text(value: Value) -> String {
    match value {
        Value::String(text) => text,
        other => other.to_string(),
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeDescriptor {
    #[serde(default)]
    pub ai_generated_questions: bool,
    #[serde(default)]
    pub difficulty: String,
    #[serde(default)]
    pub math_tool: Option<String>,
    #[serde(default)]
    pub pre_written_questions: Vec<GeneratedQuestion>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeResult {
    pub id: String,
    #[serde(default)]
    pub node_number: usize,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub layer: String,
    #[serde(default)]
    pub problems_required: u32,
    #[serde(default)]
    pub prerequisites: Vec<String>,
    pub descriptor: NodeDescriptor,
}

impl NodeResult {
    pub fn new(
        node_id: impl Into<String>,
        ordinal: usize,
        title: impl Into<String>,
        questions: Vec<GeneratedQuestion>,
    ) -> Self {
        let math_tool = questions
            .first()
            .and_then(GeneratedQuestion::tool_name)
            .map(str::to_string);

        Self {
            id: node_id.into(),
            node_number: ordinal,
            title: title.into(),
            layer: DEFAULT_LAYER.to_string(),
            problems_required: PROBLEMS_REQUIRED,
            prerequisites: Vec::new(),
            descriptor: NodeDescriptor {
                ai_generated_questions: true,
                difficulty: DEFAULT_DIFFICULTY.to_string(),
                math_tool,
                pre_written_questions: questions,
            },
        }
    }

    pub fn questions(&self) -> &[GeneratedQuestion] {
        &self.descriptor.pre_written_questions
    }

    pub fn problem_texts(&self) -> impl Iterator<Item = &str> {
        self.questions()
            .iter()
            .map(|question| question.problem_text.as_str())
            .filter(|text| !text.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lenient_parsing_of_provider_item() {
        let question: GeneratedQuestion = serde_json::from_value(json!({
            "problemText": "A ladder leans against a wall...",
            "mathTool": {"toolName": "elevationDepression", "parameters": {"angle": 35}},
            "finalAnswer": 4.1,
            "stepByStepGuideline": ["Step 1: draw", 2]
        }))
        .unwrap();

        assert!(question.is_usable());
        assert_eq!(question.tool_name(), Some("elevationDepression"));
        assert_eq!(question.step_by_step_guideline, vec!["Step 1: draw", "2"]);
        assert!(question.id.is_empty());
    }

    #[test]
    fn node_takes_tool_name_from_first_question() {
        let mut first = GeneratedQuestion {
            problem_text: "first".into(),
            math_tool: Some(json!({"toolName": "unitCircle"})),
            ..GeneratedQuestion::default()
        };
        first.assign_ids(2, 1);
        let node = NodeResult::new("trig-node-2", 2, "Unit circle", vec![first]);

        assert_eq!(node.descriptor.math_tool.as_deref(), Some("unitCircle"));
        assert!(node.descriptor.ai_generated_questions);
        assert_eq!(node.layer, "foundation");
        assert_eq!(node.problems_required, 5);
        assert_eq!(node.questions()[0].id, "q2-1");
        assert_eq!(node.questions()[0].question_group, "q2");
    }

    #[test]
    fn missing_tool_leaves_descriptor_empty() {
        let node = NodeResult::new(
            "n",
            1,
            "t",
            vec![GeneratedQuestion {
                problem_text: "p".into(),
                math_tool: Some(json!("not an object")),
                ..GeneratedQuestion::default()
            }],
        );
        assert_eq!(node.descriptor.math_tool, None);
    }
}
