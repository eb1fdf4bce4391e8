use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use tavern_core::tool::{Error as ToolError, Tool, ToolResult};

use super::skill::Skill;

const MAX_CHOICES: usize = 6;

#[derive(Deserialize, JsonSchema)]
pub struct Choice {
    #[schemars(description = "What the player could do, in one sentence.")]
    action: String,
    #[schemars(description = "The skill this action would be checked against, if any.")]
    #[serde(default)]
    skill: Option<String>,
}

#[derive(Deserialize, JsonSchema)]
pub struct SuggestChoicesParameters {
    #[schemars(description = "A short description of the situation the player is in.")]
    situation: String,
    #[schemars(description = "One to six options for the player.")]
    choices: Vec<Choice>,
}

/// A tool that presents the player with numbered options.
///
/// Its output is shown to the player verbatim and ends the agent's turn.
pub struct SuggestChoicesTool {
    parameter_schema: Value,
}

impl SuggestChoicesTool {
    /// Creates a new choice suggestion tool.
    #[inline]
    pub fn new() -> Self {
        Self {
            parameter_schema: super::parameter_schema::<SuggestChoicesParameters>(),
        }
    }
}

impl Default for SuggestChoicesTool {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

fn format_choices(input: &SuggestChoicesParameters) -> ToolResult {
    if input.choices.is_empty() || input.choices.len() > MAX_CHOICES {
        return Err(ToolError::invalid_input().with_reason(format!(
            "offer between 1 and {MAX_CHOICES} choices, got {}",
            input.choices.len()
        )));
    }

    let mut output = String::new();
    let situation = input.situation.trim();
    if !situation.is_empty() {
        output.push_str(situation);
        output.push_str("\n\n");
    }
    output.push_str("What do you do?");
    for (idx, choice) in input.choices.iter().enumerate() {
        let action = choice.action.trim();
        if action.is_empty() {
            return Err(ToolError::invalid_input()
                .with_reason(format!("choice {} has no action", idx + 1)));
        }
        output.push_str(&format!("\n{}. {action}", idx + 1));
        let skill = choice.skill.as_deref().map(str::trim).unwrap_or_default();
        if !skill.is_empty() {
            // Unknown skills are shown as given.
            let skill = Skill::parse(skill).map(|s| s.name()).unwrap_or(skill);
            output.push_str(&format!(" ({skill})"));
        }
    }
    Ok(output)
}

impl Tool for SuggestChoicesTool {
    type Input = SuggestChoicesParameters;

    fn name(&self) -> &str {
        "suggest_choices"
    }

    fn description(&self) -> &str {
        r#"
Presents the player with a numbered list of possible actions, each optionally tied to a skill check.
Use it when the player asks what they can do. The list is shown to the player as is."#
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    fn return_direct(&self) -> bool {
        true
    }

    fn execute(
        &self,
        input: Self::Input,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        std::future::ready(format_choices(&input))
    }
}
