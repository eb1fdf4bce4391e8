use std::fmt::{self, Display};

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use tavern_core::tool::{Error as ToolError, Tool, ToolResult};

use super::dice::{DiceRoller, signed};

/// The eighteen skills of the fifth edition rules.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Skill {
    Athletics,
    Acrobatics,
    SleightOfHand,
    Stealth,
    Arcana,
    History,
    Investigation,
    Nature,
    Religion,
    AnimalHandling,
    Insight,
    Medicine,
    Perception,
    Survival,
    Deception,
    Intimidation,
    Performance,
    Persuasion,
}

impl Skill {
    /// All skills, in the order of the rulebook's skill list.
    pub const ALL: [Skill; 18] = [
        Skill::Athletics,
        Skill::Acrobatics,
        Skill::SleightOfHand,
        Skill::Stealth,
        Skill::Arcana,
        Skill::History,
        Skill::Investigation,
        Skill::Nature,
        Skill::Religion,
        Skill::AnimalHandling,
        Skill::Insight,
        Skill::Medicine,
        Skill::Perception,
        Skill::Survival,
        Skill::Deception,
        Skill::Intimidation,
        Skill::Performance,
        Skill::Persuasion,
    ];

    /// Returns the display name, e.g. `Sleight of Hand`.
    pub fn name(&self) -> &'static str {
        match self {
            Skill::Athletics => "Athletics",
            Skill::Acrobatics => "Acrobatics",
            Skill::SleightOfHand => "Sleight of Hand",
            Skill::Stealth => "Stealth",
            Skill::Arcana => "Arcana",
            Skill::History => "History",
            Skill::Investigation => "Investigation",
            Skill::Nature => "Nature",
            Skill::Religion => "Religion",
            Skill::AnimalHandling => "Animal Handling",
            Skill::Insight => "Insight",
            Skill::Medicine => "Medicine",
            Skill::Perception => "Perception",
            Skill::Survival => "Survival",
            Skill::Deception => "Deception",
            Skill::Intimidation => "Intimidation",
            Skill::Performance => "Performance",
            Skill::Persuasion => "Persuasion",
        }
    }

    /// Looks a skill up by name, ignoring case, spaces, `_` and `-`.
    pub fn parse(name: &str) -> Option<Skill> {
        let wanted = normalize(name);
        Self::ALL
            .into_iter()
            .find(|skill| normalize(skill.name()) == wanted)
    }
}

impl Display for Skill {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub(super) fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}

/// Whether a d20 is rolled once or twice.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Advantage {
    /// One d20.
    #[default]
    Normal,
    /// Two d20s, keep the higher.
    Advantage,
    /// Two d20s, keep the lower.
    Disadvantage,
}

fn default_difficulty_class() -> i32 {
    10
}

#[derive(Deserialize, JsonSchema)]
pub struct RollSkillParameters {
    #[schemars(description = "The skill to check, e.g. \"Stealth\" or \"Sleight of Hand\".")]
    skill: String,
    #[schemars(description = "The character's bonus for this skill, from -100 to 100. Defaults to 0.")]
    #[serde(default)]
    modifier: i32,
    #[schemars(description = "The difficulty class to beat. Defaults to 10.")]
    #[serde(default = "default_difficulty_class")]
    difficulty_class: i32,
    #[schemars(description = "Roll with advantage or disadvantage. Defaults to normal.")]
    #[serde(default)]
    advantage: Advantage,
}

const MAX_MODIFIER: i32 = 100;

/// A tool for making skill checks against a difficulty class.
pub struct RollSkillTool {
    parameter_schema: Value,
    roller: DiceRoller,
}

impl RollSkillTool {
    /// Creates a new skill check tool using `roller`.
    #[inline]
    pub fn new(roller: DiceRoller) -> Self {
        Self {
            parameter_schema: super::parameter_schema::<RollSkillParameters>(),
            roller,
        }
    }

    fn check(&self, input: &RollSkillParameters) -> ToolResult {
        let Some(skill) = Skill::parse(&input.skill) else {
            let known: Vec<_> = Skill::ALL.iter().map(Skill::name).collect();
            return Err(ToolError::invalid_input().with_reason(format!(
                "unknown skill {:?}, expected one of: {}",
                input.skill,
                known.join(", ")
            )));
        };

        if !(-MAX_MODIFIER..=MAX_MODIFIER).contains(&input.modifier) {
            return Err(ToolError::invalid_input().with_reason(format!(
                "a skill modifier must be between -{MAX_MODIFIER} and {MAX_MODIFIER}, got {}",
                input.modifier
            )));
        }

        let first = self.roller.roll(20);
        let (natural, rolled) = match input.advantage {
            Advantage::Normal => (first, first.to_string()),
            advantage => {
                let second = self.roller.roll(20);
                let kept = if advantage == Advantage::Advantage {
                    first.max(second)
                } else {
                    first.min(second)
                };
                (kept, format!("{kept} (from {first} and {second})"))
            }
        };
        let total = i64::from(natural) + i64::from(input.modifier);
        let verdict = match natural {
            20 => "Natural 20, success!",
            1 => "Natural 1, failure!",
            _ if total >= i64::from(input.difficulty_class) => "Success!",
            _ => "Failure.",
        };

        Ok(format!(
            "{skill} check against DC {}: rolled {rolled}{} = {total}. {verdict}",
            input.difficulty_class,
            signed(input.modifier, " ")
        ))
    }
}

impl Default for RollSkillTool {
    #[inline]
    fn default() -> Self {
        Self::new(DiceRoller::default())
    }
}

impl Tool for RollSkillTool {
    type Input = RollSkillParameters;

    fn name(&self) -> &str {
        "roll_a_skill"
    }

    fn description(&self) -> &str {
        r#"
Makes a skill check: rolls a d20, adds the modifier and compares the total with the difficulty class.
A natural 20 always succeeds and a natural 1 always fails."#
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    fn execute(
        &self,
        input: Self::Input,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        std::future::ready(self.check(&input))
    }
}
