//! The game-master tools the agent can call.

mod character;
mod choices;
mod dice;
mod module;
mod search;
mod skill;

use schemars::{JsonSchema, schema_for};
use serde_json::Value;

pub use character::{Class, CreateCharacterTool, Race};
pub use choices::SuggestChoicesTool;
pub use dice::{DiceRoller, RollDiceTool};
pub use module::ConsultModuleTool;
pub use search::SearchTool;
pub use skill::{Advantage, RollSkillTool, Skill};

/// Generates the parameter schema of `T`, without the meta-schema URI
/// which some OpenAI-compatible servers reject.
fn parameter_schema<T: JsonSchema>() -> Value {
    let mut schema = schema_for!(T).to_value();
    if let Some(object) = schema.as_object_mut() {
        object.remove("$schema");
    }
    schema
}
