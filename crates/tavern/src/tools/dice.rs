use std::sync::{Arc, Mutex, PoisonError};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use tavern_core::tool::{Error as ToolError, Tool, ToolResult};

const MIN_SIDES: u32 = 2;
const MAX_SIDES: u32 = 1000;
const MAX_COUNT: u32 = 100;

/// The source of randomness shared by the dice tools.
///
/// Production code rolls with the thread-local RNG. Tests seed one so
/// results are reproducible.
#[derive(Clone, Debug, Default)]
pub enum DiceRoller {
    /// Rolls with [`rand::thread_rng`].
    #[default]
    Thread,
    /// Rolls with a shared, seeded RNG.
    Seeded(Arc<Mutex<StdRng>>),
}

impl DiceRoller {
    /// Creates a seeded roller.
    #[inline]
    pub fn seeded(seed: u64) -> Self {
        Self::Seeded(Arc::new(Mutex::new(StdRng::seed_from_u64(seed))))
    }

    /// Rolls one die with `sides` faces.
    pub fn roll(&self, sides: u32) -> u32 {
        match self {
            DiceRoller::Thread => rand::thread_rng().gen_range(1..=sides),
            DiceRoller::Seeded(rng) => rng
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .gen_range(1..=sides),
        }
    }
}

fn default_count() -> u32 {
    1
}

#[derive(Deserialize, JsonSchema)]
pub struct RollDiceParameters {
    #[schemars(description = "Number of faces on each die, from 2 to 1000.")]
    sides: u32,
    #[schemars(description = "How many dice to roll, from 1 to 100. Defaults to 1.")]
    #[serde(default = "default_count")]
    count: u32,
    #[schemars(description = "A flat bonus (or penalty) added to the sum. Defaults to 0.")]
    #[serde(default)]
    modifier: i32,
}

/// A tool for rolling any number of dice of any size.
pub struct RollDiceTool {
    parameter_schema: Value,
    roller: DiceRoller,
}

impl RollDiceTool {
    /// Creates a new dice tool using `roller`.
    #[inline]
    pub fn new(roller: DiceRoller) -> Self {
        Self {
            parameter_schema: super::parameter_schema::<RollDiceParameters>(),
            roller,
        }
    }

    fn roll(&self, input: &RollDiceParameters) -> ToolResult {
        if !(MIN_SIDES..=MAX_SIDES).contains(&input.sides) {
            return Err(ToolError::invalid_input().with_reason(format!(
                "a die must have between {MIN_SIDES} and {MAX_SIDES} sides, got {}",
                input.sides
            )));
        }
        if !(1..=MAX_COUNT).contains(&input.count) {
            return Err(ToolError::invalid_input().with_reason(format!(
                "can roll between 1 and {MAX_COUNT} dice, got {}",
                input.count
            )));
        }

        let rolls: Vec<u32> =
            (0..input.count).map(|_| self.roller.roll(input.sides)).collect();
        let sum: i64 = rolls.iter().map(|&r| i64::from(r)).sum();
        let total = sum + i64::from(input.modifier);
        let notation = format!(
            "{}d{}{}",
            input.count,
            input.sides,
            signed(input.modifier, "")
        );
        Ok(format!(
            "Rolled {notation}: {rolls:?}{} = {total}",
            signed(input.modifier, " ")
        ))
    }
}

impl Default for RollDiceTool {
    #[inline]
    fn default() -> Self {
        Self::new(DiceRoller::default())
    }
}

/// Formats a non-zero modifier as `+2` or `- 2`, with `sep` after the sign.
pub(super) fn signed(modifier: i32, sep: &str) -> String {
    match modifier {
        0 => String::new(),
        m if m > 0 => format!("{sep}+{sep}{m}"),
        m => format!("{sep}-{sep}{}", m.unsigned_abs()),
    }
}

impl Tool for RollDiceTool {
    type Input = RollDiceParameters;

    fn name(&self) -> &str {
        "roll_a_dice"
    }

    fn description(&self) -> &str {
        r#"
Rolls one or more dice with any number of faces and adds an optional modifier.
Use it whenever the outcome of an action depends on chance, e.g. damage rolls."#
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    fn execute(
        &self,
        input: Self::Input,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        let result = self.roll(&input);
        trace!("dice result: {result:?}");
        std::future::ready(result)
    }
}
