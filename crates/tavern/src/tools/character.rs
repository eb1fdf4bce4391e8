use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use tavern_core::tool::{Error as ToolError, Tool, ToolResult};

use super::dice::{DiceRoller, signed};
use super::skill::normalize;

/// Playable races.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Race {
    Human,
    Elf,
    Dwarf,
    Halfling,
    HalfOrc,
    HalfElf,
    Tiefling,
    Gnome,
    Dragonborn,
}

impl Race {
    /// All races.
    pub const ALL: [Race; 9] = [
        Race::Human,
        Race::Elf,
        Race::Dwarf,
        Race::Halfling,
        Race::HalfOrc,
        Race::HalfElf,
        Race::Tiefling,
        Race::Gnome,
        Race::Dragonborn,
    ];

    /// Returns the display name, e.g. `Half-Orc`.
    pub fn name(&self) -> &'static str {
        match self {
            Race::Human => "Human",
            Race::Elf => "Elf",
            Race::Dwarf => "Dwarf",
            Race::Halfling => "Halfling",
            Race::HalfOrc => "Half-Orc",
            Race::HalfElf => "Half-Elf",
            Race::Tiefling => "Tiefling",
            Race::Gnome => "Gnome",
            Race::Dragonborn => "Dragonborn",
        }
    }

    /// Looks a race up by name, ignoring case, spaces, `_` and `-`.
    pub fn parse(name: &str) -> Option<Race> {
        let wanted = normalize(name);
        Self::ALL
            .into_iter()
            .find(|race| normalize(race.name()) == wanted)
    }
}

/// Character classes.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Class {
    Barbarian,
    Bard,
    Cleric,
    Druid,
    Fighter,
    Monk,
    Paladin,
    Ranger,
    Rogue,
    Sorcerer,
    Warlock,
    Wizard,
}

impl Class {
    /// All classes.
    pub const ALL: [Class; 12] = [
        Class::Barbarian,
        Class::Bard,
        Class::Cleric,
        Class::Druid,
        Class::Fighter,
        Class::Monk,
        Class::Paladin,
        Class::Ranger,
        Class::Rogue,
        Class::Sorcerer,
        Class::Warlock,
        Class::Wizard,
    ];

    /// Returns the display name.
    pub fn name(&self) -> &'static str {
        match self {
            Class::Barbarian => "Barbarian",
            Class::Bard => "Bard",
            Class::Cleric => "Cleric",
            Class::Druid => "Druid",
            Class::Fighter => "Fighter",
            Class::Monk => "Monk",
            Class::Paladin => "Paladin",
            Class::Ranger => "Ranger",
            Class::Rogue => "Rogue",
            Class::Sorcerer => "Sorcerer",
            Class::Warlock => "Warlock",
            Class::Wizard => "Wizard",
        }
    }

    /// Returns the number of faces of the class's hit die.
    pub fn hit_die(&self) -> u32 {
        match self {
            Class::Barbarian => 12,
            Class::Fighter | Class::Paladin | Class::Ranger => 10,
            Class::Bard
            | Class::Cleric
            | Class::Druid
            | Class::Monk
            | Class::Rogue
            | Class::Warlock => 8,
            Class::Sorcerer | Class::Wizard => 6,
        }
    }

    /// Looks a class up by name, ignoring case, spaces, `_` and `-`.
    pub fn parse(name: &str) -> Option<Class> {
        let wanted = normalize(name);
        Self::ALL
            .into_iter()
            .find(|class| normalize(class.name()) == wanted)
    }
}

const ABILITIES: [&str; 6] = ["STR", "DEX", "CON", "INT", "WIS", "CHA"];
const CON: usize = 2;

fn modifier(score: u32) -> i32 {
    (score as i32 - 10).div_euclid(2)
}

#[derive(Deserialize, JsonSchema)]
pub struct CreateCharacterParameters {
    #[schemars(description = "The character's name.")]
    name: String,
    #[schemars(description = "The race, e.g. \"Dwarf\" or \"Half-Elf\". Picked at random when omitted.")]
    #[serde(default)]
    race: Option<String>,
    #[schemars(description = "The class, e.g. \"Rogue\" or \"Wizard\". Picked at random when omitted.")]
    #[serde(default)]
    class: Option<String>,
}

/// A tool that rolls up a level 1 character.
pub struct CreateCharacterTool {
    parameter_schema: Value,
    roller: DiceRoller,
}

impl CreateCharacterTool {
    /// Creates a new character creation tool using `roller`.
    #[inline]
    pub fn new(roller: DiceRoller) -> Self {
        Self {
            parameter_schema: super::parameter_schema::<CreateCharacterParameters>(),
            roller,
        }
    }

    fn pick<T: Copy>(&self, all: &[T]) -> T {
        all[self.roller.roll(all.len() as u32) as usize - 1]
    }

    /// Rolls 4d6 and drops the lowest die.
    fn roll_ability(&self) -> u32 {
        let mut rolls = [0; 4].map(|_| self.roller.roll(6));
        rolls.sort_unstable();
        rolls[1..].iter().sum()
    }

    fn create(&self, input: &CreateCharacterParameters) -> ToolResult {
        let name = input.name.trim();
        if name.is_empty() {
            return Err(ToolError::invalid_input().with_reason("the character needs a name"));
        }
        let race = match input.race.as_deref().map(str::trim) {
            None | Some("") => self.pick(&Race::ALL),
            Some(race) => Race::parse(race).ok_or_else(|| {
                let known: Vec<_> = Race::ALL.iter().map(Race::name).collect();
                ToolError::invalid_input().with_reason(format!(
                    "unknown race {race:?}, expected one of: {}",
                    known.join(", ")
                ))
            })?,
        };
        let class = match input.class.as_deref().map(str::trim) {
            None | Some("") => self.pick(&Class::ALL),
            Some(class) => Class::parse(class).ok_or_else(|| {
                let known: Vec<_> = Class::ALL.iter().map(Class::name).collect();
                ToolError::invalid_input().with_reason(format!(
                    "unknown class {class:?}, expected one of: {}",
                    known.join(", ")
                ))
            })?,
        };

        let scores = ABILITIES.map(|_| self.roll_ability());
        let hit_points = (class.hit_die() as i32 + modifier(scores[CON])).max(1);

        let mut sheet = format!(
            "{name}, a level 1 {} {}\nHit points: {hit_points} (d{} hit die)\n",
            race.name(),
            class.name(),
            class.hit_die()
        );
        let abilities: Vec<_> = ABILITIES
            .iter()
            .zip(scores)
            .map(|(ability, score)| {
                let m = match modifier(score) {
                    0 => "+0".to_owned(),
                    m => signed(m, ""),
                };
                format!("{ability} {score} ({m})")
            })
            .collect();
        sheet.push_str(&abilities.join(", "));
        sheet.push_str("\nAbility scores were rolled with 4d6, dropping the lowest die.");
        Ok(sheet)
    }
}

impl Default for CreateCharacterTool {
    #[inline]
    fn default() -> Self {
        Self::new(DiceRoller::default())
    }
}

impl Tool for CreateCharacterTool {
    type Input = CreateCharacterParameters;

    fn name(&self) -> &str {
        "create_character"
    }

    fn description(&self) -> &str {
        r#"
Creates a level 1 character with rolled ability scores, hit points, a race and a class.
Describe the resulting character to the player in your own words."#
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    fn execute(
        &self,
        input: Self::Input,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        std::future::ready(self.create(&input))
    }
}
