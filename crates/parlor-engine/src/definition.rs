//! Immutable per-game configuration and the built-in catalog.
//!
//! A [`GameDefinition`] is published once and never mutated; each room
//! takes an owned copy at init so a later catalog edit can't change a
//! game in flight.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// The closed set of engine kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameKind {
    PromptGuess,
    AiJudge,
    GroupThink,
    Mitm,
    Quip,
}

impl GameKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::PromptGuess => "PromptGuess",
            Self::AiJudge => "AiJudge",
            Self::GroupThink => "GroupThink",
            Self::Mitm => "Mitm",
            Self::Quip => "Quip",
        }
    }
}

/// Model parameters, tagged by the kind of runner that serves them.
///
/// The exact provider wire formats are out of scope — these are the
/// parameters the dispatcher hands to whichever runner is registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ModelConfig {
    #[serde(rename_all = "camelCase")]
    TextCompletion {
        model: String,
        temperature: f64,
        max_tokens: u32,
        stop: Option<Vec<String>>,
    },
    #[serde(rename_all = "camelCase")]
    ChatCompletion {
        model: String,
        temperature: f64,
        /// Optional response schema: a map of required field name →
        /// expected JSON type ("number" | "string" | "boolean").
        schema: Option<serde_json::Value>,
    },
    #[serde(rename_all = "camelCase")]
    ImageDiffusion {
        model: String,
        steps: u32,
        guidance: f64,
    },
    #[serde(rename_all = "camelCase")]
    ImageDirect { model: String },
}

/// A prompt template. `{}` in `body` is replaced with the player's input
/// when the generation record is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub id: String,
    /// Shown to players when picking a template.
    pub display: String,
    pub body: String,
}

impl Template {
    /// Substitutes the player's input into the template body.
    pub fn apply(&self, input: &str) -> String {
        self.body.replace("{}", input)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Image,
}

/// Intro media shown during the Intro phase, if the game has one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntroMedia {
    pub url: String,
    pub kind: MediaKind,
}

/// Which entitlement tier may create rooms for this game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessTier {
    Free,
    Member,
}

/// Immutable configuration for one game in the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameDefinition {
    /// Catalog key, referenced by `RoomCreationRequest::game_id`.
    pub game_id: String,
    pub kind: GameKind,
    pub name: String,
    pub model: ModelConfig,
    pub templates: Option<BTreeMap<String, Template>>,
    pub intro: Option<IntroMedia>,
    pub tier: AccessTier,
    pub max_round: u32,
}

impl GameDefinition {
    /// Looks up a template by id.
    pub fn template(&self, id: &str) -> Option<&Template> {
        self.templates.as_ref().and_then(|t| t.get(id))
    }
}

fn template(id: &str, display: &str, body: &str) -> (String, Template) {
    (
        id.to_string(),
        Template {
            id: id.to_string(),
            display: display.to_string(),
            body: body.to_string(),
        },
    )
}

/// The built-in game catalog.
///
/// Three PromptGuess entries share one engine and differ only in model
/// and template set; the remaining four kinds have one entry each.
pub fn catalog() -> Vec<GameDefinition> {
    vec![
        GameDefinition {
            game_id: "portrait".into(),
            kind: GameKind::PromptGuess,
            name: "Portrait Parlor".into(),
            model: ModelConfig::ImageDiffusion {
                model: "stable-diffusion-xl".into(),
                steps: 30,
                guidance: 7.5,
            },
            templates: Some(BTreeMap::from([
                template("painting", "A painting of...", "An oil painting of {}"),
                template("photo", "A photo of...", "A photograph of {}"),
                template("sketch", "A sketch of...", "A pencil sketch of {}"),
            ])),
            intro: Some(IntroMedia {
                url: "https://media.parlor.example/intro/portrait.mp4".into(),
                kind: MediaKind::Video,
            }),
            tier: AccessTier::Free,
            max_round: 3,
        },
        GameDefinition {
            game_id: "listicle".into(),
            kind: GameKind::PromptGuess,
            name: "Listicle".into(),
            model: ModelConfig::TextCompletion {
                model: "text-curio-002".into(),
                temperature: 0.9,
                max_tokens: 120,
                stop: Some(vec!["\n\n".into()]),
            },
            templates: Some(BTreeMap::from([template(
                "top5",
                "Top 5 list about...",
                "Top 5 {}:\n1.",
            )])),
            intro: None,
            tier: AccessTier::Free,
            max_round: 3,
        },
        GameDefinition {
            game_id: "glyphs".into(),
            kind: GameKind::PromptGuess,
            name: "Three Glyphs".into(),
            model: ModelConfig::TextCompletion {
                model: "text-curio-002".into(),
                temperature: 0.7,
                max_tokens: 16,
                stop: Some(vec!["\n".into()]),
            },
            templates: Some(BTreeMap::from([template(
                "emoji",
                "Exactly three emoji for...",
                "Describe \"{}\" using exactly three emoji:",
            )])),
            intro: None,
            tier: AccessTier::Free,
            max_round: 3,
        },
        GameDefinition {
            game_id: "judge".into(),
            kind: GameKind::AiJudge,
            name: "The Judge".into(),
            model: ModelConfig::ChatCompletion {
                model: "chat-curio-003".into(),
                temperature: 0.2,
                schema: None,
            },
            templates: None,
            intro: Some(IntroMedia {
                url: "https://media.parlor.example/intro/judge.mp4".into(),
                kind: MediaKind::Video,
            }),
            tier: AccessTier::Free,
            max_round: 3,
        },
        GameDefinition {
            game_id: "groupthink".into(),
            kind: GameKind::GroupThink,
            name: "Groupthink".into(),
            model: ModelConfig::ImageDiffusion {
                model: "stable-diffusion-xl".into(),
                steps: 25,
                guidance: 7.0,
            },
            templates: None,
            intro: None,
            tier: AccessTier::Member,
            max_round: 3,
        },
        GameDefinition {
            game_id: "mitm".into(),
            kind: GameKind::Mitm,
            name: "Person or Machine".into(),
            model: ModelConfig::ChatCompletion {
                model: "chat-curio-003".into(),
                temperature: 0.8,
                schema: None,
            },
            templates: None,
            intro: None,
            tier: AccessTier::Member,
            max_round: 1,
        },
        GameDefinition {
            game_id: "quip".into(),
            kind: GameKind::Quip,
            name: "Quip Duel".into(),
            model: ModelConfig::ChatCompletion {
                model: "chat-curio-003".into(),
                temperature: 0.4,
                schema: Some(serde_json::json!({
                    "score": "number",
                    "comment": "string",
                })),
            },
            templates: None,
            intro: None,
            tier: AccessTier::Free,
            max_round: 2,
        },
    ]
}

/// Finds a catalog entry by game id.
///
/// # Errors
/// Returns [`EngineError::UnknownGame`](crate::EngineError::UnknownGame)
/// if no entry matches.
pub fn find_definition(game_id: &str) -> Result<GameDefinition, crate::EngineError> {
    catalog()
        .into_iter()
        .find(|d| d.game_id == game_id)
        .ok_or_else(|| crate::EngineError::UnknownGame(game_id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_ids_are_unique() {
        let defs = catalog();
        let mut ids: Vec<_> = defs.iter().map(|d| d.game_id.clone()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), defs.len());
    }

    #[test]
    fn test_find_definition_unknown_id_fails() {
        assert!(find_definition("no-such-game").is_err());
    }

    #[test]
    fn test_template_apply_substitutes_input() {
        let def = find_definition("portrait").unwrap();
        let t = def.template("painting").unwrap();
        assert_eq!(t.apply("a sad robot"), "An oil painting of a sad robot");
    }

    #[test]
    fn test_model_config_tagged_json() {
        let def = find_definition("portrait").unwrap();
        let json = serde_json::to_value(&def.model).unwrap();
        assert_eq!(json["kind"], "imageDiffusion");
        assert_eq!(json["steps"], 30);
    }
}
