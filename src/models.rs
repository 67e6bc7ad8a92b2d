//! Model flags and the static table that maps them to provider models.

use crossterm::style::Color;
use serde::{Deserialize, Serialize};

/// Which backend model variant should answer the query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelFlag {
    /// `--s`: quick answers.
    #[default]
    #[serde(alias = "sonar")]
    Fast,
    /// `--p`: more thorough answers.
    #[serde(alias = "sonar-pro")]
    Pro,
    /// `--r`: step-by-step reasoning.
    #[serde(alias = "sonar-reasoning-pro")]
    Reasoning,
    /// `--deep`: long-running research.
    #[serde(alias = "sonar-deep-research")]
    Deep,
}

/// Concrete model identifier plus how it is presented in the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelSelection {
    pub model_id: &'static str,
    pub label: &'static str,
    pub color: Color,
}

impl ModelFlag {
    pub const ALL: [ModelFlag; 4] = [
        ModelFlag::Fast,
        ModelFlag::Pro,
        ModelFlag::Reasoning,
        ModelFlag::Deep,
    ];

    /// Look up the model this flag selects.
    pub fn selection(self) -> ModelSelection {
        match self {
            ModelFlag::Fast => ModelSelection {
                model_id: "sonar",
                label: "Sonar",
                color: Color::Green,
            },
            ModelFlag::Pro => ModelSelection {
                model_id: "sonar-pro",
                label: "Sonar Pro",
                color: Color::Cyan,
            },
            ModelFlag::Reasoning => ModelSelection {
                model_id: "sonar-reasoning-pro",
                label: "Sonar Reasoning Pro",
                color: Color::Magenta,
            },
            ModelFlag::Deep => ModelSelection {
                model_id: "sonar-deep-research",
                label: "Sonar Deep Research",
                color: Color::Yellow,
            },
        }
    }

    /// The command-line flag that selects this model.
    pub fn cli_flag(self) -> &'static str {
        match self {
            ModelFlag::Fast => "--s",
            ModelFlag::Pro => "--p",
            ModelFlag::Reasoning => "--r",
            ModelFlag::Deep => "--deep",
        }
    }

    /// Parse a flag name as written in config or environment
    /// (`fast`, `pro`, ... or the provider identifier).
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|flag| {
                let serde_name = match flag {
                    ModelFlag::Fast => "fast",
                    ModelFlag::Pro => "pro",
                    ModelFlag::Reasoning => "reasoning",
                    ModelFlag::Deep => "deep",
                };
                name == serde_name || name == flag.selection().model_id
            })
    }
}
