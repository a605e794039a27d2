//! Slash command table.
//!
//! Commands are data: each entry names a token and the rewrite it applies.
//! Adding a command means adding a row to [`CommandTable::default`], not a
//! new code path. Evaluation is pure, so the same input and table always
//! produce the same outcome.

use serde::{Deserialize, Serialize};

use crate::llm::catalog::{DEEP_MODEL, IMAGE_MODEL, SEARCH_MODEL, VIDEO_MODEL};

/// Grouping used when listing commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandCategory {
    /// Routes the turn to a specific model: /image, /video, /web, /deep.
    Routing,
    /// Tags the prompt with a task: /page, /quiz, /visualize.
    Task,
    /// Rewrites the prompt with an instruction: /rewrite, /eli5, /summarize.
    Rewrite,
}

/// What a command does to the turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandAction {
    /// Send the remainder, unchanged, to one model only.
    SelectModel {
        model: String,
        #[serde(default)]
        force_grounding: bool,
    },
    /// Prompt becomes `[Task: <name>] <remainder>`.
    Task,
    /// Prompt is replaced by fixed text; the remainder is discarded.
    Replace { prompt: String },
    /// Prompt becomes `<prefix> <remainder>`.
    Prefix { prefix: String },
}

/// One row of the command table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandDef {
    /// Lowercase token without the leading slash.
    pub name: String,
    pub description: String,
    pub category: CommandCategory,
    pub action: CommandAction,
    /// Shown instead of running a command that needs input but got none.
    #[serde(default)]
    pub usage: Option<String>,
}

impl CommandDef {
    fn new(name: &str, description: &str, category: CommandCategory, action: CommandAction) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            category,
            action,
            usage: None,
        }
    }

    fn route(
        name: &str,
        description: &str,
        model: &str,
        force_grounding: bool,
        usage: &str,
    ) -> Self {
        Self {
            usage: Some(usage.to_string()),
            ..Self::new(
                name,
                description,
                CommandCategory::Routing,
                CommandAction::SelectModel {
                    model: model.to_string(),
                    force_grounding,
                },
            )
        }
    }

    fn task(name: &str, description: &str) -> Self {
        Self::new(name, description, CommandCategory::Task, CommandAction::Task)
    }

    fn prefix(name: &str, description: &str, prefix: &str) -> Self {
        Self::new(
            name,
            description,
            CommandCategory::Rewrite,
            CommandAction::Prefix {
                prefix: prefix.to_string(),
            },
        )
    }
}

/// Result of applying a recognized command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub command: String,
    pub prompt: String,
    pub model_override: Option<Vec<String>>,
    pub force_grounding: bool,
    /// Set when the command was recognized but cannot run as typed. Nothing
    /// should be sent.
    pub usage_hint: Option<String>,
}

/// The set of recognized commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTable {
    commands: Vec<CommandDef>,
}

impl Default for CommandTable {
    fn default() -> Self {
        let commands = vec![
            // Routing
            CommandDef::route(
                "image",
                "Generate an image",
                IMAGE_MODEL,
                false,
                "Usage: /image <description>",
            ),
            CommandDef::route(
                "video",
                "Generate a video",
                VIDEO_MODEL,
                false,
                "Usage: /video <description>",
            ),
            CommandDef::route(
                "web",
                "Answer with live web search",
                SEARCH_MODEL,
                true,
                "Usage: /web <question>",
            ),
            CommandDef::route(
                "search",
                "Answer with live web search",
                SEARCH_MODEL,
                true,
                "Usage: /search <question>",
            ),
            CommandDef::route(
                "deep",
                "Answer with extended reasoning",
                DEEP_MODEL,
                false,
                "Usage: /deep <question>",
            ),
            // Tasks
            CommandDef::task("page", "Draft a document page"),
            CommandDef::task("quiz", "Build a quiz"),
            CommandDef::task("visualize", "Describe a visualization"),
            // Rewrites
            CommandDef::new(
                "summarize",
                "Summarize the conversation",
                CommandCategory::Rewrite,
                CommandAction::Replace {
                    prompt: "Please summarize the conversation so far.".to_string(),
                },
            ),
            CommandDef::prefix(
                "rewrite",
                "Rewrite text professionally",
                "Rewrite the following text professionally:",
            ),
            CommandDef::prefix(
                "eli5",
                "Explain simply",
                "Explain the following topic like I'm 5 years old:",
            ),
            CommandDef::prefix(
                "fix",
                "Fix grammar and spelling",
                "Please fix grammar and spelling in the following text, and briefly list the changes:",
            ),
            CommandDef::prefix(
                "review",
                "Review code",
                "Please review this code for bugs, performance issues, and best practices:",
            ),
            CommandDef::prefix(
                "short",
                "Summarize very concisely",
                "TL;DR. Please provide a very concise summary of:",
            ),
        ];
        Self { commands }
    }
}

impl CommandTable {
    pub fn new(commands: Vec<CommandDef>) -> Self {
        Self { commands }
    }

    pub fn commands(&self) -> &[CommandDef] {
        &self.commands
    }

    /// Look up a command by name, ignoring case.
    pub fn get(&self, name: &str) -> Option<&CommandDef> {
        let name = name.to_lowercase();
        self.commands.iter().find(|c| c.name == name)
    }

    /// Apply the command that `raw` starts with, if it is recognized.
    ///
    /// Unknown `/tokens` return `None` so the text is treated as ordinary
    /// input.
    pub fn apply(&self, raw: &str) -> Option<CommandOutcome> {
        let without_prefix = raw.strip_prefix('/')?;
        let (token, rest) = without_prefix
            .split_once(char::is_whitespace)
            .unwrap_or((without_prefix, ""));
        let def = self.get(token)?;
        let rest = rest.trim();

        let mut outcome = CommandOutcome {
            command: def.name.clone(),
            prompt: rest.to_string(),
            model_override: None,
            force_grounding: false,
            usage_hint: None,
        };

        match &def.action {
            // A routed model gets the remainder verbatim; an empty one is
            // never sent.
            CommandAction::SelectModel { .. } if rest.is_empty() => {
                outcome.usage_hint = Some(
                    def.usage
                        .clone()
                        .unwrap_or_else(|| format!("Usage: /{} <prompt>", def.name)),
                );
            }
            CommandAction::SelectModel {
                model,
                force_grounding,
            } => {
                outcome.model_override = Some(vec![model.clone()]);
                outcome.force_grounding = *force_grounding;
            }
            CommandAction::Task => {
                outcome.prompt = format!("[Task: {}] {}", def.name, rest);
            }
            CommandAction::Replace { prompt } => {
                outcome.prompt = prompt.clone();
            }
            CommandAction::Prefix { prefix } => {
                outcome.prompt = format!("{} {}", prefix, rest);
            }
        }

        Some(outcome)
    }
}
