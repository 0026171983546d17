//! Step scripts.
//!
//! A `DemoScript` is the ordered list of states a project walks through. Step
//! 0 is the bootstrap state; every later step carries the prompt that
//! produced it and a `StepMutation` describing how to transform the
//! application database from the previous state.

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// A database transformation applied when a step is first reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepMutation {
    /// No change.
    None,
    /// Creates the `contacts` table and seeds three rows.
    CreateContacts,
    /// Adds `role` and `company` columns.
    AddRoleAndCompany,
    /// Adds a `tags` text-array column.
    AddTags,
    /// Arbitrary statements, executed in order.
    Sql {
        /// SQL statements.
        statements: Vec<String>,
    },
}

impl StepMutation {
    /// Returns the SQL statements this mutation executes.
    pub fn statements(&self) -> Vec<String> {
        match self {
            Self::None => Vec::new(),
            Self::CreateContacts => {
                let mut statements = vec![
                    "CREATE TABLE IF NOT EXISTS contacts (\
                     id UUID PRIMARY KEY DEFAULT gen_random_uuid(), \
                     name TEXT NOT NULL, \
                     email TEXT NOT NULL UNIQUE)"
                        .to_string(),
                ];
                statements.extend(SEED_CONTACTS.iter().map(|(name, email)| {
                    format!(
                        "INSERT INTO contacts (name, email) VALUES ('{name}', '{email}') \
                         ON CONFLICT (email) DO NOTHING"
                    )
                }));
                statements
            }
            Self::AddRoleAndCompany => vec![
                "ALTER TABLE contacts ADD COLUMN IF NOT EXISTS role TEXT, \
                 ADD COLUMN IF NOT EXISTS company TEXT"
                    .to_string(),
            ],
            Self::AddTags => vec![
                "ALTER TABLE contacts ADD COLUMN IF NOT EXISTS tags TEXT[] DEFAULT '{}'::text[]"
                    .to_string(),
            ],
            Self::Sql { statements } => statements.clone(),
        }
    }

    /// Returns `true` if the mutation touches the database.
    pub fn is_noop(&self) -> bool {
        self.statements().is_empty()
    }
}

const SEED_CONTACTS: [(&str, &str); 3] = [
    ("Ada Lovelace", "ada@example.com"),
    ("Alan Turing", "alan@example.com"),
    ("Grace Hopper", "grace@example.com"),
];

/// One state of the script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    /// Step identifier, unique within the script.
    pub id: String,
    /// Prompt that produces this state. `None` for the bootstrap step.
    #[serde(default)]
    pub prompt: Option<String>,
    /// Version label, used to name snapshots.
    pub version: String,
    /// Transformation from the previous state.
    #[serde(default = "default_mutation")]
    pub mutation: StepMutation,
}

const fn default_mutation() -> StepMutation {
    StepMutation::None
}

impl Step {
    /// Prompt text as stored on a checkpoint.
    pub fn prompt_text(&self) -> &str {
        self.prompt.as_deref().unwrap_or("")
    }
}

/// An ordered list of steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemoScript {
    /// Steps, bootstrap first.
    pub steps: Vec<Step>,
}

impl Default for DemoScript {
    fn default() -> Self {
        Self::contact_book()
    }
}

impl DemoScript {
    /// The built-in contact-book script.
    pub fn contact_book() -> Self {
        let step = |id: &str, prompt: Option<&str>, version: &str, mutation| Step {
            id: id.to_string(),
            prompt: prompt.map(str::to_string),
            version: version.to_string(),
            mutation,
        };
        Self {
            steps: vec![
                step("cp0", None, "v0", StepMutation::None),
                step(
                    "cp1",
                    Some("Create me a simple contact book app"),
                    "v1",
                    StepMutation::CreateContacts,
                ),
                step("cp2", Some("Add role and company fields"), "v2", StepMutation::AddRoleAndCompany),
                step("cp3", Some("Add ability to add tags to contacts"), "v3", StepMutation::AddTags),
            ],
        }
    }

    /// Checks that the script has at least one step and unique ids.
    ///
    /// # Errors
    /// Returns `ConfigError::InvalidValue` describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.steps.is_empty() {
            return Err(ConfigError::InvalidValue("script must contain at least one step".to_string()));
        }
        for (i, step) in self.steps.iter().enumerate() {
            if step.id.trim().is_empty() {
                return Err(ConfigError::InvalidValue(format!("script step {i} has an empty id")));
            }
            if self.steps[..i].iter().any(|s| s.id == step.id) {
                return Err(ConfigError::InvalidValue(format!("duplicate script step id: {}", step.id)));
            }
        }
        Ok(())
    }

    /// Returns the bootstrap step.
    pub fn first(&self) -> Option<&Step> {
        self.steps.first()
    }

    /// Returns the step at `index`.
    pub fn get(&self, index: usize) -> Option<&Step> {
        self.steps.get(index)
    }

    /// Finds a step by id.
    pub fn find(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns `true` if the script has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
