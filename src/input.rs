//! Operator input used while building the configuration.
//!
//! The orchestrator never prompts; everything interactive happens before a
//! [`MigrationSettings`](crate::config::MigrationSettings) exists.

use crate::error::{MigrateError, MigrateResult};
use inquire::{Password, PasswordDisplayMode, Select, Text};
use std::collections::VecDeque;

/// Answers the questions the configuration step may need to ask.
pub trait OperatorInput {
    /// Read a password for `user@host`.
    fn password(&mut self, role: &str, user: &str, host: &str) -> MigrateResult<String>;

    /// Choose the destination database name when none was configured.
    fn destination_name(&mut self, source_database: &str) -> MigrateResult<String>;
}

/// Interactive terminal prompts.
pub struct TerminalInput;

impl OperatorInput for TerminalInput {
    fn password(&mut self, role: &str, user: &str, host: &str) -> MigrateResult<String> {
        Password::new(&format!("Password for {} database ({}@{}):", role, user, host))
            .without_confirmation()
            .with_display_mode(PasswordDisplayMode::Hidden)
            .prompt()
            .map_err(|e| MigrateError::config(format!("failed to read {} password: {}", role, e)))
    }

    fn destination_name(&mut self, source_database: &str) -> MigrateResult<String> {
        let same = format!("Use same name as source ({})", source_database);
        let different = "Use a different name".to_string();

        let choice = Select::new("Destination database:", vec![same.clone(), different])
            .prompt()
            .map_err(|e| MigrateError::config(format!("failed to read choice: {}", e)))?;

        if choice == same {
            return Ok(source_database.to_string());
        }

        let name = Text::new("Destination database name:")
            .prompt()
            .map_err(|e| MigrateError::config(format!("failed to read database name: {}", e)))?;
        Ok(name.trim().to_string())
    }
}

/// Pre-recorded answers, consumed in order.
#[derive(Debug, Default)]
pub struct ScriptedInput {
    answers: VecDeque<String>,
}

impl ScriptedInput {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: answers.into_iter().map(Into::into).collect(),
        }
    }

    /// Answers not consumed yet.
    pub fn remaining(&self) -> usize {
        self.answers.len()
    }

    fn next(&mut self, what: &str) -> MigrateResult<String> {
        self.answers
            .pop_front()
            .ok_or_else(|| MigrateError::config(format!("no answer available for {}", what)))
    }
}

impl OperatorInput for ScriptedInput {
    fn password(&mut self, role: &str, _user: &str, _host: &str) -> MigrateResult<String> {
        self.next(&format!("{} password", role))
    }

    fn destination_name(&mut self, _source_database: &str) -> MigrateResult<String> {
        self.next("destination database name")
    }
}
