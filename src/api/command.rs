// Copyright 2025 Rowmap Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Command definitions

use std::time::Duration;

use crate::core::{CommandKind, Result};
use crate::driver::{Command, Connection};
use crate::mapper::MapperConfig;

bitflags::bitflags! {
    /// Execution options of a command
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CommandFlags: u8 {
        /// Materialize rows before returning them
        const BUFFERED = 0b0000_0001;
        /// Compile plans for this call only, without caching them
        const NO_CACHE = 0b0000_0100;
    }
}

impl Default for CommandFlags {
    fn default() -> Self {
        CommandFlags::BUFFERED
    }
}

/// What to run: SQL text plus how to run it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandDefinition {
    /// Command text
    pub text: String,
    /// How the text is interpreted
    pub kind: CommandKind,
    /// Timeout handed to the driver
    pub timeout: Option<Duration>,
    /// Execution options
    pub flags: CommandFlags,
}

impl CommandDefinition {
    /// A buffered, cached text command
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: CommandKind::Text,
            timeout: None,
            flags: CommandFlags::default(),
        }
    }

    /// A stored procedure call
    pub fn procedure(name: impl Into<String>) -> Self {
        Self::new(name).with_kind(CommandKind::StoredProcedure)
    }

    pub fn with_kind(mut self, kind: CommandKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_flags(mut self, flags: CommandFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Streams rows instead of materializing them
    pub fn unbuffered(mut self) -> Self {
        self.flags.remove(CommandFlags::BUFFERED);
        self
    }

    /// Skips the plan cache
    pub fn no_cache(mut self) -> Self {
        self.flags.insert(CommandFlags::NO_CACHE);
        self
    }

    /// Whether rows are materialized before they are returned
    pub fn buffered(&self) -> bool {
        self.flags.contains(CommandFlags::BUFFERED)
    }

    /// Whether compiled plans are published to the cache
    pub fn add_to_cache(&self) -> bool {
        !self.flags.contains(CommandFlags::NO_CACHE)
    }

    /// Creates a driver command carrying the text, kind and timeout
    pub(crate) fn setup(&self, connection: &dyn Connection) -> Result<Box<dyn Command>> {
        let mut command = connection.create_command()?;
        command.set_text(&self.text);
        command.set_kind(self.kind);
        command.set_timeout(self.timeout);
        Ok(command)
    }
}

impl From<&str> for CommandDefinition {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<String> for CommandDefinition {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

impl From<&String> for CommandDefinition {
    fn from(text: &String) -> Self {
        Self::new(text.as_str())
    }
}

/// Anything a mapper call accepts as its command
///
/// Plain SQL text picks up the mapper's default buffering; a
/// [`CommandDefinition`] is used as given.
pub trait IntoCommand {
    fn into_command(self, config: &MapperConfig) -> CommandDefinition;
}

impl IntoCommand for CommandDefinition {
    fn into_command(self, _config: &MapperConfig) -> CommandDefinition {
        self
    }
}

impl IntoCommand for &CommandDefinition {
    fn into_command(self, _config: &MapperConfig) -> CommandDefinition {
        self.clone()
    }
}

fn text_command(text: impl Into<String>, config: &MapperConfig) -> CommandDefinition {
    let mut def = CommandDefinition::new(text);
    def.flags.set(CommandFlags::BUFFERED, config.buffered);
    def
}

impl IntoCommand for &str {
    fn into_command(self, config: &MapperConfig) -> CommandDefinition {
        text_command(self, config)
    }
}

impl IntoCommand for String {
    fn into_command(self, config: &MapperConfig) -> CommandDefinition {
        text_command(self, config)
    }
}

impl IntoCommand for &String {
    fn into_command(self, config: &MapperConfig) -> CommandDefinition {
        text_command(self.as_str(), config)
    }
}
