//! Command data model
//!
//! A [`Command`] is one recorded atomic action; a [`CommandSequence`] is the
//! ordered list the recorder appends to and the player walks. Step numbers
//! are always `1..=N`: every mutation on a sequence renumbers the whole list.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::element::{ElementDescriptor, Position};
use crate::errors::{MacroError, Result};

/// Longest wait a single `Wait` command may request (one hour).
pub const MAX_WAIT_MS: u64 = 60 * 60 * 1000;

/// The kind of action a command performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandType {
    Click,
    SetText,
    KeyPress,
    Wait,
    /// Single-marker loop form kept for older files; opens a loop like `LoopStart`.
    Loop,
    LoopStart,
    LoopEnd,
}

impl CommandType {
    pub fn is_loop_opener(self) -> bool {
        matches!(self, CommandType::Loop | CommandType::LoopStart)
    }

    pub fn is_loop_marker(self) -> bool {
        matches!(
            self,
            CommandType::Loop | CommandType::LoopStart | CommandType::LoopEnd
        )
    }

    /// Commands that act on a UI element and therefore need resolving.
    pub fn targets_element(self) -> bool {
        matches!(
            self,
            CommandType::Click | CommandType::SetText | CommandType::KeyPress
        )
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommandType::Click => "Click",
            CommandType::SetText => "SetText",
            CommandType::KeyPress => "KeyPress",
            CommandType::Wait => "Wait",
            CommandType::Loop => "Loop",
            CommandType::LoopStart => "LoopStart",
            CommandType::LoopEnd => "LoopEnd",
        };
        f.write_str(name)
    }
}

fn default_repeat_count() -> u32 {
    1
}

/// One recorded atomic action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Command {
    #[serde(default)]
    pub(crate) step_number: usize,

    #[serde(rename = "Type")]
    pub(crate) command_type: CommandType,

    #[serde(default)]
    pub element_name: Option<String>,

    #[serde(default)]
    pub element_id: Option<String>,

    #[serde(default)]
    pub class_name: Option<String>,

    #[serde(default)]
    pub element_x: Option<i32>,

    #[serde(default)]
    pub element_y: Option<i32>,

    /// Text to type, key name, wait duration in ms, or loop iteration count.
    #[serde(default)]
    pub(crate) value: String,

    #[serde(default = "default_repeat_count")]
    pub(crate) repeat_count: u32,

    #[serde(default)]
    pub(crate) is_loop_start: bool,

    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Command {
    fn bare(command_type: CommandType, descriptor: ElementDescriptor, value: String) -> Self {
        let mut command = Self {
            step_number: 0,
            command_type,
            element_name: None,
            element_id: None,
            class_name: None,
            element_x: None,
            element_y: None,
            value,
            repeat_count: 1,
            is_loop_start: command_type == CommandType::LoopStart,
            timestamp: Utc::now(),
        };
        command.set_descriptor(descriptor);
        command
    }

    /// Build a command from a type and its raw value, the way a table edit
    /// does. Invalid values are rejected rather than stored.
    pub fn new(command_type: CommandType, value: impl Into<String>) -> Result<Self> {
        let mut command = Self::bare(command_type, ElementDescriptor::default(), value.into());
        if command_type.is_loop_opener() {
            command.repeat_count = parse_repeat_count(0, &command.value)?;
        }
        command.validate()?;
        Ok(command)
    }

    pub fn click(descriptor: ElementDescriptor) -> Self {
        Self::bare(CommandType::Click, descriptor, String::new())
    }

    pub fn set_text(descriptor: ElementDescriptor, text: impl Into<String>) -> Self {
        Self::bare(CommandType::SetText, descriptor, text.into())
    }

    pub fn key_press(descriptor: ElementDescriptor, key: impl Into<String>) -> Result<Self> {
        let command = Self::bare(CommandType::KeyPress, descriptor, key.into());
        command.validate()?;
        Ok(command)
    }

    pub fn wait(ms: u64) -> Result<Self> {
        let command = Self::bare(CommandType::Wait, ElementDescriptor::default(), ms.to_string());
        command.validate()?;
        Ok(command)
    }

    pub fn loop_start(iterations: u32) -> Result<Self> {
        Self::loop_opener(CommandType::LoopStart, iterations)
    }

    /// The single-marker `Loop` form.
    pub fn loop_marker(iterations: u32) -> Result<Self> {
        Self::loop_opener(CommandType::Loop, iterations)
    }

    pub fn loop_end() -> Self {
        Self::bare(CommandType::LoopEnd, ElementDescriptor::default(), String::new())
    }

    fn loop_opener(command_type: CommandType, iterations: u32) -> Result<Self> {
        let mut command = Self::bare(command_type, ElementDescriptor::default(), iterations.to_string());
        command.repeat_count = iterations;
        command.validate()?;
        Ok(command)
    }

    pub fn step_number(&self) -> usize {
        self.step_number
    }

    pub fn command_type(&self) -> CommandType {
        self.command_type
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn repeat_count(&self) -> u32 {
        self.repeat_count
    }

    pub fn is_loop_start(&self) -> bool {
        self.is_loop_start
    }

    /// Wait duration for `Wait` commands.
    pub fn wait_duration(&self) -> Option<Duration> {
        if self.command_type != CommandType::Wait {
            return None;
        }
        self.value.trim().parse::<u64>().ok().map(Duration::from_millis)
    }

    /// Replace the payload, re-validating it against the command type.
    pub fn set_value(&mut self, value: impl Into<String>) -> Result<()> {
        let value = value.into();
        let mut candidate = self.clone();
        if self.command_type.is_loop_opener() {
            candidate.repeat_count = parse_repeat_count(self.step_number, &value)?;
        }
        candidate.value = value;
        candidate.validate()?;
        *self = candidate;
        Ok(())
    }

    /// Set the iteration count of a loop opener. Other types ignore the
    /// count, so it is stored but has no effect.
    pub fn set_repeat_count(&mut self, count: u32) -> Result<()> {
        if count == 0 {
            return Err(MacroError::InvalidCommand {
                step: self.step_number,
                reason: "repeat count must be at least 1".to_string(),
            });
        }
        self.repeat_count = count;
        if self.command_type.is_loop_opener() {
            self.value = count.to_string();
        }
        Ok(())
    }

    /// Append typed text to a `SetText` command. Returns false for any
    /// other command type.
    pub fn append_text(&mut self, text: &str) -> bool {
        if self.command_type != CommandType::SetText {
            return false;
        }
        self.value.push_str(text);
        self.timestamp = Utc::now();
        true
    }

    /// Remove the last typed character of a `SetText` command.
    pub fn pop_char(&mut self) -> Option<char> {
        if self.command_type != CommandType::SetText {
            return None;
        }
        let popped = self.value.pop();
        self.timestamp = Utc::now();
        popped
    }

    pub fn descriptor(&self) -> ElementDescriptor {
        let position = match (self.element_x, self.element_y) {
            (Some(x), Some(y)) => Some(Position { x, y }),
            _ => None,
        };
        ElementDescriptor {
            element_id: self.element_id.clone(),
            class_name: self.class_name.clone(),
            element_name: self.element_name.clone(),
            position,
        }
    }

    pub fn set_descriptor(&mut self, descriptor: ElementDescriptor) {
        self.element_id = descriptor.element_id;
        self.class_name = descriptor.class_name;
        self.element_name = descriptor.element_name;
        self.element_x = descriptor.position.map(|p| p.x);
        self.element_y = descriptor.position.map(|p| p.y);
    }

    /// True when both commands act on the same control.
    pub fn same_target(&self, other: &Command) -> bool {
        match (&self.element_id, &other.element_id) {
            (Some(a), Some(b)) => a == b,
            (None, None) => {
                self.class_name == other.class_name
                    && self.element_name == other.element_name
                    && (self.class_name.is_some() || self.element_name.is_some())
            }
            _ => false,
        }
    }

    /// Check the payload against the command type.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| MacroError::InvalidCommand {
            step: self.step_number,
            reason,
        };
        match self.command_type {
            CommandType::Wait => {
                let ms = self
                    .value
                    .trim()
                    .parse::<u64>()
                    .map_err(|_| invalid(format!("wait value '{}' is not a number of milliseconds", self.value)))?;
                if ms > MAX_WAIT_MS {
                    return Err(invalid(format!("wait of {ms} ms exceeds the {MAX_WAIT_MS} ms limit")));
                }
            }
            CommandType::Loop | CommandType::LoopStart => {
                if self.repeat_count == 0 {
                    return Err(invalid("loop repeat count must be at least 1".to_string()));
                }
            }
            CommandType::KeyPress => {
                if self.value.trim().is_empty() {
                    return Err(invalid("key press needs a key name".to_string()));
                }
            }
            CommandType::Click | CommandType::SetText | CommandType::LoopEnd => {}
        }
        if self.is_loop_start != (self.command_type == CommandType::LoopStart) {
            return Err(invalid("IsLoopStart does not match the command type".to_string()));
        }
        Ok(())
    }

    /// Bring a command read from disk into a consistent shape: loop counts
    /// follow the value when it holds one, and the loop-start flag mirrors the
    /// type. Anything still invalid afterwards is rejected.
    pub(crate) fn reconcile(&mut self) -> Result<()> {
        self.is_loop_start = self.command_type == CommandType::LoopStart;
        if self.command_type.is_loop_opener() {
            if self.value.trim().is_empty() {
                self.value = self.repeat_count.to_string();
            } else {
                self.repeat_count = parse_repeat_count(self.step_number, &self.value)?;
            }
        }
        self.validate()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}. {}", self.step_number, self.command_type)?;
        if let Some(target) = self
            .element_id
            .as_deref()
            .or(self.element_name.as_deref())
            .or(self.class_name.as_deref())
        {
            write!(f, " [{target}]")?;
        } else if let (Some(x), Some(y)) = (self.element_x, self.element_y) {
            write!(f, " @({x}, {y})")?;
        }
        if !self.value.is_empty() {
            write!(f, " = {}", self.value)?;
        }
        Ok(())
    }
}

fn parse_repeat_count(step: usize, value: &str) -> Result<u32> {
    match value.trim().parse::<u32>() {
        Ok(count) if count >= 1 => Ok(count),
        _ => Err(MacroError::InvalidCommand {
            step,
            reason: format!("loop count '{value}' must be a whole number of at least 1"),
        }),
    }
}

/// Counts of loop openers and closers in a sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopReport {
    pub loop_starts: usize,
    pub loop_ends: usize,
}

impl LoopReport {
    pub fn from_commands<'a>(commands: impl IntoIterator<Item = &'a Command>) -> Self {
        let mut report = LoopReport {
            loop_starts: 0,
            loop_ends: 0,
        };
        for command in commands {
            if command.command_type.is_loop_opener() {
                report.loop_starts += 1;
            } else if command.command_type == CommandType::LoopEnd {
                report.loop_ends += 1;
            }
        }
        report
    }

    pub fn is_balanced(&self) -> bool {
        self.loop_starts == self.loop_ends
    }
}

impl fmt::Display for LoopReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_balanced() {
            write!(f, "{} loop(s), markers balanced", self.loop_starts)
        } else {
            write!(
                f,
                "Loop markers are unbalanced: {} loop start(s), {} loop end(s)",
                self.loop_starts, self.loop_ends
            )
        }
    }
}

/// An ordered list of commands plus target-window metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CommandSequence {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub target_process_name: String,

    #[serde(default)]
    pub target_window_title: String,

    #[serde(default = "Utc::now")]
    pub created: DateTime<Utc>,

    #[serde(default = "Utc::now")]
    pub last_modified: DateTime<Utc>,

    #[serde(default)]
    commands: Vec<Command>,
}

impl CommandSequence {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            description: String::new(),
            target_process_name: String::new(),
            target_window_title: String::new(),
            created: now,
            last_modified: now,
            commands: Vec::new(),
        }
    }

    /// Build a sequence from existing commands, validating each one.
    pub fn from_commands(name: impl Into<String>, commands: Vec<Command>) -> Result<Self> {
        let mut sequence = Self::new(name);
        sequence.replace_all(commands)?;
        Ok(sequence)
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Command> {
        self.commands.get(index)
    }

    pub fn last(&self) -> Option<&Command> {
        self.commands.last()
    }

    pub fn last_mut(&mut self) -> Option<&mut Command> {
        self.touch();
        self.commands.last_mut()
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Command> {
        self.commands.get_mut(index)
    }

    /// Append a command and return its step number.
    pub fn push(&mut self, command: Command) -> usize {
        self.commands.push(command);
        self.renumber();
        self.commands.len()
    }

    pub fn insert(&mut self, index: usize, command: Command) -> Result<()> {
        if index > self.commands.len() {
            return Err(self.out_of_range(index));
        }
        self.commands.insert(index, command);
        self.renumber();
        Ok(())
    }

    pub fn remove(&mut self, index: usize) -> Result<Command> {
        if index >= self.commands.len() {
            return Err(self.out_of_range(index));
        }
        let removed = self.commands.remove(index);
        self.renumber();
        Ok(removed)
    }

    pub fn move_item(&mut self, from: usize, to: usize) -> Result<()> {
        if from >= self.commands.len() {
            return Err(self.out_of_range(from));
        }
        if to >= self.commands.len() {
            return Err(self.out_of_range(to));
        }
        let command = self.commands.remove(from);
        self.commands.insert(to, command);
        self.renumber();
        Ok(())
    }

    pub fn move_up(&mut self, index: usize) -> Result<()> {
        if index == 0 {
            return Err(MacroError::InvalidOperation("first step cannot move up".to_string()));
        }
        self.move_item(index, index - 1)
    }

    pub fn move_down(&mut self, index: usize) -> Result<()> {
        if index + 1 >= self.commands.len() {
            return Err(MacroError::InvalidOperation("last step cannot move down".to_string()));
        }
        self.move_item(index, index + 1)
    }

    /// Insert a copy of the command right after the original.
    pub fn duplicate(&mut self, index: usize) -> Result<()> {
        let copy = self
            .commands
            .get(index)
            .cloned()
            .ok_or_else(|| self.out_of_range(index))?;
        self.insert(index + 1, copy)
    }

    pub fn clear(&mut self) {
        self.commands.clear();
        self.touch();
    }

    /// Replace every command at once (New/Load). Rejects the whole batch if
    /// any command is invalid.
    pub fn replace_all(&mut self, commands: Vec<Command>) -> Result<()> {
        let mut commands = commands;
        for (index, command) in commands.iter_mut().enumerate() {
            command.step_number = index + 1;
            command.reconcile()?;
        }
        self.commands = commands;
        self.touch();
        Ok(())
    }

    pub fn loop_report(&self) -> LoopReport {
        LoopReport::from_commands(&self.commands)
    }

    /// Renumber and validate after deserialization.
    pub fn normalize(&mut self) -> Result<()> {
        let commands = std::mem::take(&mut self.commands);
        let last_modified = self.last_modified;
        self.replace_all(commands)?;
        self.last_modified = last_modified;
        Ok(())
    }

    pub fn touch(&mut self) {
        self.last_modified = Utc::now();
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let mut sequence: CommandSequence = serde_json::from_str(json)?;
        sequence.normalize()?;
        Ok(sequence)
    }

    fn renumber(&mut self) {
        for (index, command) in self.commands.iter_mut().enumerate() {
            command.step_number = index + 1;
        }
        self.touch();
    }

    fn out_of_range(&self, index: usize) -> MacroError {
        MacroError::InvalidOperation(format!(
            "step index {} is out of range for a sequence of {} step(s)",
            index + 1,
            self.commands.len()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn button(id: &str) -> ElementDescriptor {
        ElementDescriptor {
            element_id: Some(id.to_string()),
            class_name: Some("Button".to_string()),
            element_name: None,
            position: Some(Position::new(10, 10)),
        }
    }

    fn step_numbers(sequence: &CommandSequence) -> Vec<usize> {
        sequence.commands().iter().map(Command::step_number).collect()
    }

    fn sample() -> CommandSequence {
        let mut sequence = CommandSequence::new("sample");
        sequence.push(Command::click(button("a")));
        sequence.push(Command::set_text(button("b"), "hello"));
        sequence.push(Command::wait(500).unwrap());
        sequence.push(Command::click(button("c")));
        sequence
    }

    #[test]
    fn test_push_numbers_densely() {
        let sequence = sample();
        assert_eq!(step_numbers(&sequence), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_every_mutation_keeps_steps_dense() {
        let mut sequence = sample();

        sequence.insert(0, Command::loop_start(2).unwrap()).unwrap();
        assert_eq!(step_numbers(&sequence), vec![1, 2, 3, 4, 5]);

        sequence.remove(2).unwrap();
        assert_eq!(step_numbers(&sequence), vec![1, 2, 3, 4]);

        sequence.move_item(0, 3).unwrap();
        assert_eq!(step_numbers(&sequence), vec![1, 2, 3, 4]);
        assert_eq!(sequence.get(3).unwrap().command_type(), CommandType::LoopStart);

        sequence.duplicate(1).unwrap();
        assert_eq!(step_numbers(&sequence), vec![1, 2, 3, 4, 5]);

        sequence.move_up(4).unwrap();
        sequence.move_down(0).unwrap();
        assert_eq!(step_numbers(&sequence), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_out_of_range_edits_are_rejected() {
        let mut sequence = sample();
        assert!(sequence.remove(10).is_err());
        assert!(sequence.insert(10, Command::loop_end()).is_err());
        assert!(sequence.move_up(0).is_err());
        assert!(sequence.move_down(3).is_err());
        assert_eq!(sequence.len(), 4);
    }

    #[test]
    fn test_invalid_values_are_never_stored() {
        assert!(Command::loop_start(0).is_err());
        assert!(Command::new(CommandType::Wait, "soon").is_err());
        assert!(Command::new(CommandType::LoopStart, "-1").is_err());
        assert!(Command::key_press(ElementDescriptor::default(), "  ").is_err());

        let mut wait = Command::wait(100).unwrap();
        assert!(wait.set_value("abc").is_err());
        assert_eq!(wait.value(), "100");
        wait.set_value("250").unwrap();
        assert_eq!(wait.wait_duration(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_loop_opener_value_and_count_stay_in_sync() {
        let mut command = Command::new(CommandType::LoopStart, "3").unwrap();
        assert_eq!(command.repeat_count(), 3);
        assert!(command.is_loop_start());

        command.set_repeat_count(5).unwrap();
        assert_eq!(command.value(), "5");

        command.set_value("2").unwrap();
        assert_eq!(command.repeat_count(), 2);
        assert!(command.set_repeat_count(0).is_err());
    }

    #[test]
    fn test_loop_report_counts_both_opener_forms() {
        let mut sequence = CommandSequence::new("loops");
        sequence.push(Command::loop_start(2).unwrap());
        sequence.push(Command::loop_marker(3).unwrap());
        sequence.push(Command::loop_end());
        let report = sequence.loop_report();
        assert_eq!(report, LoopReport { loop_starts: 2, loop_ends: 1 });
        assert!(!report.is_balanced());
        let message = report.to_string();
        assert!(message.contains("2 loop start(s)"));
        assert!(message.contains("1 loop end(s)"));
    }

    #[test]
    fn test_json_round_trip_preserves_order_and_values() {
        let sequence = sample();
        let json = sequence.to_json().unwrap();
        assert!(json.contains("\"StepNumber\""));
        assert!(json.contains("\"Type\": \"SetText\""));

        let loaded = CommandSequence::from_json(&json).unwrap();
        assert_eq!(loaded, sequence);
    }

    #[test]
    fn test_loading_reconciles_loop_fields_and_rejects_bad_waits() {
        let json = r#"{
            "Name": "legacy",
            "Commands": [
                { "StepNumber": 9, "Type": "LoopStart", "Value": "4" },
                { "StepNumber": 9, "Type": "LoopEnd" }
            ]
        }"#;
        let loaded = CommandSequence::from_json(json).unwrap();
        assert_eq!(loaded.get(0).unwrap().repeat_count(), 4);
        assert!(loaded.get(0).unwrap().is_loop_start());
        assert_eq!(step_numbers(&loaded), vec![1, 2]);

        let bad = r#"{ "Name": "bad", "Commands": [ { "Type": "Wait", "Value": "later" } ] }"#;
        match CommandSequence::from_json(bad) {
            Err(MacroError::InvalidCommand { step, .. }) => assert_eq!(step, 1),
            other => panic!("expected invalid command, got {other:?}"),
        }
    }

    #[test]
    fn test_same_target_prefers_ids() {
        let a = Command::click(button("a"));
        let a_again = Command::set_text(button("a"), "x");
        let b = Command::click(button("b"));
        assert!(a.same_target(&a_again));
        assert!(!a.same_target(&b));

        let anonymous = Command::click(ElementDescriptor::at(Position::new(1, 1)));
        assert!(!anonymous.same_target(&anonymous.clone()));
    }
}
