//! Unified sequences
//!
//! The editing table works on [`UnifiedItem`] rows. A row is an inline
//! [`Command`], a reference to another sequence file, or an in-memory
//! recording that has not been saved yet. Before playback a unified
//! sequence is flattened into a plain [`CommandSequence`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

use crate::element::ElementDescriptor;
use crate::errors::{MacroError, Result};
use crate::model::{Command, CommandSequence};
use crate::storage::SequenceDocument;

/// References nested deeper than this are skipped when flattening.
pub const MAX_REFERENCE_DEPTH: usize = 8;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemStatus {
    #[default]
    Pending,
    Ready,
    Unsaved,
    FileMissing,
    Completed,
    Failed,
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ItemStatus::Pending => "Pending",
            ItemStatus::Ready => "Ready",
            ItemStatus::Unsaved => "Unsaved",
            ItemStatus::FileMissing => "File Missing",
            ItemStatus::Completed => "Completed",
            ItemStatus::Failed => "Failed",
        };
        f.write_str(label)
    }
}

fn one() -> u32 {
    1
}

/// What a row stands for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "Kind")]
pub enum ItemKind {
    Command(Command),
    SequenceReference {
        #[serde(rename = "FilePath")]
        file_path: PathBuf,
        #[serde(rename = "RepeatCount", default = "one")]
        repeat_count: u32,
    },
    LiveRecording {
        #[serde(rename = "Sequence")]
        sequence: CommandSequence,
        #[serde(rename = "RepeatCount", default = "one")]
        repeat_count: u32,
    },
}

/// One row of the editing table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UnifiedItem {
    #[serde(default)]
    pub(crate) step_number: usize,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub status: ItemStatus,

    /// Free text shown next to the status
    #[serde(default)]
    pub notes: String,

    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,

    pub item: ItemKind,
}

impl UnifiedItem {
    pub fn from_command(command: Command) -> Self {
        let name = command
            .element_name
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| command.command_type().to_string());
        Self {
            step_number: command.step_number(),
            name,
            status: ItemStatus::Ready,
            notes: String::new(),
            timestamp: command.timestamp,
            item: ItemKind::Command(command),
        }
    }

    pub fn sequence_reference(file_path: impl Into<PathBuf>, repeat_count: u32) -> Result<Self> {
        let file_path = file_path.into();
        check_repeat(repeat_count)?;
        let name = file_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| file_path.display().to_string());
        Ok(Self {
            step_number: 0,
            name,
            status: ItemStatus::Pending,
            notes: String::new(),
            timestamp: Utc::now(),
            item: ItemKind::SequenceReference {
                file_path,
                repeat_count,
            },
        })
    }

    pub fn live_recording(sequence: CommandSequence, repeat_count: u32) -> Result<Self> {
        check_repeat(repeat_count)?;
        Ok(Self {
            step_number: 0,
            name: sequence.name.clone(),
            status: ItemStatus::Unsaved,
            notes: String::new(),
            timestamp: Utc::now(),
            item: ItemKind::LiveRecording {
                sequence,
                repeat_count,
            },
        })
    }

    /// The inline command, with this row's step number. `None` for
    /// references and live recordings.
    pub fn to_command(&self) -> Option<Command> {
        match &self.item {
            ItemKind::Command(command) => {
                let mut command = command.clone();
                command.step_number = self.step_number;
                command.timestamp = self.timestamp;
                Some(command)
            }
            _ => None,
        }
    }

    pub fn step_number(&self) -> usize {
        self.step_number
    }

    /// Label for the table's action column
    pub fn action(&self) -> String {
        match &self.item {
            ItemKind::Command(command) => command.command_type().to_string(),
            ItemKind::SequenceReference { .. } => "Run Sequence".to_string(),
            ItemKind::LiveRecording { .. } => "Run Recording".to_string(),
        }
    }

    pub fn value(&self) -> String {
        match &self.item {
            ItemKind::Command(command) => command.value().to_string(),
            ItemKind::SequenceReference { file_path, .. } => file_path.display().to_string(),
            ItemKind::LiveRecording { sequence, .. } => format!("{} ({} steps)", sequence.name, sequence.len()),
        }
    }

    pub fn repeat_count(&self) -> u32 {
        match &self.item {
            ItemKind::Command(command) => command.repeat_count(),
            ItemKind::SequenceReference { repeat_count, .. } | ItemKind::LiveRecording { repeat_count, .. } => {
                *repeat_count
            }
        }
    }

    pub fn descriptor(&self) -> Option<ElementDescriptor> {
        match &self.item {
            ItemKind::Command(command) => Some(command.descriptor()),
            _ => None,
        }
    }

    fn validate(&self) -> Result<()> {
        match &self.item {
            ItemKind::Command(command) => {
                let mut command = command.clone();
                command.step_number = self.step_number;
                command.validate()
            }
            ItemKind::SequenceReference { repeat_count, .. } | ItemKind::LiveRecording { repeat_count, .. } => {
                check_repeat(*repeat_count).map_err(|_| MacroError::InvalidCommand {
                    step: self.step_number,
                    reason: "repeat count must be at least 1".to_string(),
                })
            }
        }
    }
}

impl From<Command> for UnifiedItem {
    fn from(command: Command) -> Self {
        Self::from_command(command)
    }
}

fn check_repeat(repeat_count: u32) -> Result<()> {
    if repeat_count == 0 {
        return Err(MacroError::InvalidOperation("repeat count must be at least 1".to_string()));
    }
    Ok(())
}

/// An item left out while flattening
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedItem {
    pub step_number: usize,
    pub name: String,
    pub reason: String,
}

/// Result of [`UnifiedSequence::to_command_sequence`]
#[derive(Debug, Clone)]
pub struct Flattened {
    pub sequence: CommandSequence,
    pub skipped: Vec<SkippedItem>,
}

/// Source of referenced sequence files
pub trait SequenceLoader {
    fn load(&self, path: &Path) -> Result<SequenceDocument>;
}

/// Ordered table rows plus target-window metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UnifiedSequence {
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

    items: Vec<UnifiedItem>,
}

impl UnifiedSequence {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            description: String::new(),
            target_process_name: String::new(),
            target_window_title: String::new(),
            created: now,
            last_modified: now,
            items: Vec::new(),
        }
    }

    pub fn items(&self) -> &[UnifiedItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&UnifiedItem> {
        self.items.get(index)
    }

    /// Set the status of one row without renumbering.
    pub fn set_status(&mut self, index: usize, status: ItemStatus) -> Result<()> {
        let len = self.items.len();
        let item = self.items.get_mut(index).ok_or_else(|| out_of_range(index, len))?;
        item.status = status;
        Ok(())
    }

    pub fn push(&mut self, item: UnifiedItem) -> usize {
        self.items.push(item);
        self.renumber();
        self.items.len()
    }

    pub fn insert(&mut self, index: usize, item: UnifiedItem) -> Result<()> {
        if index > self.items.len() {
            return Err(out_of_range(index, self.items.len()));
        }
        self.items.insert(index, item);
        self.renumber();
        Ok(())
    }

    pub fn remove(&mut self, index: usize) -> Result<UnifiedItem> {
        if index >= self.items.len() {
            return Err(out_of_range(index, self.items.len()));
        }
        let removed = self.items.remove(index);
        self.renumber();
        Ok(removed)
    }

    pub fn move_item(&mut self, from: usize, to: usize) -> Result<()> {
        let len = self.items.len();
        if from >= len || to >= len {
            return Err(out_of_range(from.max(to), len));
        }
        let item = self.items.remove(from);
        self.items.insert(to, item);
        self.renumber();
        Ok(())
    }

    pub fn move_up(&mut self, index: usize) -> Result<()> {
        if index == 0 {
            return Err(MacroError::InvalidOperation("first row cannot move up".to_string()));
        }
        self.move_item(index, index - 1)
    }

    pub fn move_down(&mut self, index: usize) -> Result<()> {
        if index + 1 >= self.items.len() {
            return Err(MacroError::InvalidOperation("last row cannot move down".to_string()));
        }
        self.move_item(index, index + 1)
    }

    pub fn duplicate(&mut self, index: usize) -> Result<()> {
        let copy = self
            .items
            .get(index)
            .cloned()
            .ok_or_else(|| out_of_range(index, self.items.len()))?;
        self.insert(index + 1, copy)
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.touch();
    }

    pub fn replace_all(&mut self, items: Vec<UnifiedItem>) -> Result<()> {
        let mut items = items;
        for (index, item) in items.iter_mut().enumerate() {
            item.step_number = index + 1;
            if let ItemKind::Command(command) = &mut item.item {
                command.step_number = index + 1;
                command.reconcile()?;
            }
            item.validate()?;
        }
        self.items = items;
        self.touch();
        Ok(())
    }

    /// Renumber and validate after deserialization.
    pub fn normalize(&mut self) -> Result<()> {
        let items = std::mem::take(&mut self.items);
        let last_modified = self.last_modified;
        self.replace_all(items)?;
        self.last_modified = last_modified;
        Ok(())
    }

    pub fn touch(&mut self) {
        self.last_modified = Utc::now();
    }

    /// Re-check every sequence reference against the file system. Missing
    /// files are marked `FileMissing`; files that reappeared become `Ready`.
    /// Returns how many references are missing.
    pub fn refresh_file_status(&mut self, base_dir: &Path) -> usize {
        let mut missing = 0;
        for item in &mut self.items {
            if let ItemKind::SequenceReference { file_path, .. } = &item.item {
                let path = resolve_reference(base_dir, file_path);
                if path.is_file() {
                    if matches!(item.status, ItemStatus::FileMissing | ItemStatus::Pending) {
                        item.status = ItemStatus::Ready;
                    }
                } else {
                    warn!(path = %path.display(), step = item.step_number, "Referenced sequence file is missing");
                    item.status = ItemStatus::FileMissing;
                    missing += 1;
                }
            }
        }
        missing
    }

    /// Flatten into a playable sequence.
    ///
    /// References are loaded through `loader`, relative paths resolved
    /// against `base_dir`. A reference or recording repeated more than once
    /// is wrapped in a `LoopStart`/`LoopEnd` pair. Items that cannot be
    /// expanded (missing files, cycles, nesting too deep) are reported in
    /// [`Flattened::skipped`] rather than failing the whole conversion.
    pub fn to_command_sequence<L>(&self, base_dir: &Path, loader: &L) -> Result<Flattened>
    where
        L: SequenceLoader + ?Sized,
    {
        self.flatten_from(None, base_dir, loader)
    }

    pub(crate) fn flatten_from<L>(&self, origin: Option<&Path>, base_dir: &Path, loader: &L) -> Result<Flattened>
    where
        L: SequenceLoader + ?Sized,
    {
        let mut visiting: Vec<PathBuf> = origin.map(clean_path).into_iter().collect();
        let mut commands = Vec::new();
        let mut skipped = Vec::new();
        self.expand(base_dir, loader, &mut visiting, 0, &mut commands, &mut skipped);

        let mut sequence = CommandSequence::from_commands(self.name.clone(), commands)?;
        sequence.description = self.description.clone();
        sequence.target_process_name = self.target_process_name.clone();
        sequence.target_window_title = self.target_window_title.clone();
        sequence.created = self.created;
        debug!(steps = sequence.len(), skipped = skipped.len(), "Unified sequence flattened");
        Ok(Flattened { sequence, skipped })
    }

    fn expand<L>(
        &self,
        base_dir: &Path,
        loader: &L,
        visiting: &mut Vec<PathBuf>,
        depth: usize,
        out: &mut Vec<Command>,
        skipped: &mut Vec<SkippedItem>,
    ) where
        L: SequenceLoader + ?Sized,
    {
        for item in &self.items {
            let skip = |reason: String| SkippedItem {
                step_number: item.step_number,
                name: item.name.clone(),
                reason,
            };
            match &item.item {
                ItemKind::Command(_) => {
                    if let Some(command) = item.to_command() {
                        out.push(command);
                    }
                }
                ItemKind::LiveRecording { sequence, repeat_count } => {
                    if let Err(e) = wrap_repeated(out, sequence.commands().to_vec(), *repeat_count) {
                        skipped.push(skip(e.to_string()));
                    }
                }
                ItemKind::SequenceReference { file_path, repeat_count } => {
                    let path = resolve_reference(base_dir, file_path);
                    if visiting.contains(&path) {
                        skipped.push(skip(format!("reference cycle through {}", path.display())));
                        continue;
                    }
                    if depth >= MAX_REFERENCE_DEPTH {
                        skipped.push(skip(format!(
                            "references nested deeper than {MAX_REFERENCE_DEPTH} levels"
                        )));
                        continue;
                    }
                    let document = match loader.load(&path) {
                        Ok(document) => document,
                        Err(e) => {
                            warn!(path = %path.display(), error = %e, "Skipping unreadable reference");
                            skipped.push(skip(e.to_string()));
                            continue;
                        }
                    };
                    let nested = match document {
                        SequenceDocument::Flat(sequence) => sequence.commands().to_vec(),
                        SequenceDocument::Unified(unified) => {
                            let nested_base = path.parent().map(Path::to_path_buf).unwrap_or_default();
                            let mut nested = Vec::new();
                            visiting.push(path.clone());
                            unified.expand(&nested_base, loader, visiting, depth + 1, &mut nested, skipped);
                            visiting.pop();
                            nested
                        }
                    };
                    if let Err(e) = wrap_repeated(out, nested, *repeat_count) {
                        skipped.push(skip(e.to_string()));
                    }
                }
            }
        }
    }

    fn renumber(&mut self) {
        for (index, item) in self.items.iter_mut().enumerate() {
            item.step_number = index + 1;
            if let ItemKind::Command(command) = &mut item.item {
                command.step_number = index + 1;
            }
        }
        self.touch();
    }
}

impl From<CommandSequence> for UnifiedSequence {
    fn from(sequence: CommandSequence) -> Self {
        let mut unified = UnifiedSequence::new(sequence.name.clone());
        unified.description = sequence.description.clone();
        unified.target_process_name = sequence.target_process_name.clone();
        unified.target_window_title = sequence.target_window_title.clone();
        unified.created = sequence.created;
        unified.items = sequence
            .commands()
            .iter()
            .cloned()
            .map(UnifiedItem::from_command)
            .collect();
        unified.renumber();
        unified.last_modified = sequence.last_modified;
        unified
    }
}

fn wrap_repeated(out: &mut Vec<Command>, body: Vec<Command>, repeat_count: u32) -> Result<()> {
    if body.is_empty() {
        return Ok(());
    }
    if repeat_count > 1 {
        out.push(Command::loop_start(repeat_count)?);
        out.extend(body);
        out.push(Command::loop_end());
    } else {
        out.extend(body);
    }
    Ok(())
}

fn out_of_range(index: usize, len: usize) -> MacroError {
    MacroError::InvalidOperation(format!(
        "row index {} is out of range for a sequence of {len} row(s)",
        index + 1
    ))
}

/// Resolve a reference against the directory of the file holding it.
pub fn resolve_reference(base_dir: &Path, file_path: &Path) -> PathBuf {
    if file_path.is_absolute() {
        clean_path(file_path)
    } else {
        clean_path(&base_dir.join(file_path))
    }
}

/// Lexically drop `.` and fold `..` so equal references compare equal.
fn clean_path(path: &Path) -> PathBuf {
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(cleaned.components().next_back(), Some(Component::Normal(_))) {
                    cleaned.pop();
                } else {
                    cleaned.push(component);
                }
            }
            other => cleaned.push(other),
        }
    }
    cleaned
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::Position;
    use crate::model::CommandType;
    use std::collections::HashMap;

    #[derive(Default)]
    struct MemoryLoader {
        files: HashMap<PathBuf, SequenceDocument>,
    }

    impl MemoryLoader {
        fn with(mut self, path: &str, document: SequenceDocument) -> Self {
            self.files.insert(PathBuf::from(path), document);
            self
        }
    }

    impl SequenceLoader for MemoryLoader {
        fn load(&self, path: &Path) -> Result<SequenceDocument> {
            self.files
                .get(path)
                .cloned()
                .ok_or_else(|| MacroError::FileMissing(path.display().to_string()))
        }
    }

    fn click(id: &str) -> Command {
        Command::click(ElementDescriptor {
            element_id: Some(id.to_string()),
            element_name: Some(format!("{id} button")),
            position: Some(Position::new(3, 4)),
            ..Default::default()
        })
    }

    fn flat(name: &str, commands: Vec<Command>) -> SequenceDocument {
        SequenceDocument::Flat(CommandSequence::from_commands(name, commands).unwrap())
    }

    #[test]
    fn test_command_row_round_trip() {
        let mut sequence = CommandSequence::new("s");
        sequence.push(click("a"));
        sequence.push(Command::wait(250).unwrap());
        let original = sequence.get(1).unwrap().clone();

        let item = UnifiedItem::from_command(original.clone());
        assert_eq!(item.step_number(), 2);
        assert_eq!(item.action(), "Wait");
        assert_eq!(item.value(), "250");
        assert_eq!(item.status, ItemStatus::Ready);
        assert_eq!(item.to_command(), Some(original));

        let named = UnifiedItem::from_command(click("ok"));
        assert_eq!(named.name, "ok button");
        assert_eq!(named.descriptor().unwrap().position, Some(Position::new(3, 4)));
    }

    #[test]
    fn test_references_do_not_convert_to_a_single_command() {
        let item = UnifiedItem::sequence_reference("login.json", 2).unwrap();
        assert_eq!(item.to_command(), None);
        assert_eq!(item.action(), "Run Sequence");
        assert_eq!(item.name, "login");
        assert!(UnifiedItem::sequence_reference("x.json", 0).is_err());
    }

    #[test]
    fn test_edits_renumber_rows_and_inline_commands() {
        let mut unified = UnifiedSequence::new("edit");
        unified.push(click("a").into());
        unified.push(UnifiedItem::sequence_reference("b.json", 1).unwrap());
        unified.push(click("c").into());

        unified.move_item(2, 0).unwrap();
        unified.duplicate(0).unwrap();
        let steps: Vec<usize> = unified.items().iter().map(|i| i.step_number()).collect();
        assert_eq!(steps, vec![1, 2, 3, 4]);
        assert_eq!(unified.get(1).unwrap().to_command().unwrap().step_number(), 2);
        assert!(unified.move_up(0).is_err());
        assert!(unified.remove(9).is_err());
    }

    #[test]
    fn test_set_status_keeps_numbering_and_rejects_bad_rows() {
        let mut unified = UnifiedSequence::new("status");
        unified.push(click("a").into());
        unified.push(click("b").into());

        unified.set_status(1, ItemStatus::Completed).unwrap();
        assert_eq!(unified.get(1).unwrap().status, ItemStatus::Completed);
        assert_eq!(unified.get(1).unwrap().step_number(), 2);

        let err = unified.set_status(2, ItemStatus::Failed).unwrap_err();
        assert!(err.to_string().contains("2 row(s)"), "{err}");
    }

    #[test]
    fn test_flatten_wraps_repeated_references_in_loops() {
        let loader = MemoryLoader::default().with("base/login.json", flat("login", vec![click("user"), click("pass")]));
        let mut unified = UnifiedSequence::new("suite");
        unified.push(click("open").into());
        unified.push(UnifiedItem::sequence_reference("login.json", 3).unwrap());
        unified.push(
            UnifiedItem::live_recording(CommandSequence::from_commands("live", vec![click("x")]).unwrap(), 1).unwrap(),
        );

        let flattened = unified.to_command_sequence(Path::new("base"), &loader).unwrap();
        assert!(flattened.skipped.is_empty());
        let kinds: Vec<CommandType> = flattened.sequence.commands().iter().map(|c| c.command_type()).collect();
        assert_eq!(
            kinds,
            vec![
                CommandType::Click,
                CommandType::LoopStart,
                CommandType::Click,
                CommandType::Click,
                CommandType::LoopEnd,
                CommandType::Click,
            ]
        );
        assert_eq!(flattened.sequence.get(1).unwrap().repeat_count(), 3);
        assert!(flattened.sequence.loop_report().is_balanced());
        assert_eq!(flattened.sequence.get(5).unwrap().step_number(), 6);
    }

    #[test]
    fn test_flatten_skips_missing_and_cyclic_references() {
        let mut looping = UnifiedSequence::new("loop");
        looping.push(UnifiedItem::sequence_reference("./a.json", 1).unwrap());
        let loader = MemoryLoader::default().with("dir/a.json", SequenceDocument::Unified(looping));

        let mut unified = UnifiedSequence::new("root");
        unified.push(UnifiedItem::sequence_reference("gone.json", 1).unwrap());
        unified.push(UnifiedItem::sequence_reference("a.json", 1).unwrap());
        unified.push(click("still-runs").into());

        let flattened = unified
            .flatten_from(Some(Path::new("dir/root.json")), Path::new("dir"), &loader)
            .unwrap();
        assert_eq!(flattened.sequence.len(), 1);
        assert_eq!(flattened.skipped.len(), 2);
        assert_eq!(flattened.skipped[0].step_number, 1);
        assert!(flattened.skipped[1].reason.contains("reference cycle"));
    }

    #[test]
    fn test_refresh_marks_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("present.json"), "{}").unwrap();
        let mut unified = UnifiedSequence::new("status");
        unified.push(UnifiedItem::sequence_reference("present.json", 1).unwrap());
        unified.push(UnifiedItem::sequence_reference("absent.json", 1).unwrap());

        assert_eq!(unified.refresh_file_status(dir.path()), 1);
        assert_eq!(unified.get(0).unwrap().status, ItemStatus::Ready);
        assert_eq!(unified.get(1).unwrap().status, ItemStatus::FileMissing);
        assert_eq!(unified.get(1).unwrap().status.to_string(), "File Missing");
    }

    #[test]
    fn test_clean_path_folds_dots() {
        assert_eq!(clean_path(Path::new("a/./b/../c.json")), PathBuf::from("a/c.json"));
        assert_eq!(resolve_reference(Path::new("dir"), Path::new("./x.json")), PathBuf::from("dir/x.json"));
    }
}
