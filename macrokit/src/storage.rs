//! Sequence files
//!
//! Two document shapes share the same metadata header: a flat sequence with
//! a `Commands` list and a unified sequence with an `Items` list. Loading
//! detects which one a file holds.

use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

use crate::errors::{MacroError, Result};
use crate::model::CommandSequence;
use crate::unified::{Flattened, ItemKind, SequenceLoader, UnifiedSequence};

/// Contents of a sequence file
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SequenceDocument {
    Flat(CommandSequence),
    Unified(UnifiedSequence),
}

impl SequenceDocument {
    pub fn from_json(json: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        if value.get("Items").is_some() {
            let mut unified: UnifiedSequence = serde_json::from_value(value)?;
            unified.normalize()?;
            Ok(SequenceDocument::Unified(unified))
        } else {
            let mut flat: CommandSequence = serde_json::from_value(value)?;
            flat.normalize()?;
            Ok(SequenceDocument::Flat(flat))
        }
    }

    pub fn name(&self) -> &str {
        match self {
            SequenceDocument::Flat(sequence) => &sequence.name,
            SequenceDocument::Unified(unified) => &unified.name,
        }
    }

    pub fn is_unified(&self) -> bool {
        matches!(self, SequenceDocument::Unified(_))
    }

    /// View as a unified sequence; flat documents become one row per command.
    pub fn into_unified(self) -> UnifiedSequence {
        match self {
            SequenceDocument::Flat(sequence) => UnifiedSequence::from(sequence),
            SequenceDocument::Unified(unified) => unified,
        }
    }
}

/// Load either document shape. For unified documents the status of every
/// sequence reference is refreshed against the file's directory, so a
/// missing reference shows up as `FileMissing` instead of failing the load.
#[instrument(level = "debug")]
pub fn load_any(path: &Path) -> Result<SequenceDocument> {
    let json = std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => MacroError::FileMissing(path.display().to_string()),
        _ => MacroError::Io(e),
    })?;
    let mut document = SequenceDocument::from_json(&json)?;
    if let SequenceDocument::Unified(unified) = &mut document {
        let missing = unified.refresh_file_status(&base_dir_of(path));
        info!(path = %path.display(), items = unified.len(), missing, "Unified sequence loaded");
    } else {
        info!(path = %path.display(), "Sequence loaded");
    }
    Ok(document)
}

/// Load a flat sequence. Unified files are refused; flatten them first.
pub fn load_flat(path: &Path) -> Result<CommandSequence> {
    match load_any(path)? {
        SequenceDocument::Flat(sequence) => Ok(sequence),
        SequenceDocument::Unified(_) => Err(MacroError::InvalidOperation(format!(
            "{} holds a unified sequence; flatten it before use",
            path.display()
        ))),
    }
}

pub fn load_unified(path: &Path) -> Result<UnifiedSequence> {
    Ok(load_any(path)?.into_unified())
}

/// Write a flat sequence, bumping `LastModified`.
pub fn save_flat(sequence: &mut CommandSequence, path: &Path) -> Result<()> {
    sequence.touch();
    write_json(sequence, path)?;
    info!(path = %path.display(), steps = sequence.len(), "Sequence saved");
    Ok(())
}

/// Write a unified sequence, bumping `LastModified`. References inside the
/// file's directory are stored relative to it.
pub fn save_unified(sequence: &mut UnifiedSequence, path: &Path) -> Result<()> {
    let base = base_dir_of(path);
    let mut rows = sequence.items().to_vec();
    for row in &mut rows {
        if let ItemKind::SequenceReference { file_path, .. } = &mut row.item {
            if let Ok(relative) = file_path.strip_prefix(&base) {
                *file_path = relative.to_path_buf();
            }
        }
    }
    sequence.replace_all(rows)?;
    write_json(sequence, path)?;
    info!(path = %path.display(), items = sequence.len(), "Unified sequence saved");
    Ok(())
}

/// Load a unified file and flatten it into a playable sequence.
pub fn flatten_file(path: &Path) -> Result<Flattened> {
    let unified = load_unified(path)?;
    unified.flatten_from(Some(path), &base_dir_of(path), &FileLoader)
}

/// Loads references from the file system.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileLoader;

impl SequenceLoader for FileLoader {
    fn load(&self, path: &Path) -> Result<SequenceDocument> {
        load_any(path)
    }
}

fn base_dir_of(path: &Path) -> PathBuf {
    path.parent().map(Path::to_path_buf).unwrap_or_default()
}

fn write_json<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    let mut file = File::create(path)?;
    file.write_all(json.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{ElementDescriptor, Position};
    use crate::model::Command;
    use crate::unified::{ItemStatus, UnifiedItem};
    use std::time::Duration;

    fn sample() -> CommandSequence {
        let mut sequence = CommandSequence::from_commands(
            "login",
            vec![
                Command::click(ElementDescriptor::at(Position::new(10, 20))),
                Command::set_text(
                    ElementDescriptor {
                        element_id: Some("user".to_string()),
                        class_name: Some("Edit".to_string()),
                        ..Default::default()
                    },
                    "alice",
                ),
                Command::loop_start(2).unwrap(),
                Command::key_press(ElementDescriptor::default(), "Enter").unwrap(),
                Command::loop_end(),
            ],
        )
        .unwrap();
        sequence.target_process_name = "app.exe".to_string();
        sequence.target_window_title = "Sign in".to_string();
        sequence
    }

    #[test]
    fn test_flat_save_and_reload_preserves_commands() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("login.json");
        let mut sequence = sample();
        let before = sequence.last_modified;
        std::thread::sleep(Duration::from_millis(5));

        save_flat(&mut sequence, &path).unwrap();
        assert!(sequence.last_modified > before);

        let loaded = load_flat(&path).unwrap();
        assert_eq!(loaded, sequence);
        let document = load_any(&path).unwrap();
        assert!(!document.is_unified());
    }

    #[test]
    fn test_pascal_case_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.json");
        save_flat(&mut sample(), &path).unwrap();
        let json = std::fs::read_to_string(&path).unwrap();
        assert!(json.contains("\"TargetProcessName\""));
        assert!(json.contains("\"Type\": \"LoopStart\""));
        assert!(json.contains("\"IsLoopStart\": true"));
    }

    #[test]
    fn test_invalid_command_is_rejected_with_its_step() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(
            &path,
            r#"{"Name":"bad","Commands":[{"Type":"Click"},{"Type":"Wait","Value":"soon"}]}"#,
        )
        .unwrap();
        match load_any(&path) {
            Err(MacroError::InvalidCommand { step, .. }) => assert_eq!(step, 2),
            other => panic!("expected invalid command, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_any(&dir.path().join("nope.json")),
            Err(MacroError::FileMissing(_))
        ));
    }

    #[test]
    fn test_unified_load_marks_missing_reference() {
        let dir = tempfile::tempdir().unwrap();
        save_flat(&mut sample(), &dir.path().join("login.json")).unwrap();

        let mut unified = UnifiedSequence::new("suite");
        unified.push(UnifiedItem::sequence_reference(dir.path().join("login.json"), 2).unwrap());
        unified.push(UnifiedItem::sequence_reference("logout.json", 1).unwrap());
        let path = dir.path().join("suite.json");
        save_unified(&mut unified, &path).unwrap();

        // Absolute references inside the directory are stored relative.
        let json = std::fs::read_to_string(&path).unwrap();
        assert!(json.contains("\"FilePath\": \"login.json\""));

        let loaded = load_unified(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.get(0).unwrap().status, ItemStatus::Ready);
        assert_eq!(loaded.get(1).unwrap().status, ItemStatus::FileMissing);

        let flattened = flatten_file(&path).unwrap();
        assert_eq!(flattened.skipped.len(), 1);
        // LoopStart(2) + five login steps + LoopEnd
        assert_eq!(flattened.sequence.len(), 7);
        assert!(flattened.sequence.loop_report().is_balanced());
    }
}
