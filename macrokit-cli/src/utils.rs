use anyhow::{Context, Result};
use macrokit::{storage, CommandSequence, ElementDescriptor, ExecutionSettings, SequenceDocument};
use std::path::Path;
use tracing::{warn, Level};
use tracing_subscriber::EnvFilter;

pub fn init_logging(verbose: bool) -> Result<()> {
    let log_level = if verbose { Level::DEBUG } else { Level::WARN };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    Ok(())
}

pub fn load_settings(path: Option<&Path>) -> Result<ExecutionSettings> {
    match path {
        Some(path) => ExecutionSettings::load_from_file(path)
            .with_context(|| format!("failed to read settings from {}", path.display())),
        None => Ok(ExecutionSettings::default()),
    }
}

/// Load a file as a playable sequence, flattening unified files.
pub fn load_playable(path: &Path) -> Result<CommandSequence> {
    let document = storage::load_any(path).with_context(|| format!("failed to load {}", path.display()))?;
    match document {
        SequenceDocument::Flat(sequence) => Ok(sequence),
        SequenceDocument::Unified(_) => {
            let flattened = storage::flatten_file(path)?;
            for skipped in &flattened.skipped {
                warn!(step = skipped.step_number, name = %skipped.name, reason = %skipped.reason, "Item skipped");
            }
            Ok(flattened.sequence)
        }
    }
}

/// Short form of a descriptor for tables: `#id Class 'name' @x,y`.
pub fn describe(descriptor: &ElementDescriptor) -> String {
    let mut parts = Vec::new();
    if let Some(id) = &descriptor.element_id {
        parts.push(format!("#{id}"));
    }
    if let Some(class) = &descriptor.class_name {
        parts.push(class.clone());
    }
    if let Some(name) = &descriptor.element_name {
        parts.push(format!("'{name}'"));
    }
    if let Some(position) = descriptor.position {
        parts.push(format!("@{},{}", position.x, position.y));
    }
    if parts.is_empty() {
        "-".to_string()
    } else {
        parts.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use macrokit::Position;

    #[test]
    fn test_describe() {
        assert_eq!(describe(&ElementDescriptor::default()), "-");
        let descriptor = ElementDescriptor {
            element_id: Some("ok".to_string()),
            class_name: Some("Button".to_string()),
            element_name: None,
            position: Some(Position::new(3, 9)),
        };
        assert_eq!(describe(&descriptor), "#ok Button @3,9");
    }
}
