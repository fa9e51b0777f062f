//! Structural checks run before playback starts.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::model::{Command, CommandType, LoopReport};

/// A structural problem in a sequence. Some are fatal, some are warnings the
/// user may choose to override.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StructuralIssue {
    EmptySequence,
    /// Only loop markers, nothing to act on.
    NoExecutableCommands,
    /// A `LoopEnd` with no open loop before it.
    UnmatchedLoopEnd { step: usize },
    /// A loop opener never closed; its body runs once.
    UnclosedLoop { step: usize },
}

impl StructuralIssue {
    /// 1-based step the issue points at, when it points at one.
    pub fn step(&self) -> Option<usize> {
        match self {
            StructuralIssue::UnmatchedLoopEnd { step } | StructuralIssue::UnclosedLoop { step } => Some(*step),
            _ => None,
        }
    }
}

impl fmt::Display for StructuralIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StructuralIssue::EmptySequence => f.write_str("the sequence has no commands"),
            StructuralIssue::NoExecutableCommands => {
                f.write_str("the sequence only contains loop markers")
            }
            StructuralIssue::UnmatchedLoopEnd { step } => {
                write!(f, "step {step}: LoopEnd has no open LoopStart")
            }
            StructuralIssue::UnclosedLoop { step } => {
                write!(f, "step {step}: loop is never closed by a LoopEnd")
            }
        }
    }
}

/// Result of a successful pre-flight check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreflightReport {
    pub loops: LoopReport,
    /// Issues the caller may override.
    pub warnings: Vec<StructuralIssue>,
    /// Step invocations one outer repetition performs, loop bodies expanded.
    pub invocations_per_run: usize,
}

/// Validate a command list for playback.
///
/// Empty sequences and stray `LoopEnd`s are errors. Unclosed loop openers are
/// reported as warnings.
pub fn preflight(commands: &[Command]) -> Result<PreflightReport, StructuralIssue> {
    if commands.is_empty() {
        return Err(StructuralIssue::EmptySequence);
    }

    let mut open: Vec<usize> = Vec::new();
    let mut closed = vec![false; commands.len()];
    for (index, command) in commands.iter().enumerate() {
        match command.command_type() {
            CommandType::Loop | CommandType::LoopStart => open.push(index),
            CommandType::LoopEnd => match open.pop() {
                Some(opener) => closed[opener] = true,
                None => return Err(StructuralIssue::UnmatchedLoopEnd { step: index + 1 }),
            },
            _ => {}
        }
    }
    let warnings = open
        .iter()
        .map(|&index| StructuralIssue::UnclosedLoop { step: index + 1 })
        .collect();

    let mut multipliers: Vec<usize> = Vec::new();
    let mut invocations = 0usize;
    for (index, command) in commands.iter().enumerate() {
        let kind = command.command_type();
        if kind.is_loop_opener() {
            let iterations = if closed[index] { command.repeat_count() as usize } else { 1 };
            multipliers.push(iterations);
        } else if kind == CommandType::LoopEnd {
            multipliers.pop();
        } else {
            let weight = multipliers.iter().fold(1usize, |acc, m| acc.saturating_mul(*m));
            invocations = invocations.saturating_add(weight);
        }
    }
    if invocations == 0 {
        return Err(StructuralIssue::NoExecutableCommands);
    }

    Ok(PreflightReport {
        loops: LoopReport::from_commands(commands),
        warnings,
        invocations_per_run: invocations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::ElementDescriptor;

    fn click() -> Command {
        Command::click(ElementDescriptor::default())
    }

    #[test]
    fn test_empty_and_marker_only_sequences_are_rejected() {
        assert_eq!(preflight(&[]), Err(StructuralIssue::EmptySequence));
        let markers = vec![Command::loop_start(2).unwrap(), Command::loop_end()];
        assert_eq!(preflight(&markers), Err(StructuralIssue::NoExecutableCommands));
    }

    #[test]
    fn test_stray_loop_end_reports_its_step() {
        let commands = vec![click(), Command::loop_end(), click()];
        assert_eq!(
            preflight(&commands),
            Err(StructuralIssue::UnmatchedLoopEnd { step: 2 })
        );
    }

    #[test]
    fn test_nested_loops_multiply_invocations() {
        // click, loop 3 { click, loop 2 { click } }, click
        let commands = vec![
            click(),
            Command::loop_start(3).unwrap(),
            click(),
            Command::loop_start(2).unwrap(),
            click(),
            Command::loop_end(),
            Command::loop_end(),
            click(),
        ];
        let report = preflight(&commands).unwrap();
        assert_eq!(report.invocations_per_run, 1 + 3 + 6 + 1);
        assert!(report.warnings.is_empty());
        assert!(report.loops.is_balanced());
    }

    #[test]
    fn test_unclosed_loop_is_a_warning_and_runs_once() {
        let commands = vec![Command::loop_start(5).unwrap(), click(), click()];
        let report = preflight(&commands).unwrap();
        assert_eq!(report.warnings, vec![StructuralIssue::UnclosedLoop { step: 1 }]);
        assert_eq!(report.invocations_per_run, 2);
        assert!(!report.loops.is_balanced());
    }
}
