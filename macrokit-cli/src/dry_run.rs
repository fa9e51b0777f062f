//! Playback against an in-memory window
//!
//! The headless engine is seeded with one element per distinct target in the
//! sequence, so a dry run exercises loop handling, timing and the resolution
//! order without touching a real desktop.

use anyhow::Result;
use macrokit::platforms::headless::ElementSpec;
use macrokit::{
    CommandSequence, ElementDescriptor, ExecutionSettings, HeadlessEngine, MacroKit, PlayOptions, PlaybackOutcome,
    PlayerEvent, Rect, TargetWindow, WindowHandle,
};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};

const DRY_RUN_WINDOW: WindowHandle = WindowHandle(1);
const FOCUS_SINK_ID: &str = "dry-run-focus";

/// Build a headless window holding every element the sequence refers to.
pub fn seed_engine(sequence: &CommandSequence) -> Result<(Arc<HeadlessEngine>, TargetWindow)> {
    let engine = Arc::new(HeadlessEngine::new());
    let target = TargetWindow::new(
        DRY_RUN_WINDOW,
        sequence.target_process_name.clone(),
        sequence.target_window_title.clone(),
    );
    engine.add_window(target.clone())?;

    // Steps without a descriptor act on whatever has focus.
    engine.add_element(
        DRY_RUN_WINDOW,
        ElementSpec::new("Pane", Rect::new(-10_000, -10_000, 1, 1)).id(FOCUS_SINK_ID),
    )?;
    engine.focus(DRY_RUN_WINDOW, FOCUS_SINK_ID)?;

    let mut seen = HashSet::new();
    let mut unplaced = 0;
    for command in sequence.commands() {
        let descriptor = command.descriptor();
        if descriptor.is_empty() || !seen.insert(key_of(&descriptor)) {
            continue;
        }
        let bounds = match descriptor.position {
            Some(at) => Rect::new(at.x.saturating_sub(10), at.y.saturating_sub(10), 20, 20),
            None => {
                unplaced += 1;
                Rect::new(-5_000 + unplaced * 30, -5_000, 20, 20)
            }
        };
        let class = descriptor.class_name.clone().unwrap_or_else(|| "Pane".to_string());
        let mut spec = ElementSpec::new(class, bounds);
        if let Some(id) = &descriptor.element_id {
            spec = spec.id(id.clone());
        }
        if let Some(name) = &descriptor.element_name {
            spec = spec.name(name.clone());
        }
        engine.add_element(DRY_RUN_WINDOW, spec)?;
    }
    debug!(elements = seen.len(), "Headless window seeded");
    Ok((engine, target))
}

fn key_of(descriptor: &ElementDescriptor) -> String {
    match (&descriptor.element_id, descriptor.position) {
        (Some(id), _) => format!("id:{id}"),
        (None, Some(at)) => format!(
            "{}:{}:{},{}",
            descriptor.class_name.as_deref().unwrap_or_default(),
            descriptor.element_name.as_deref().unwrap_or_default(),
            at.x,
            at.y
        ),
        (None, None) => format!(
            "{}:{}",
            descriptor.class_name.as_deref().unwrap_or_default(),
            descriptor.element_name.as_deref().unwrap_or_default()
        ),
    }
}

/// Play the sequence headlessly, printing one line per event. Ctrl+C stops
/// the run at the next step boundary.
pub async fn play(
    sequence: &CommandSequence,
    settings: ExecutionSettings,
    repeat: u32,
    options: PlayOptions,
) -> Result<PlaybackOutcome> {
    let (engine, target) = seed_engine(sequence)?;
    let kit = MacroKit::new(engine, settings)?;
    let player = kit.player();
    player.set_target_window(target);

    let mut events = player.subscribe();
    let handle = player.play_sequence_async(sequence, repeat, options).await?;
    info!(name = %sequence.name, repeat, "Dry run started");

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(PlayerEvent::PlaybackCompleted(_)) | Err(RecvError::Closed) => break,
                Ok(event) => println!("{}", render(&event)),
                Err(RecvError::Lagged(missed)) => debug!(missed, "Event printer fell behind"),
            },
            _ = tokio::signal::ctrl_c() => {
                println!("stopping...");
                player.stop().await;
            }
        }
    }
    Ok(handle.wait().await?)
}

pub fn render(event: &PlayerEvent) -> String {
    match event {
        PlayerEvent::CommandExecuted {
            step_number,
            total_steps,
            repetition,
            success,
            error,
            ..
        } => {
            let status = if *success { "ok" } else { "FAILED" };
            let mut line = format!("[run {repetition}] step {step_number}/{total_steps} {status}");
            if let Some(error) = error {
                line.push_str(": ");
                line.push_str(error);
            }
            line
        }
        PlayerEvent::PlaybackStateChanged(state) => format!("playback {state:?}"),
        PlayerEvent::PlaybackError { step_number, message } => format!("error at step {step_number}: {message}"),
        PlayerEvent::PlaybackCompleted(outcome) => format!(
            "completed: success={} executed={}/{}",
            outcome.success, outcome.commands_executed, outcome.total_commands
        ),
    }
}
