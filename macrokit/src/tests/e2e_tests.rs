use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::{init_tracing, TEST_WINDOW};
use crate::platforms::headless::ElementSpec;
use crate::{
    storage, Command, CommandSequence, ElementDescriptor, ExecutionSettings, HeadlessEngine, MacroKit, PlayOptions,
    PlayerEvent, Rect, TargetWindow, UnifiedItem, UnifiedSequence,
};

fn login_form() -> (Arc<HeadlessEngine>, MacroKit) {
    let engine = Arc::new(HeadlessEngine::new());
    engine
        .add_window(TargetWindow::new(TEST_WINDOW, "crm.exe", "Sign in"))
        .unwrap();
    for (id, class, bounds) in [
        ("user", "Edit", Rect::new(10, 10, 200, 24)),
        ("password", "Edit", Rect::new(10, 44, 200, 24)),
        ("submit", "Button", Rect::new(10, 80, 80, 24)),
    ] {
        engine
            .add_element(TEST_WINDOW, ElementSpec::new(class, bounds).id(id))
            .unwrap();
    }
    let kit = MacroKit::new(engine.clone(), ExecutionSettings::fast()).unwrap();
    (engine, kit)
}

fn field(id: &str, class: &str) -> ElementDescriptor {
    ElementDescriptor {
        element_id: Some(id.to_string()),
        class_name: Some(class.to_string()),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_saved_sequence_replays_against_the_form() {
    init_tracing();
    let (engine, kit) = login_form();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("login.json");

    let mut sequence = CommandSequence::from_commands(
        "login",
        vec![
            Command::set_text(field("user", "Edit"), "alice"),
            Command::set_text(field("password", "Edit"), "hunter2"),
            Command::click(field("submit", "Button")),
        ],
    )
    .unwrap();
    storage::save_flat(&mut sequence, &path).unwrap();
    let loaded = storage::load_flat(&path).unwrap();
    assert_eq!(loaded, sequence);

    let player = kit.player();
    player.set_target_window(TargetWindow::new(TEST_WINDOW, "crm.exe", "Sign in"));
    let outcome = player.play_sequence(&loaded, 1, PlayOptions::default()).await.unwrap();
    info!(?outcome, "Replay finished");

    assert!(outcome.success);
    assert_eq!(outcome.commands_executed, 3);
    assert_eq!(engine.value_of(TEST_WINDOW, "user").as_deref(), Some("alice"));
    assert_eq!(engine.value_of(TEST_WINDOW, "password").as_deref(), Some("hunter2"));
}

#[tokio::test]
async fn test_unified_suite_flattens_and_plays() {
    init_tracing();
    let (engine, kit) = login_form();
    let dir = tempfile::tempdir().unwrap();

    let mut submit = CommandSequence::from_commands("submit", vec![Command::click(field("submit", "Button"))]).unwrap();
    storage::save_flat(&mut submit, &dir.path().join("submit.json")).unwrap();

    let mut suite = UnifiedSequence::new("suite");
    suite.push(Command::set_text(field("user", "Edit"), "bob").into());
    suite.push(UnifiedItem::sequence_reference("submit.json", 3).unwrap());
    suite.push(UnifiedItem::sequence_reference("missing.json", 1).unwrap());
    let suite_path = dir.path().join("suite.json");
    storage::save_unified(&mut suite, &suite_path).unwrap();

    let flattened = storage::flatten_file(&suite_path).unwrap();
    assert_eq!(flattened.skipped.len(), 1);

    let player = kit.player();
    player.set_target_window(TargetWindow::new(TEST_WINDOW, "crm.exe", "Sign in"));
    let outcome = player
        .play_sequence(&flattened.sequence, 1, PlayOptions::default())
        .await
        .unwrap();

    assert!(outcome.success, "{}", outcome.message);
    assert_eq!(outcome.commands_executed, 4);
    let clicks = engine
        .actions()
        .iter()
        .filter(|a| a.automation_id.as_deref() == Some("submit"))
        .count();
    assert_eq!(clicks, 3);
}

#[tokio::test]
async fn test_settings_update_applies_from_next_step() {
    init_tracing();
    let (_engine, kit) = login_form();
    let mut slow = ExecutionSettings::fast();
    slow.default_delay_ms = 200;
    kit.settings().update(slow).unwrap();

    let player = kit.player();
    player.set_target_window(TargetWindow::new(TEST_WINDOW, "crm.exe", "Sign in"));
    let mut events = player.subscribe();
    let sequence = CommandSequence::from_commands("clicks", vec![Command::click(field("submit", "Button")); 4]).unwrap();

    let started = std::time::Instant::now();
    let handle = player
        .play_sequence_async(&sequence, 1, PlayOptions::default())
        .await
        .unwrap();
    // Wait for the first step, then drop the delay for the rest of the run.
    loop {
        if let Ok(PlayerEvent::CommandExecuted { .. }) = events.recv().await {
            break;
        }
    }
    player.update_settings(ExecutionSettings::fast()).unwrap();

    let outcome = handle.wait().await.unwrap();
    assert!(outcome.success);
    assert!(started.elapsed() < Duration::from_millis(600));
}
