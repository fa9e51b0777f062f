use macrokit::platforms::headless::ElementSpec;
use macrokit::{
    storage, Command, CommandSequence, CommandType, ElementDescriptor, ExecutionSettings, HeadlessEngine, MacroKit,
    PlayOptions, PlayerEvent, Position, Rect, TargetWindow, UnifiedItem, WindowHandle,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;

const WINDOW: WindowHandle = WindowHandle(0xbeef);

fn target() -> TargetWindow {
    TargetWindow::new(WINDOW, "editor.exe", "Document")
}

fn setup() -> (Arc<HeadlessEngine>, MacroKit) {
    let engine = Arc::new(HeadlessEngine::new());
    engine.add_window(target()).unwrap();
    for (index, id) in ["a", "b", "c", "d"].iter().enumerate() {
        engine
            .add_element(
                WINDOW,
                ElementSpec::new("Button", Rect::new(index as i32 * 50, 0, 40, 20)).id(*id),
            )
            .unwrap();
    }
    engine
        .add_element(WINDOW, ElementSpec::new("Edit", Rect::new(0, 40, 300, 20)).id("txt"))
        .unwrap();
    let kit = MacroKit::new(engine.clone(), ExecutionSettings::fast()).unwrap();
    (engine, kit)
}

fn button(id: &str) -> Command {
    Command::click(ElementDescriptor {
        element_id: Some(id.to_string()),
        class_name: Some("Button".to_string()),
        ..Default::default()
    })
}

fn executed_steps(rx: &mut broadcast::Receiver<PlayerEvent>) -> Vec<usize> {
    let mut steps = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(PlayerEvent::CommandExecuted { step_number, .. }) => steps.push(step_number),
            Ok(_) | Err(TryRecvError::Lagged(_)) => {}
            Err(TryRecvError::Empty | TryRecvError::Closed) => return steps,
        }
    }
}

#[tokio::test]
async fn test_n_commands_times_r_repetitions_in_step_order() {
    let (engine, kit) = setup();
    let player = kit.player();
    player.set_target_window(target());

    for (n, r) in [(1usize, 1u32), (3, 2), (4, 3)] {
        let ids = ["a", "b", "c", "d"];
        let commands = ids[..n].iter().map(|id| button(id)).collect();
        let sequence = CommandSequence::from_commands("grid", commands).unwrap();
        let mut rx = player.subscribe();
        let before = engine.actions().len();

        let outcome = player.play_sequence(&sequence, r, PlayOptions::default()).await.unwrap();

        let expected = n * r as usize;
        assert!(outcome.success);
        assert_eq!(outcome.commands_executed, expected);
        assert_eq!(outcome.total_commands, expected);
        assert_eq!(engine.actions().len() - before, expected);
        let order: Vec<usize> = (0..r).flat_map(|_| 1..=n).collect();
        assert_eq!(executed_steps(&mut rx), order);
    }
}

#[tokio::test]
async fn test_loop_start_three_runs_its_body_three_times() {
    let (engine, kit) = setup();
    let player = kit.player();
    player.set_target_window(target());
    let sequence = CommandSequence::from_commands(
        "loop",
        vec![Command::loop_start(3).unwrap(), button("a"), Command::loop_end(), button("b")],
    )
    .unwrap();
    let mut rx = player.subscribe();

    let outcome = player.play_sequence(&sequence, 1, PlayOptions::default()).await.unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.commands_executed, 4);
    assert_eq!(executed_steps(&mut rx), vec![2, 2, 2, 4]);
    let ids: Vec<Option<String>> = engine.actions().into_iter().map(|a| a.automation_id).collect();
    assert_eq!(ids.last().cloned().flatten().as_deref(), Some("b"));
}

#[tokio::test]
async fn test_infinite_run_stops_cleanly() {
    let (_engine, kit) = setup();
    let player = kit.player();
    player.set_target_window(target());
    let sequence = CommandSequence::from_commands("spin", vec![button("a"), button("b")]).unwrap();
    let mut rx = player.subscribe();

    let handle = player
        .play_sequence_async(&sequence, 0, PlayOptions::default())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(40)).await;
    player.stop().await;
    executed_steps(&mut rx);

    tokio::time::sleep(Duration::from_millis(40)).await;
    assert!(executed_steps(&mut rx).is_empty());
    let outcome = handle.wait().await.unwrap();
    assert!(outcome.stopped);

    // Stop from Idle is a no-op.
    player.stop().await;
}

#[tokio::test]
async fn test_continue_on_error_reports_partial_execution() {
    let (_engine, kit) = setup();
    let mut settings = ExecutionSettings::fast();
    settings.max_wait_for_element_ms = 80;
    kit.settings().update(settings).unwrap();
    let player = kit.player();
    player.set_target_window(target());
    let sequence = CommandSequence::from_commands("holes", vec![button("a"), button("zzz"), button("c")]).unwrap();
    let mut rx = player.subscribe();

    let outcome = player.play_sequence(&sequence, 1, PlayOptions::default()).await.unwrap();

    assert!(!outcome.success);
    assert!(outcome.commands_executed < outcome.total_commands);
    let mut completed = None;
    let mut failures = Vec::new();
    while let Ok(event) = rx.try_recv() {
        match event {
            PlayerEvent::CommandExecuted {
                step_number,
                success: false,
                error,
                ..
            } => failures.push((step_number, error)),
            PlayerEvent::PlaybackCompleted(outcome) => completed = Some(outcome),
            _ => {}
        }
    }
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, 2);
    assert!(failures[0].1.as_deref().unwrap_or_default().contains("zzz"));
    assert_eq!(completed.map(|o| o.success), Some(false));
}

#[test]
fn test_recorded_sequence_survives_save_and_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("recorded.json");
    let mut sequence = CommandSequence::from_commands(
        "recorded",
        vec![
            button("btnA"),
            Command::set_text(
                ElementDescriptor {
                    element_id: Some("txtB".to_string()),
                    position: Some(Position::new(5, 45)),
                    ..Default::default()
                },
                "hello",
            ),
            Command::wait(500).unwrap(),
        ],
    )
    .unwrap();
    storage::save_flat(&mut sequence, &path).unwrap();

    let reloaded = storage::load_flat(&path).unwrap();
    let shape = |s: &CommandSequence| -> Vec<(CommandType, String, usize)> {
        s.commands()
            .iter()
            .map(|c| (c.command_type(), c.value().to_string(), c.step_number()))
            .collect()
    };
    assert_eq!(shape(&reloaded), shape(&sequence));
    assert_eq!(reloaded, sequence);
}

#[test]
fn test_command_round_trips_through_unified_item() {
    let mut sequence = CommandSequence::new("rt");
    sequence.push(button("a"));
    sequence.push(Command::key_press(ElementDescriptor::default(), "Enter").unwrap());
    sequence.push(Command::loop_start(4).unwrap());
    sequence.push(Command::loop_end());
    for command in sequence.commands() {
        let item = UnifiedItem::from_command(command.clone());
        assert_eq!(item.to_command().as_ref(), Some(command));
    }
}

#[test]
fn test_edits_keep_step_numbers_contiguous() {
    let mut sequence = CommandSequence::new("edits");
    for id in ["a", "b", "c", "d"] {
        sequence.push(button(id));
    }
    sequence.remove(1).unwrap();
    sequence.insert(0, Command::wait(10).unwrap()).unwrap();
    sequence.move_item(3, 1).unwrap();
    sequence.duplicate(2).unwrap();
    sequence.move_down(0).unwrap();

    let steps: Vec<usize> = sequence.commands().iter().map(|c| c.step_number()).collect();
    assert_eq!(steps, (1..=sequence.len()).collect::<Vec<_>>());
}

#[test]
fn test_loop_report_names_both_counts() {
    let sequence = CommandSequence::from_commands(
        "unbalanced",
        vec![Command::loop_start(2).unwrap(), Command::loop_start(2).unwrap(), button("a"), Command::loop_end()],
    )
    .unwrap();
    let report = sequence.loop_report();
    assert!(!report.is_balanced());
    assert_eq!((report.loop_starts, report.loop_ends), (2, 1));
    let message = report.to_string();
    assert!(message.contains('2') && message.contains('1'));
}
