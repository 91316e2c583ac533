use std::thread;

use slidewright::tracker::{
    Board, CONTENT_STAGE, OUTLINE_STAGE, RENDERING_STAGE, SharedBoard, StageStatus, TrackerError,
    default_ppt_stages,
};

fn ppt_board() -> Board {
    Board::create("task-1", "Solar energy", default_ppt_stages("en")).unwrap()
}

#[test]
fn full_pipeline_reaches_the_end() {
    let mut board = ppt_board();
    for id in [OUTLINE_STAGE, CONTENT_STAGE, RENDERING_STAGE] {
        board
            .advance_stage(id, StageStatus::Running, 0.5, None)
            .unwrap();
        board
            .advance_stage(id, StageStatus::Completed, 0.2, None)
            .unwrap();
    }

    assert!(board.is_finished());
    assert!(board.current_stage().is_none());
    assert_eq!(board.current_stage_index(), 3);
    assert_eq!(board.overall_progress(), 1.0);
    assert!(!board.has_failed());
}

#[test]
fn failure_keeps_the_index_and_blocks_further_updates() {
    let mut board = ppt_board();
    board
        .advance_stage(OUTLINE_STAGE, StageStatus::Completed, 1.0, None)
        .unwrap();
    board.mark_failed(CONTENT_STAGE, "provider timeout").unwrap();

    assert_eq!(board.current_stage_index(), 1);
    assert!(board.has_failed());
    let stage = board.stage(CONTENT_STAGE).unwrap();
    assert_eq!(stage.result().unwrap()["error"], "provider timeout");

    let err = board
        .advance_stage(CONTENT_STAGE, StageStatus::Running, 0.5, None)
        .unwrap_err();
    assert!(matches!(err, TrackerError::StageTerminal { .. }));
}

#[test]
fn chinese_stage_names() {
    let board = Board::create("t", "太阳能", default_ppt_stages("zh")).unwrap();
    assert_eq!(board.stages()[0].name(), "大纲生成");
    assert_eq!(board.stages()[0].subtasks().len(), 3);
}

#[test]
fn board_survives_json() {
    let mut board = ppt_board();
    board
        .advance_stage(OUTLINE_STAGE, StageStatus::Running, 0.3, None)
        .unwrap();

    let json = serde_json::to_string(&board).unwrap();
    let back: Board = serde_json::from_str(&json).unwrap();
    assert_eq!(back, board);
    assert!(json.contains("\"status\":\"running\""));
}

#[test]
fn shared_board_failed_update_leaves_board_untouched() {
    let shared = SharedBoard::new(ppt_board());
    let before = shared.snapshot();

    let err = shared
        .advance_stage(OUTLINE_STAGE, StageStatus::Running, f64::NAN, None)
        .unwrap_err();
    assert!(matches!(err, TrackerError::InvalidProgress { .. }));
    assert_eq!(shared.snapshot(), before);
}

#[test]
fn readers_never_see_progress_go_backwards() {
    let shared = SharedBoard::new(ppt_board());

    let reader = {
        let shared = shared.clone();
        thread::spawn(move || {
            let mut last = 0.0;
            for _ in 0..500 {
                let progress = shared.snapshot().overall_progress();
                assert!(progress >= last);
                last = progress;
            }
        })
    };

    for step in 1..=20 {
        shared
            .advance_stage(
                CONTENT_STAGE,
                StageStatus::Running,
                step as f64 / 20.0,
                None,
            )
            .unwrap();
    }
    reader.join().unwrap();

    assert_eq!(
        shared.snapshot().stage(CONTENT_STAGE).unwrap().progress(),
        1.0
    );
}
