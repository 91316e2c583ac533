use std::sync::{Arc, PoisonError, RwLock};

use super::{Board, StageResult, StageStatus, TrackerError};

/// A board shared between one writer and any number of pollers.
///
/// Updates run against a copy and replace the board only on success, so a
/// reader sees either the old board or the new one, never half a stage.
#[derive(Debug, Clone)]
pub struct SharedBoard {
    inner: Arc<RwLock<Board>>,
}

impl SharedBoard {
    pub fn new(board: Board) -> Self {
        Self {
            inner: Arc::new(RwLock::new(board)),
        }
    }

    pub fn snapshot(&self) -> Board {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot()
    }

    /// Run `f` on a working copy and swap it in if `f` succeeds.
    pub fn update<T>(
        &self,
        f: impl FnOnce(&mut Board) -> Result<T, TrackerError>,
    ) -> Result<T, TrackerError> {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = guard.clone();
        let out = f(&mut next)?;
        *guard = next;
        Ok(out)
    }

    pub fn advance_stage(
        &self,
        stage_id: &str,
        status: StageStatus,
        progress: f64,
        result: Option<StageResult>,
    ) -> Result<Board, TrackerError> {
        self.update(|board| {
            board.advance_stage(stage_id, status, progress, result)?;
            Ok(board.snapshot())
        })
    }

    pub fn mark_failed(&self, stage_id: &str, reason: &str) -> Result<Board, TrackerError> {
        self.update(|board| {
            board.mark_failed(stage_id, reason)?;
            Ok(board.snapshot())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::StageDefinition;

    fn shared() -> SharedBoard {
        SharedBoard::new(
            Board::create(
                "t",
                "shared",
                vec![
                    StageDefinition::new("a", "A", ""),
                    StageDefinition::new("b", "B", ""),
                ],
            )
            .unwrap(),
        )
    }

    #[test]
    fn failed_update_leaves_board_untouched() {
        let board = shared();
        let before = board.snapshot();
        let err = board.update(|b| {
            b.advance_stage("a", StageStatus::Running, 0.5, None)?;
            b.advance_stage("missing", StageStatus::Running, 0.5, None)
        });
        assert!(err.is_err());
        assert_eq!(board.snapshot(), before);
    }

    #[test]
    fn advance_returns_fresh_snapshot() {
        let board = shared();
        let snap = board
            .advance_stage("a", StageStatus::Completed, 1.0, None)
            .unwrap();
        assert_eq!(snap.current_stage_index(), 1);
        assert_eq!(board.snapshot(), snap);
    }

    #[test]
    fn readers_on_other_threads_see_whole_updates() {
        let board = shared();
        let reader = board.clone();

        let handle = std::thread::spawn(move || {
            for _ in 0..500 {
                let snap = reader.snapshot();
                let a = snap.stage("a").unwrap();
                // status and progress always move together
                if a.status() == StageStatus::Completed {
                    assert_eq!(a.progress(), 1.0);
                }
                assert!(snap.current_stage_index() <= snap.stages().len());
            }
        });

        board
            .advance_stage("a", StageStatus::Running, 0.5, None)
            .unwrap();
        board
            .advance_stage("a", StageStatus::Completed, 1.0, None)
            .unwrap();
        board.mark_failed("b", "stop").unwrap();

        handle.join().unwrap();
        assert_eq!(board.snapshot().current_stage_index(), 1);
    }
}
