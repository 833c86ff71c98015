use tracing::debug;

use crate::{Result, StitchError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StitchStage {
    Idle,
    Extracting,
    Aligning,
    GraphBuilt,
    BundleAdjusted,
    Composited,
    Refined,
    Done,
    Aborted,
}

impl StitchStage {
    pub fn is_terminal(self) -> bool {
        matches!(self, StitchStage::Done | StitchStage::Aborted)
    }

    /// Forward edges of the pipeline; `Aborted` is reachable from every
    /// non-terminal stage and `Composited` may skip refinement.
    pub fn can_transition_to(self, next: StitchStage) -> bool {
        use StitchStage::*;
        if next == Aborted {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (Idle, Extracting)
                | (Extracting, Aligning)
                | (Aligning, GraphBuilt)
                | (GraphBuilt, BundleAdjusted)
                | (BundleAdjusted, Composited)
                | (Composited, Refined)
                | (Composited, Done)
                | (Refined, Done)
        )
    }
}

/// Current stage plus every stage visited so far.
#[derive(Debug, Clone)]
pub struct StageMachine {
    current: StitchStage,
    history: Vec<StitchStage>,
}

impl StageMachine {
    pub fn new() -> Self {
        Self {
            current: StitchStage::Idle,
            history: vec![StitchStage::Idle],
        }
    }

    pub fn current(&self) -> StitchStage {
        self.current
    }

    pub fn history(&self) -> &[StitchStage] {
        &self.history
    }

    pub fn advance(&mut self, next: StitchStage) -> Result<()> {
        if !self.current.can_transition_to(next) {
            return Err(StitchError::IllegalTransition {
                from: self.current,
                to: next,
            });
        }
        debug!(from = ?self.current, to = ?next, "stage transition");
        self.current = next;
        self.history.push(next);
        Ok(())
    }

    /// Moves to `Aborted` unless already terminal.
    pub fn abort(&mut self) {
        if !self.current.is_terminal() {
            self.current = StitchStage::Aborted;
            self.history.push(StitchStage::Aborted);
        }
    }

    pub fn into_history(self) -> Vec<StitchStage> {
        self.history
    }
}

impl Default for StageMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use StitchStage::*;

    #[test]
    fn full_run_with_refinement() {
        let mut m = StageMachine::new();
        for s in [Extracting, Aligning, GraphBuilt, BundleAdjusted, Composited, Refined, Done] {
            m.advance(s).unwrap();
        }
        assert_eq!(m.current(), Done);
        assert_eq!(m.history().len(), 8);
    }

    #[test]
    fn refinement_can_be_skipped() {
        let mut m = StageMachine::new();
        for s in [Extracting, Aligning, GraphBuilt, BundleAdjusted, Composited, Done] {
            m.advance(s).unwrap();
        }
        assert_eq!(m.current(), Done);
    }

    #[test]
    fn illegal_transitions_are_rejected() {
        let mut m = StageMachine::new();
        assert_eq!(
            m.advance(GraphBuilt),
            Err(StitchError::IllegalTransition {
                from: Idle,
                to: GraphBuilt
            })
        );
        assert_eq!(m.current(), Idle);
        assert!(m.advance(Refined).is_err());
    }

    #[test]
    fn abort_from_any_live_stage() {
        let mut m = StageMachine::new();
        m.advance(Extracting).unwrap();
        m.advance(Aligning).unwrap();
        m.abort();
        assert_eq!(m.current(), Aborted);
        assert!(m.advance(Done).is_err());

        m.abort();
        assert_eq!(m.history(), &[Idle, Extracting, Aligning, Aborted]);
    }

    #[test]
    fn done_is_terminal() {
        assert!(!Done.can_transition_to(Aborted));
        assert!(Idle.can_transition_to(Aborted));
        assert!(Refined.can_transition_to(Aborted));
    }
}
