//! Single-list progression machine.
//!
//! ```text
//! Idle ──match──> Matching ──history full──> Celebrating ──ticket──> Idle (next target)
//!  ^                 │                            │
//!  └───mismatch──────┘                            └──all done──> Complete
//!
//! Matching ──history full on sentinel──> Spelling ──finish_spelling──> Celebrating
//! ```
//!
//! The machine is pure. Timers and store writes are returned as [`Effect`]s
//! and performed by the owner.

use std::collections::HashSet;

use tracing::{debug, info};

use super::state::{
    CelebrationTicket, Effect, MatchHistory, MatchRules, Mode, NavigationError, Phase,
    ProgressionSnapshot, Target, TicketScope,
};
use crate::channel::PredictionEvent;

#[derive(Debug, Clone)]
pub struct ProgressionMachine {
    scope: TicketScope,
    targets: Vec<Target>,
    rules: MatchRules,
    index: usize,
    completed: HashSet<String>,
    completion_order: Vec<String>,
    phase: Phase,
    ticket_seq: u64,
    stage_complete_emitted: bool,
    sentinel: Option<String>,
}

impl ProgressionMachine {
    pub fn new(scope: TicketScope, targets: Vec<Target>, rules: MatchRules) -> Self {
        let phase = if targets.is_empty() {
            Phase::Complete
        } else {
            Phase::Idle
        };
        Self {
            scope,
            targets,
            rules,
            index: 0,
            completed: HashSet::new(),
            completion_order: Vec::new(),
            phase,
            ticket_seq: 0,
            stage_complete_emitted: false,
            sentinel: None,
        }
    }

    /// Signing the target with this id hands control to a spelling machine.
    pub fn with_sentinel(mut self, target_id: impl Into<String>) -> Self {
        self.sentinel = Some(target_id.into());
        self
    }

    /// Start from previously completed targets. Unknown ids are ignored.
    ///
    /// The current target becomes the first incomplete one. A fully
    /// completed lesson starts in `Complete` without re-announcing it.
    pub fn resume<I, S>(mut self, completed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for id in completed {
            let id = id.as_ref();
            if self.targets.iter().any(|t| t.id == id) && self.completed.insert(id.to_string()) {
                self.completion_order.push(id.to_string());
            }
        }
        match self.targets.iter().position(|t| !self.completed.contains(&t.id)) {
            Some(first_open) => {
                self.index = first_open;
                self.phase = Phase::Idle;
            }
            None => {
                self.phase = Phase::Complete;
                self.stage_complete_emitted = true;
            }
        }
        self
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn rules(&self) -> &MatchRules {
        &self.rules
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn current_target(&self) -> Option<&Target> {
        self.targets.get(self.index)
    }

    pub fn is_completed(&self, target_id: &str) -> bool {
        self.completed.contains(target_id)
    }

    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }

    pub fn is_complete(&self) -> bool {
        self.phase == Phase::Complete
    }

    pub fn history_len(&self) -> usize {
        match &self.phase {
            Phase::Matching { history } => history.len(),
            _ => 0,
        }
    }

    /// Feed one prediction.
    pub fn on_prediction(&mut self, event: &PredictionEvent) -> Vec<Effect> {
        if !self.phase.accepts_input() {
            debug!(phase = %self.phase, label = %event.label, "Prediction dropped while advancing");
            return Vec::new();
        }
        let Some(target) = self.current_target().cloned() else {
            return Vec::new();
        };
        if self.completed.contains(&target.id) {
            debug!(target = %target.id, "Prediction dropped, target already completed");
            return Vec::new();
        }

        let same_label = target.matches(&event.label);
        let confident = event.confidence >= self.rules.threshold;
        let not_unstable = event.stable != Some(false);

        if !(same_label && confident && not_unstable) {
            let mut effects = Vec::new();
            if !self.history_is_empty() {
                debug!(target = %target.id, label = %event.label, "Mismatch cleared match history");
            }
            self.phase = Phase::Idle;
            if !same_label && confident {
                effects.push(Effect::AttemptRecorded {
                    target,
                    correct: false,
                });
            }
            return effects;
        }

        let mut history = match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Matching { history } => history,
            _ => MatchHistory::new(self.rules.repeat_count),
        };
        history.push(event.label.trim());
        debug!(
            target = %target.id,
            matches = history.len(),
            required = history.capacity(),
            "Prediction matched"
        );

        if !history.is_full() {
            self.phase = Phase::Matching { history };
            return Vec::new();
        }

        if self.sentinel.as_deref() == Some(target.id.as_str()) {
            info!(target = %target.id, "Sentinel signed, entering spelling");
            self.phase = Phase::Spelling;
            return vec![Effect::SpellingRequested { sentinel: target }];
        }

        self.complete_current()
    }

    /// Complete the current target without a prediction.
    pub fn force_complete_current(&mut self) -> Vec<Effect> {
        if !self.phase.accepts_input() {
            return Vec::new();
        }
        self.complete_current()
    }

    /// Close a spelling delegation: the sentinel completes and celebrates.
    pub fn finish_spelling(&mut self) -> Vec<Effect> {
        if self.phase != Phase::Spelling {
            return Vec::new();
        }
        self.phase = Phase::Idle;
        self.complete_current()
    }

    /// A celebration timer fired.
    pub fn on_celebration_elapsed(&mut self, ticket: CelebrationTicket) -> Vec<Effect> {
        match self.phase {
            Phase::Celebrating { ticket: current } if current == ticket => {}
            _ => {
                debug!(seq = ticket.seq, "Stale celebration ticket ignored");
                return Vec::new();
            }
        }

        if self.completed.len() >= self.targets.len() {
            self.phase = Phase::Complete;
            if self.stage_complete_emitted {
                return Vec::new();
            }
            self.stage_complete_emitted = true;
            info!(targets = self.targets.len(), "All targets completed");
            return vec![Effect::StageCompleted];
        }

        self.index = (self.index + 1) % self.targets.len();
        self.phase = Phase::Idle;
        self.advanced()
    }

    pub fn skip(&mut self) -> Result<Vec<Effect>, NavigationError> {
        let len = self.navigable_len()?;
        self.navigate((self.index + 1) % len)
    }

    pub fn previous(&mut self) -> Result<Vec<Effect>, NavigationError> {
        let len = self.navigable_len()?;
        self.navigate((self.index + len - 1) % len)
    }

    pub fn jump(&mut self, index: usize) -> Result<Vec<Effect>, NavigationError> {
        let len = self.navigable_len()?;
        if index >= len {
            return Err(NavigationError::OutOfRange { index, len });
        }
        self.navigate(index)
    }

    /// Forget all progress, including completions. Pending tickets go stale.
    pub fn reset(&mut self) {
        self.index = 0;
        self.completed.clear();
        self.completion_order.clear();
        self.ticket_seq += 1;
        self.stage_complete_emitted = false;
        self.phase = if self.targets.is_empty() {
            Phase::Complete
        } else {
            Phase::Idle
        };
        info!("Progression reset");
    }

    pub fn snapshot(&self) -> ProgressionSnapshot {
        ProgressionSnapshot {
            target_index: self.index,
            current_target: self.current_target().cloned(),
            completed: self.completion_order.clone(),
            total: self.targets.len(),
            is_advancing: self.phase.is_advancing(),
            mode: if self.phase == Phase::Spelling {
                Mode::Spelling
            } else {
                Mode::Normal
            },
            phase: self.phase.name().to_string(),
            history_len: self.history_len(),
            spelling: None,
        }
    }

    fn complete_current(&mut self) -> Vec<Effect> {
        let Some(target) = self.current_target().cloned() else {
            return Vec::new();
        };
        if self.completed.contains(&target.id) || self.phase.is_advancing() {
            return Vec::new();
        }

        self.completed.insert(target.id.clone());
        self.completion_order.push(target.id.clone());
        self.ticket_seq += 1;
        let ticket = CelebrationTicket {
            scope: self.scope,
            seq: self.ticket_seq,
        };
        self.phase = Phase::Celebrating { ticket };
        info!(
            target = %target.id,
            completed = self.completed.len(),
            total = self.targets.len(),
            "Target completed"
        );

        vec![
            Effect::AttemptRecorded {
                target: target.clone(),
                correct: true,
            },
            Effect::TargetCompleted {
                target,
                completed: self.completed.len(),
                total: self.targets.len(),
            },
            Effect::CelebrationStarted {
                ticket,
                delay: self.rules.celebration,
            },
        ]
    }

    fn navigable_len(&self) -> Result<usize, NavigationError> {
        if self.phase.is_advancing() {
            return Err(NavigationError::Busy(self.phase.name()));
        }
        match self.targets.len() {
            0 => Err(NavigationError::Empty),
            len => Ok(len),
        }
    }

    fn navigate(&mut self, index: usize) -> Result<Vec<Effect>, NavigationError> {
        self.index = index;
        if self.phase != Phase::Complete {
            self.phase = Phase::Idle;
        }
        debug!(index, "Navigated");
        Ok(self.advanced())
    }

    fn advanced(&self) -> Vec<Effect> {
        match self.current_target() {
            Some(target) => vec![Effect::Advanced {
                index: self.index,
                target: target.clone(),
            }],
            None => Vec::new(),
        }
    }

    fn history_is_empty(&self) -> bool {
        self.history_len() == 0
    }
}
