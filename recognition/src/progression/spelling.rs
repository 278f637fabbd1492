//! Parent lesson plus the nested name-spelling machine.
//!
//! While spelling is active the parent sits in `Phase::Spelling` and drops
//! its own domain's predictions; letter predictions drive the child. When the
//! child completes, the parent's sentinel target completes and celebrates.

use serde::{Deserialize, Serialize};
use tracing::info;

use super::machine::ProgressionMachine;
use super::state::{
    CelebrationTicket, Effect, MatchRules, NavigationError, ProgressionSnapshot, Target,
    TicketScope,
};
use crate::channel::PredictionEvent;

/// Name used when the learner's name has no letters.
pub const DEFAULT_SPELLING_NAME: &str = "USER";

/// Uppercased A-Z letters of `raw`, or [`DEFAULT_SPELLING_NAME`].
pub fn spelling_name(raw: Option<&str>) -> String {
    let letters: String = raw
        .unwrap_or_default()
        .chars()
        .filter(|c| c.is_ascii_alphabetic())
        .map(|c| c.to_ascii_uppercase())
        .collect();
    if letters.is_empty() {
        DEFAULT_SPELLING_NAME.to_string()
    } else {
        letters
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpellingConfig {
    /// Label of the parent target that starts spelling.
    pub sentinel: String,
    /// Already normalized with [`spelling_name`].
    pub name: String,
    pub rules: MatchRules,
}

/// Which listener a prediction came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredictionSource {
    Lesson,
    Spelling,
}

#[derive(Debug, Clone)]
struct SpellingRun {
    name: String,
    machine: ProgressionMachine,
}

#[derive(Debug, Clone)]
pub struct LessonProgression {
    parent: ProgressionMachine,
    spelling: Option<SpellingConfig>,
    active: Option<SpellingRun>,
}

impl LessonProgression {
    pub fn new(targets: Vec<Target>, rules: MatchRules, spelling: Option<SpellingConfig>) -> Self {
        let sentinel_id = spelling.as_ref().and_then(|config| {
            targets
                .iter()
                .find(|t| t.matches(&config.sentinel))
                .map(|t| t.id.clone())
        });
        let mut parent = ProgressionMachine::new(TicketScope::Lesson, targets, rules);
        if let Some(id) = sentinel_id {
            parent = parent.with_sentinel(id);
        }
        Self {
            parent,
            spelling,
            active: None,
        }
    }

    /// Start from previously completed target ids.
    pub fn resume<I, S>(mut self, completed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.parent = self.parent.resume(completed);
        self
    }

    pub fn lesson(&self) -> &ProgressionMachine {
        &self.parent
    }

    pub fn is_spelling(&self) -> bool {
        self.active.is_some()
    }

    pub fn is_complete(&self) -> bool {
        self.parent.is_complete()
    }

    /// Label the learner should sign next, letter-level while spelling.
    pub fn current_label(&self) -> Option<&str> {
        match &self.active {
            Some(run) => run.machine.current_target().map(|t| t.label.as_str()),
            None => self.parent.current_target().map(|t| t.label.as_str()),
        }
    }

    /// Which listener currently drives progress.
    pub fn active_source(&self) -> PredictionSource {
        if self.active.is_some() {
            PredictionSource::Spelling
        } else {
            PredictionSource::Lesson
        }
    }

    /// Whether the driving machine currently takes predictions.
    pub fn accepting_input(&self) -> bool {
        match &self.active {
            Some(run) => run.machine.phase().accepts_input(),
            None => self.parent.phase().accepts_input(),
        }
    }

    pub fn on_prediction(
        &mut self,
        source: PredictionSource,
        event: &PredictionEvent,
    ) -> Vec<Effect> {
        if source != self.active_source() {
            return Vec::new();
        }
        match &mut self.active {
            Some(run) => {
                let effects = run.machine.on_prediction(event);
                self.translate_child(effects)
            }
            None => {
                let effects = self.parent.on_prediction(event);
                self.expand_parent(effects)
            }
        }
    }

    pub fn on_celebration_elapsed(&mut self, ticket: CelebrationTicket) -> Vec<Effect> {
        if ticket.scope == TicketScope::Lesson {
            return self.parent.on_celebration_elapsed(ticket);
        }
        let Some(run) = self.active.as_mut() else {
            return Vec::new();
        };
        let effects = run.machine.on_celebration_elapsed(ticket);
        self.translate_child(effects)
    }

    /// Mark the current letter as signed. No-op outside spelling.
    pub fn skip_letter(&mut self) -> Vec<Effect> {
        match &mut self.active {
            Some(run) => {
                info!(position = run.machine.index(), "Letter skipped");
                let effects = run.machine.force_complete_current();
                self.translate_child(effects)
            }
            None => Vec::new(),
        }
    }

    pub fn skip(&mut self) -> Result<Vec<Effect>, NavigationError> {
        self.parent.skip()
    }

    pub fn previous(&mut self) -> Result<Vec<Effect>, NavigationError> {
        self.parent.previous()
    }

    pub fn jump(&mut self, index: usize) -> Result<Vec<Effect>, NavigationError> {
        self.parent.jump(index)
    }

    pub fn reset(&mut self) {
        self.active = None;
        self.parent.reset();
    }

    pub fn snapshot(&self) -> ProgressionSnapshot {
        let mut snapshot = self.parent.snapshot();
        snapshot.spelling = self
            .active
            .as_ref()
            .map(|run| Box::new(run.machine.snapshot()));
        snapshot
    }

    fn expand_parent(&mut self, effects: Vec<Effect>) -> Vec<Effect> {
        let mut out = Vec::with_capacity(effects.len());
        for effect in effects {
            match effect {
                Effect::SpellingRequested { sentinel } => out.extend(self.start_spelling(sentinel)),
                other => out.push(other),
            }
        }
        out
    }

    fn start_spelling(&mut self, sentinel: Target) -> Vec<Effect> {
        let Some(config) = &self.spelling else {
            return self.parent.finish_spelling();
        };
        let letters: Vec<Target> = config
            .name
            .chars()
            .enumerate()
            .map(|(i, c)| Target::positional(i, c.to_string()))
            .collect();
        info!(sentinel = %sentinel.id, name = %config.name, "Spelling started");
        let name = config.name.clone();
        let first = letters.first().cloned();
        self.active = Some(SpellingRun {
            name: name.clone(),
            machine: ProgressionMachine::new(TicketScope::Spelling, letters, config.rules),
        });

        let mut effects = vec![Effect::SpellingStarted { name }];
        if let Some(first) = first {
            effects.push(Effect::LetterAdvanced {
                position: 0,
                letter: first.label,
            });
        }
        effects
    }

    fn translate_child(&mut self, effects: Vec<Effect>) -> Vec<Effect> {
        let mut out = Vec::with_capacity(effects.len());
        for effect in effects {
            match effect {
                Effect::TargetCompleted { target, .. } => {
                    let position = self.active.as_ref().map_or(0, |run| run.machine.index());
                    out.push(Effect::LetterCompleted {
                        position,
                        letter: target.label,
                    });
                }
                Effect::Advanced { index, target } => out.push(Effect::LetterAdvanced {
                    position: index,
                    letter: target.label,
                }),
                Effect::CelebrationStarted { .. } => out.push(effect),
                Effect::StageCompleted => {
                    if let Some(run) = self.active.take() {
                        info!(name = %run.name, "Spelling finished");
                        out.push(Effect::SpellingFinished { name: run.name });
                    }
                    out.extend(self.parent.finish_spelling());
                }
                // letter attempts are not tracked
                _ => {}
            }
        }
        out
    }
}
