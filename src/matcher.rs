use rustfst::prelude::*;
use std::collections::BTreeMap;

use crate::graph::{ContextGraph, ContextLabel};

/// Active states of one decoding hypothesis, each with the best context
/// score reaching it. Owned by the decoder and only valid for the graph
/// build that produced it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextStates {
    generation: u64,
    scores: BTreeMap<StateId, f32>,
}

impl ContextStates {
    fn with_generation(generation: u64) -> Self {
        Self {
            generation,
            scores: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn get(&self, state: StateId) -> Option<f32> {
        self.scores.get(&state).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (StateId, f32)> + '_ {
        self.scores.iter().map(|(&state, &score)| (state, score))
    }

    /// Keep the better of the two scores if `state` is already active.
    /// Also how a decoder folds together the states of two hypotheses
    /// that collapse into one.
    pub fn merge(&mut self, state: StateId, score: f32) {
        self.scores
            .entry(state)
            .and_modify(|best| *best = best.max(score))
            .or_insert(score);
    }
}

/// Outcome of matching one decoded token.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextStep {
    /// Best score over every arc taken, finished or not
    pub partial_score: f32,
    /// Best score over arcs completing a context
    pub full_score: f32,
    /// Active states for the next token
    pub next_states: ContextStates,
}

impl ContextGraph {
    /// Active states holding only the start state, or nothing when the
    /// graph is empty.
    pub fn start_states(&self) -> ContextStates {
        let mut states = ContextStates::with_generation(self.generation);
        self.reseed(&mut states);
        states
    }

    /// Active states for this build from the decoder's own
    /// `(state, score)` pairs. States the graph does not have are left out.
    pub fn states_from<I>(&self, scores: I) -> ContextStates
    where
        I: IntoIterator<Item = (StateId, f32)>,
    {
        let mut states = ContextStates::with_generation(self.generation);
        let num_states = self.num_states();
        for (state, score) in scores {
            if (state as usize) < num_states {
                states.merge(state, score);
            }
        }
        states
    }

    /// Make the start state active again so that new matches can begin.
    /// States left over from an earlier build are dropped first.
    pub fn reseed(&self, states: &mut ContextStates) {
        if states.generation != self.generation {
            *states = ContextStates::with_generation(self.generation);
        }
        if self.graph.is_some() {
            states.merge(self.start_state(), 0.0);
        }
    }

    /// Advance `active_states` over the decoded token `label`.
    ///
    /// Arcs labelled with `label` and escape arcs are taken. Reaching a
    /// final state updates `full_score` and ends that match, every other
    /// destination is carried into `next_states`. The start state is
    /// never added back here, see [`ContextGraph::reseed`]. Unknown
    /// states, stale states and an empty graph all yield zero scores.
    pub fn next_context_states(&self, active_states: &ContextStates, label: Label) -> ContextStep {
        let mut step = ContextStep {
            partial_score: 0.0,
            full_score: 0.0,
            next_states: ContextStates::with_generation(self.generation),
        };
        let graph = match &self.graph {
            Some(graph) => graph,
            None => return step,
        };
        if active_states.is_empty() || active_states.generation != self.generation {
            return step;
        }

        for (state, score) in active_states.iter() {
            let Ok(trs) = graph.get_trs(state) else {
                continue;
            };
            for tr in trs.trs() {
                let eligible = match ContextLabel::from(tr.ilabel) {
                    ContextLabel::Escape => true,
                    ContextLabel::Token(token) => token == label,
                };
                if !eligible {
                    continue;
                }
                let context_score = score + *tr.weight.value();
                step.partial_score = step.partial_score.max(context_score);
                if graph.is_final(tr.nextstate).unwrap_or(false) {
                    step.full_score = step.full_score.max(context_score);
                } else {
                    step.next_states.merge(tr.nextstate, context_score);
                }
            }
        }
        step
    }
}
