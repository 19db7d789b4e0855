use anyhow::{anyhow, Result};
use rustfst::algorithms::determinize::{
    determinize_with_config, DeterminizeConfig, DeterminizeType,
};
use rustfst::prelude::*;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{ContextConfig, UnknownTokenPolicy};
use crate::{split_utf8_chars, StdVectorFst};

/// Input and output label of escape arcs.
pub const ESCAPE_LABEL: Label = EPS_LABEL;

/// Start state of the raw graph
const START_STATE: StateId = 0;
/// All contexts end in state 1 of the raw graph.
const FINAL_STATE: StateId = 1;

/// Shared by all graphs so that active states never outlive their build
static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

fn next_generation() -> u64 {
    NEXT_GENERATION.fetch_add(1, Ordering::Relaxed)
}

/// Negate every weight, turning rewards into tropical costs and back.
fn negate_weights(fst: &mut StdVectorFst) -> Result<()> {
    let states: Vec<StateId> = fst.states_iter().collect();
    for s in states {
        if let Some(weight) = fst.final_weight(s)? {
            fst.set_final(s, -*weight.value())?;
        }
        let mut trs = fst.tr_iter_mut(s)?;
        for idx in 0..trs.len() {
            let weight = -*trs[idx].weight.value();
            trs.set_weight(idx, TropicalWeight::from(weight))?;
        }
    }
    Ok(())
}

/// Determinize keeping the largest reward among paths that share a label
/// sequence. Min over negated rewards is max over rewards; the escape
/// label is an ordinary symbol to the functional determinizer.
fn determinize_max(ifst: &StdVectorFst) -> Result<StdVectorFst> {
    let mut costs = ifst.clone();
    negate_weights(&mut costs)?;
    let config = DeterminizeConfig {
        det_type: DeterminizeType::DeterminizeFunctional,
        ..DeterminizeConfig::default()
    };
    let mut graph: StdVectorFst = determinize_with_config(&costs, config)?;
    negate_weights(&mut graph)?;
    Ok(graph)
}

/// What an arc label means to the context graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextLabel {
    /// Give up the current partial match and go back to the start
    Escape,
    /// Consume one token of a context
    Token(Label),
}

impl From<Label> for ContextLabel {
    fn from(label: Label) -> Self {
        if label == ESCAPE_LABEL {
            ContextLabel::Escape
        } else {
            ContextLabel::Token(label)
        }
    }
}

impl From<ContextLabel> for Label {
    fn from(label: ContextLabel) -> Self {
        match label {
            ContextLabel::Escape => ESCAPE_LABEL,
            ContextLabel::Token(label) => label,
        }
    }
}

/// Biasing graph over a list of contexts (phrases), rewarding the
/// decoder for every token it matches and taking the reward back through
/// escape arcs when a match is abandoned.
#[derive(Debug)]
pub struct ContextGraph {
    pub(crate) config: ContextConfig,
    /// Kept across rebuilds
    pub(crate) symbol_table: Option<Arc<SymbolTable>>,
    /// Determinized graph, `None` when there is nothing to match
    pub(crate) graph: Option<StdVectorFst>,
    /// Unique per build so stale active states can be told apart
    pub(crate) generation: u64,
}

impl ContextGraph {
    pub fn new(config: ContextConfig) -> Self {
        Self {
            config,
            symbol_table: None,
            graph: None,
            generation: next_generation(),
        }
    }

    /// Build the graph for `contexts`, retaining `symbol_table` for later
    /// rebuilds. Contexts which are too long, past the `max_contexts`
    /// limit or contain unknown tokens are logged and left out.
    pub fn build_context_graph<S: AsRef<str>>(
        &mut self,
        contexts: &[S],
        symbol_table: Arc<SymbolTable>,
    ) -> Result<()> {
        self.symbol_table = Some(symbol_table);
        self.rebuild(contexts)
    }

    /// Build the graph again with the retained symbol table. Any active
    /// states obtained before this call become inert.
    pub fn rebuild<S: AsRef<str>>(&mut self, contexts: &[S]) -> Result<()> {
        let symbol_table = self
            .symbol_table
            .clone()
            .ok_or_else(|| anyhow!("Symbols table should not be empty"))?;
        self.config.validate()?;
        self.generation = next_generation();
        self.graph = None;
        if contexts.is_empty() {
            return Ok(());
        }

        let mut ofst = StdVectorFst::new();
        let start_state = ofst.add_state();
        let final_state = ofst.add_state();
        assert_eq!((start_state, final_state), (START_STATE, FINAL_STATE));
        ofst.set_start(start_state)?;
        ofst.set_final(final_state, TropicalWeight::one())?;

        info!("Contexts count size: {}", contexts.len());
        let mut count = 0;
        let mut accepted = 0;
        for context in contexts {
            let context = context.as_ref().trim();
            let chars = split_utf8_chars(context);
            if chars.is_empty() {
                continue;
            }
            if chars.len() > self.config.max_context_length {
                info!("Skip long context: {}", context);
                continue;
            }
            count += 1;
            if count > self.config.max_contexts {
                info!(
                    "Reached max contexts {}, ignoring the rest",
                    self.config.max_contexts
                );
                break;
            }
            if let Some((labels, complete)) = self.lookup_labels(&chars, &symbol_table) {
                if !labels.is_empty() {
                    self.add_context_path(&mut ofst, &labels, complete)?;
                    accepted += 1;
                }
            }
        }
        if accepted == 0 {
            info!("No usable contexts, context graph is empty");
            return Ok(());
        }

        let mut graph = determinize_max(&ofst)?;
        debug!(
            "Context graph has {} states ({} before determinization)",
            graph.num_states(),
            ofst.num_states()
        );
        tr_sort(&mut graph, ILabelCompare {});
        graph.set_input_symbols(Arc::clone(&symbol_table));
        graph.set_output_symbols(Arc::clone(&symbol_table));
        self.graph = Some(graph);
        Ok(())
    }

    /// Map tokens to labels. Returns the labels and whether all of them
    /// were found, or `None` if the context must be dropped.
    fn lookup_labels(
        &self,
        chars: &[&str],
        symbol_table: &SymbolTable,
    ) -> Option<(Vec<Label>, bool)> {
        let mut labels = Vec::with_capacity(chars.len());
        for ch in chars {
            match symbol_table.get_label(*ch) {
                Some(label) if label != ESCAPE_LABEL => labels.push(label),
                _ => {
                    warn!("Ignore unknown word found during compilation: {}", ch);
                    return match self.config.unknown_token_policy {
                        UnknownTokenPolicy::Truncate => Some((labels, false)),
                        UnknownTokenPolicy::Skip => None,
                    };
                }
            }
        }
        Some((labels, true))
    }

    /// Add one linear path from the start state. Complete paths end in the
    /// final state, truncated ones in a fresh dead-end state.
    fn add_context_path(
        &self,
        ofst: &mut StdVectorFst,
        labels: &[Label],
        complete: bool,
    ) -> Result<()> {
        let context_score = self.config.context_score;
        let mut prev_state = START_STATE;
        for (i, &label) in labels.iter().enumerate() {
            let next_state = if complete && i == labels.len() - 1 {
                FINAL_STATE
            } else {
                ofst.add_state()
            };
            if i > 0 {
                let escape = self.config.escape_score(i);
                ofst.add_tr(
                    prev_state,
                    Tr::new(ESCAPE_LABEL, ESCAPE_LABEL, escape, START_STATE),
                )?;
            }
            // Acceptor: ilabel == olabel
            ofst.add_tr(prev_state, Tr::new(label, label, context_score, next_state))?;
            prev_state = next_state;
        }
        Ok(())
    }

    /// True when no graph is built and matching is a no-op.
    pub fn is_empty(&self) -> bool {
        self.graph.is_none()
    }

    pub fn start_state(&self) -> StateId {
        self.graph
            .as_ref()
            .and_then(|graph| graph.start())
            .unwrap_or(START_STATE)
    }

    /// Whether reaching `state` completes a context.
    pub fn is_final_state(&self, state: StateId) -> bool {
        self.graph
            .as_ref()
            .map_or(false, |graph| graph.is_final(state).unwrap_or(false))
    }

    pub fn num_states(&self) -> usize {
        self.graph.as_ref().map_or(0, |graph| graph.num_states())
    }

    pub fn graph(&self) -> Option<&StdVectorFst> {
        self.graph.as_ref()
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    pub fn symbol_table(&self) -> Option<&Arc<SymbolTable>> {
        self.symbol_table.as_ref()
    }
}
