use anyhow::Result;
use rustfst::fst_impls::VectorFst;
use rustfst::semirings::TropicalWeight;
use std::fs::File;
use std::io::prelude::*;
use std::io::BufReader;
use std::path::Path;

/// rustfst does not define this but we will
pub type StdVectorFst = VectorFst<TropicalWeight>;

/// Configuration for building context graphs
pub mod config;
/// Building context graphs from phrase lists
pub mod graph;
/// Matching decoded tokens against a context graph
pub mod matcher;

pub use config::{ContextConfig, UnknownTokenPolicy};
pub use graph::{ContextGraph, ContextLabel, ESCAPE_LABEL};
pub use matcher::{ContextStates, ContextStep};

/// Read contexts, one per line, skipping blank lines
pub fn read_contexts<P: AsRef<Path>>(input: P) -> Result<Vec<String>> {
    let fh = File::open(input)?;
    let mut contexts = Vec::new();
    for line in BufReader::new(fh).lines() {
        let line = line?;
        let context = line.trim();
        if !context.is_empty() {
            contexts.push(context.to_string());
        }
    }
    Ok(contexts)
}

/// Split text into its UTF-8 characters
pub fn split_utf8_chars(text: &str) -> Vec<&str> {
    text.char_indices()
        .map(|(i, ch)| &text[i..i + ch.len_utf8()])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustfst::SymbolTable;
    use std::sync::Arc;

    #[test]
    fn it_reads_contexts() {
        let contexts = read_contexts("testdata/contexts.txt").unwrap();
        assert_eq!(contexts, vec!["周杰伦", "林俊杰", "蔡依林", "hey siri"]);
    }

    #[test]
    fn it_fails_on_missing_files() {
        assert!(read_contexts("testdata/no-such-file.txt").is_err());
    }

    #[test]
    fn it_splits_utf8_chars() {
        assert_eq!(split_utf8_chars("周杰伦"), vec!["周", "杰", "伦"]);
        assert_eq!(split_utf8_chars("a b"), vec!["a", " ", "b"]);
        assert!(split_utf8_chars("").is_empty());
    }

    #[test]
    fn it_biases_contexts_from_a_file() {
        let contexts = read_contexts("testdata/contexts.txt").unwrap();
        let mut syms = SymbolTable::new();
        for context in contexts.iter() {
            for ch in split_utf8_chars(context) {
                syms.add_symbol(ch);
            }
        }
        let syms = Arc::new(syms);
        let mut graph = ContextGraph::new(ContextConfig::default());
        graph
            .build_context_graph(&contexts[..], Arc::clone(&syms))
            .unwrap();

        let mut states = graph.start_states();
        let mut full = 0.0;
        for ch in split_utf8_chars("我喜欢林俊杰") {
            let label = match syms.get_label(ch) {
                Some(label) => label,
                None => continue,
            };
            let step = graph.next_context_states(&states, label);
            full = step.full_score;
            states = step.next_states;
            graph.reseed(&mut states);
        }
        assert_eq!(full, 9.0);
    }
}
