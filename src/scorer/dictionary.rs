use std::path::Path;

use fst::raw::CompiledAddr;

use crate::error::DecodeError;
use crate::types::Label;

/// Lexicon FST over label sequences.
///
/// Every vocabulary word is stored as its `(label + 1)` bytes followed by
/// the `(space + 1)` byte, so byte 0 stays unused and a final state marks a
/// completed word. States are addressed by `CompiledAddr`, which trie nodes
/// carry as their walk position; lookups are pure, so one instance can be
/// shared freely.
pub(crate) struct Dictionary {
    set: fst::Set<Vec<u8>>,
}

impl Dictionary {
    /// Builds the FST from raw byte keys. Keys are sorted and deduplicated
    /// here; the builder requires lexicographic insertion order.
    pub(crate) fn build(mut keys: Vec<Vec<u8>>) -> Result<Self, DecodeError> {
        keys.sort();
        keys.dedup();
        let mut builder = fst::SetBuilder::memory();
        for key in &keys {
            builder
                .insert(key)
                .map_err(|e| DecodeError::dictionary("build lexicon fst", e))?;
        }
        let bytes = builder
            .into_inner()
            .map_err(|e| DecodeError::dictionary("finish lexicon fst", e))?;
        let set = fst::Set::new(bytes).map_err(|e| DecodeError::dictionary("open lexicon fst", e))?;
        Ok(Self { set })
    }

    pub(crate) fn load(path: &Path) -> Result<Self, DecodeError> {
        let bytes = std::fs::read(path).map_err(|e| DecodeError::io("read lexicon fst", e))?;
        let set =
            fst::Set::new(bytes).map_err(|e| DecodeError::dictionary("parse lexicon fst", e))?;
        Ok(Self { set })
    }

    pub(crate) fn save(&self, path: &Path) -> Result<(), DecodeError> {
        std::fs::write(path, self.set.as_fst().as_bytes())
            .map_err(|e| DecodeError::io("write lexicon fst", e))
    }

    /// The start state every new word begins from.
    pub(crate) fn start(&self) -> CompiledAddr {
        self.set.as_fst().root().addr()
    }

    /// Advances `state` by `label`, or `None` when no vocabulary word
    /// continues this way. Transitions are sorted by input byte, so this is
    /// a binary search.
    pub(crate) fn find_input(&self, state: CompiledAddr, label: Label) -> Option<CompiledAddr> {
        if label >= 255 {
            return None;
        }
        let node = self.set.as_fst().node(state);
        node.find_input(label as u8 + 1)
            .map(|i| node.transition(i).addr)
    }

    /// True when `state` completes a vocabulary word.
    pub(crate) fn is_final(&self, state: CompiledAddr) -> bool {
        self.set.as_fst().node(state).is_final()
    }

    pub(crate) fn len(&self) -> usize {
        self.set.len()
    }
}

impl std::fmt::Debug for Dictionary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dictionary")
            .field("words", &self.set.len())
            .finish()
    }
}
