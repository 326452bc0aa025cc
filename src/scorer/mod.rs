pub(crate) mod dictionary;
mod ngram;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::alphabet::Alphabet;
use crate::decoder::path_trie::{NodeId, PathTrie};
use crate::error::DecodeError;
use crate::types::Label;

use dictionary::Dictionary;
use ngram::{NGramModel, END_TOKEN, START_TOKEN, UNK_TOKEN};

pub(crate) use ngram::OOV_SCORE;

/// How the language model is queried: per codepoint or per word. The two
/// variants differ only in the boundary predicate and in how n-grams are
/// read off the trie.
#[derive(Debug, Clone, Copy)]
enum ScoringMode {
    Utf8,
    Word { space_id: Label },
}

/// External rescorer: an n-gram language model plus an optional lexicon
/// FST, with the tuning weights `alpha` (LM weight) and `beta` (word
/// insertion bonus). Read-only after construction, so one instance may be
/// shared by every decoding thread.
pub struct Scorer {
    alpha: f64,
    beta: f64,
    language_model: NGramModel,
    dictionary: Option<Arc<Dictionary>>,
    mode: ScoringMode,
    max_order: usize,
    alphabet: Alphabet,
    char_map: HashMap<String, Label>,
}

impl Scorer {
    /// Loads the ARPA model at `lm_path` and prepares the lexicon: from
    /// `trie_path` when given, otherwise rebuilt from the LM vocabulary.
    /// The scoring mode is inferred from the vocabulary; it must agree
    /// with the alphabet's encoding.
    pub fn init(
        alpha: f64,
        beta: f64,
        lm_path: &Path,
        trie_path: Option<&Path>,
        alphabet: &Alphabet,
    ) -> Result<Self, DecodeError> {
        let language_model = NGramModel::load(lm_path)?;
        Self::from_model(alpha, beta, language_model, trie_path, alphabet)
    }

    pub(crate) fn from_model(
        alpha: f64,
        beta: f64,
        language_model: NGramModel,
        trie_path: Option<&Path>,
        alphabet: &Alphabet,
    ) -> Result<Self, DecodeError> {
        let is_utf8_mode = infer_utf8_mode(&language_model);
        if is_utf8_mode != alphabet.is_utf8_mode() {
            return Err(DecodeError::invalid_input(if is_utf8_mode {
                "codepoint-level language model requires a UTF-8 alphabet"
            } else {
                "word-level language model requires a string-mode alphabet"
            }));
        }
        let mode = if is_utf8_mode {
            ScoringMode::Utf8
        } else {
            let space_id = alphabet.space_label().ok_or_else(|| {
                DecodeError::invalid_input(
                    "word-level language model requires an alphabet with a space label",
                )
            })?;
            ScoringMode::Word { space_id }
        };

        let mut char_map = HashMap::new();
        for label in 0..alphabet.size() {
            if let Some(s) = alphabet.string_from_label(label) {
                char_map.insert(s.to_string(), label);
            }
        }

        tracing::info!(
            order = language_model.order(),
            vocab = language_model.vocab_len(),
            utf8 = is_utf8_mode,
            "loaded n-gram language model"
        );

        let mut scorer = Self {
            alpha,
            beta,
            max_order: language_model.order(),
            language_model,
            dictionary: None,
            mode,
            alphabet: alphabet.clone(),
            char_map,
        };
        if let ScoringMode::Word { space_id } = scorer.mode {
            if alphabet.size() > 255 {
                return Err(DecodeError::invalid_input(format!(
                    "alphabet with {} labels cannot be encoded in the lexicon fst",
                    alphabet.size()
                )));
            }
            let dictionary = match trie_path {
                Some(path) => Dictionary::load(path)?,
                None => scorer.fill_dictionary(space_id)?,
            };
            tracing::info!(words = dictionary.len(), "lexicon fst ready");
            scorer.dictionary = Some(Arc::new(dictionary));
        }
        Ok(scorer)
    }

    /// Rebuilds the lexicon FST from the LM vocabulary. Words the alphabet
    /// cannot encode are dropped.
    fn fill_dictionary(&self, space_id: Label) -> Result<Dictionary, DecodeError> {
        let mut keys: Vec<Vec<u8>> = Vec::new();
        let mut skipped = 0usize;
        'words: for word in self.language_model.vocab() {
            if word == START_TOKEN || word == END_TOKEN || word == UNK_TOKEN {
                continue;
            }
            let mut key = Vec::with_capacity(word.len() + 1);
            for ch in word.chars() {
                let mut buf = [0u8; 4];
                let unit: &str = ch.encode_utf8(&mut buf);
                match self.char_map.get(unit) {
                    Some(&label) => key.push(label as u8 + 1),
                    None => {
                        skipped += 1;
                        continue 'words;
                    }
                }
            }
            if key.is_empty() {
                continue;
            }
            key.push(space_id as u8 + 1);
            keys.push(key);
        }
        if skipped > 0 {
            tracing::warn!(skipped, "dropped vocabulary words the alphabet cannot encode");
        }
        Dictionary::build(keys)
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn beta(&self) -> f64 {
        self.beta
    }

    pub fn max_order(&self) -> usize {
        self.max_order
    }

    pub fn is_utf8_mode(&self) -> bool {
        matches!(self.mode, ScoringMode::Utf8)
    }

    pub fn reset_params(&mut self, alpha: f64, beta: f64) {
        self.alpha = alpha;
        self.beta = beta;
    }

    pub(crate) fn dictionary(&self) -> Option<Arc<Dictionary>> {
        self.dictionary.clone()
    }

    /// Serializes the lexicon FST for reuse via `trie_path`.
    pub fn save_dictionary(&self, path: &Path) -> Result<(), DecodeError> {
        let dictionary = self.dictionary.as_ref().ok_or_else(|| {
            DecodeError::invalid_input("scorer has no lexicon to save (codepoint-level model)")
        })?;
        dictionary.save(path)
    }

    /// Conditional natural-log probability of the last entry of `ngram`
    /// given the preceding ones. `bos` scores from the sentence-start
    /// context; `eos` scores the end-of-sentence token after the n-gram
    /// and returns that probability instead. Any unknown word yields
    /// `OOV_SCORE`.
    pub fn get_log_cond_prob(&self, ngram: &[String], bos: bool, eos: bool) -> f64 {
        let lm = &self.language_model;
        let mut context: Vec<ngram::WordId> = Vec::with_capacity(ngram.len() + 1);
        if bos {
            if let Some(id) = lm.word_id(START_TOKEN) {
                context.push(id);
            }
        }
        let mut cond_prob = 0.0;
        for word in ngram {
            let Some(id) = lm.word_id(word) else {
                return OOV_SCORE;
            };
            cond_prob = lm.log_cond_prob(&context, id);
            context.push(id);
        }
        if eos {
            if let Some(id) = lm.word_id(END_TOKEN) {
                cond_prob = lm.log_cond_prob(&context, id);
            }
        }
        cond_prob
    }

    /// Full-sentence log probability: the sum of windowed conditionals
    /// with the sentence-start context while the window is anchored at the
    /// front, plus the end-of-sentence term.
    pub fn get_sent_log_prob(&self, words: &[String]) -> f64 {
        let mut score = 0.0;
        for i in 0..words.len() {
            let start = (i + 1).saturating_sub(self.max_order);
            score += self.get_log_cond_prob(&words[start..=i], start == 0, false);
        }
        let tail_start = words.len().saturating_sub(self.max_order.saturating_sub(1));
        score + self.get_log_cond_prob(&words[tail_start..], tail_start == 0, true)
    }

    /// True when emitting `new_label` after `prefix` completes a scored
    /// unit: a codepoint in UTF-8 mode, a word (space emitted) in word
    /// mode.
    pub(crate) fn is_scoring_boundary(
        &self,
        trie: &PathTrie,
        prefix: NodeId,
        new_label: Label,
    ) -> bool {
        match self.mode {
            ScoringMode::Utf8 => {
                let Some((distance, first_byte)) = trie.distance_to_codepoint_boundary(prefix)
                else {
                    return false;
                };
                utf8_sequence_len(first_byte) == Some(distance)
            }
            ScoringMode::Word { space_id } => new_label == space_id,
        }
    }

    /// Reads the most recent scored units off the trie, oldest first, up
    /// to the model order. Shorter at the start of a sentence.
    pub(crate) fn make_ngram(&self, trie: &PathTrie, prefix: NodeId) -> Vec<String> {
        let mut ngram = Vec::new();
        let mut current = prefix;
        for _ in 0..self.max_order {
            let mut labels = Vec::new();
            let mut timesteps = Vec::new();
            let stop = match self.mode {
                ScoringMode::Utf8 => trie.get_prev_grapheme(current, &mut labels, &mut timesteps),
                ScoringMode::Word { space_id } => {
                    trie.get_prev_word(current, &mut labels, &mut timesteps, space_id)
                }
            };
            ngram.push(self.alphabet.labels_to_string(&labels));
            let stop_node = trie.node(stop);
            if stop_node.character.is_none() {
                break;
            }
            // step over the boundary node itself
            match stop_node.parent {
                Some(parent) => current = parent,
                None => break,
            }
        }
        ngram.reverse();
        ngram
    }

    /// Splits a label sequence into the units the model scores: codepoints
    /// in UTF-8 mode, space-separated words otherwise.
    pub fn split_labels_into_scored_units(&self, labels: &[Label]) -> Vec<String> {
        let text = self.alphabet.labels_to_string(labels);
        match self.mode {
            ScoringMode::Utf8 => text.chars().map(|c| c.to_string()).collect(),
            ScoringMode::Word { .. } => text
                .split(' ')
                .filter(|w| !w.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }
}

impl std::fmt::Debug for Scorer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scorer")
            .field("alpha", &self.alpha)
            .field("beta", &self.beta)
            .field("max_order", &self.max_order)
            .field("mode", &self.mode)
            .finish()
    }
}

/// The mode is codepoint-level exactly when every non-special vocabulary
/// entry is a single codepoint.
fn infer_utf8_mode(model: &NGramModel) -> bool {
    model
        .vocab()
        .filter(|w| *w != START_TOKEN && *w != END_TOKEN && *w != UNK_TOKEN)
        .all(|w| w.chars().count() == 1)
}

fn utf8_sequence_len(first_byte: u8) -> Option<usize> {
    if first_byte >> 7 == 0x00 {
        Some(1)
    } else if first_byte >> 5 == 0x06 {
        Some(2)
    } else if first_byte >> 4 == 0x0E {
        Some(3)
    } else if first_byte >> 3 == 0x1E {
        Some(4)
    } else {
        None
    }
}
