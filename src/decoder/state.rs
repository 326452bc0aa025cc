use std::collections::HashMap;

use crate::alphabet::Alphabet;
use crate::config::DecoderConfig;
use crate::decoder::path_trie::{NodeId, PathTrie, ROOT_ID};
use crate::decoder::utils::{get_pruned_log_probs, log_sum_exp, prefix_compare};
use crate::error::DecodeError;
use crate::scorer::{Scorer, OOV_SCORE};
use crate::types::{Label, Output};

/// Ranked outputs returned by `decode`. The search keeps `beam_size`
/// hypotheses, so widening this needs no other change.
const TOP_PATHS: usize = 1;

/// Drives one utterance's prefix beam search over time.
///
/// `next` consumes any number of timestep blocks; `decode` can be called at
/// any point and does not mutate the search, so streaming partial results
/// works. The trie arena is owned exclusively, the scorer is shared
/// read-only.
pub struct DecoderState<'s> {
    abs_time_step: usize,
    blank_id: Label,
    class_dim: usize,
    beam_size: usize,
    cutoff_prob: f64,
    cutoff_top_n: usize,
    scorer: Option<&'s Scorer>,
    trie: PathTrie,
    prefixes: Vec<NodeId>,
}

impl<'s> DecoderState<'s> {
    pub fn new(
        alphabet: &Alphabet,
        config: &DecoderConfig,
        scorer: Option<&'s Scorer>,
    ) -> Result<Self, DecodeError> {
        config.validate()?;
        let blank_id = alphabet.blank_label();
        let mut trie = PathTrie::new();
        {
            let root = trie.node_mut(ROOT_ID);
            root.score = 0.0;
            root.log_prob_b_prev = 0.0;
        }
        if let Some(scorer) = scorer {
            if let Some(dictionary) = scorer.dictionary() {
                trie.set_dictionary(dictionary);
            }
        }
        Ok(Self {
            abs_time_step: 0,
            blank_id,
            class_dim: blank_id + 1,
            beam_size: config.beam_size,
            cutoff_prob: config.cutoff_prob,
            cutoff_top_n: config.cutoff_top_n,
            scorer,
            trie,
            prefixes: vec![ROOT_ID],
        })
    }

    /// Consumes a block of timesteps. Each row holds the softmax
    /// probabilities of every class including the blank.
    pub fn next(&mut self, probs: &[Vec<f64>]) -> Result<(), DecodeError> {
        for row in probs {
            if row.len() != self.class_dim {
                return Err(DecodeError::invalid_input(format!(
                    "probability row has {} classes, expected {}",
                    row.len(),
                    self.class_dim
                )));
            }
            self.step(row);
            self.abs_time_step += 1;
        }
        Ok(())
    }

    fn step(&mut self, prob: &[f64]) {
        let mut min_cutoff = f64::NEG_INFINITY;
        let mut full_beam = false;
        if let Some(scorer) = self.scorer {
            // With a scorer the frontier must be ordered: once a prefix
            // falls below the cutoff, every later one does too.
            let num_prefixes = self.prefixes.len().min(self.beam_size);
            partial_sort_by_score(&mut self.prefixes, num_prefixes, &self.trie);
            min_cutoff = self.trie.node(self.prefixes[num_prefixes - 1]).score
                + prob[self.blank_id].ln()
                - scorer.beta().max(0.0);
            full_beam = num_prefixes == self.beam_size;
        }

        let log_prob_idx = get_pruned_log_probs(prob, self.cutoff_prob, self.cutoff_top_n);
        for &(c, log_prob_c) in &log_prob_idx {
            let upper = self.prefixes.len().min(self.beam_size);
            for i in 0..upper {
                let prefix = self.prefixes[i];
                let (prefix_score, prefix_character, prefix_b_prev, prefix_nb_prev) = {
                    let node = self.trie.node(prefix);
                    (
                        node.score,
                        node.character,
                        node.log_prob_b_prev,
                        node.log_prob_nb_prev,
                    )
                };
                if full_beam && log_prob_c + prefix_score < min_cutoff {
                    break;
                }

                if c == self.blank_id {
                    let node = self.trie.node_mut(prefix);
                    node.log_prob_b_cur =
                        log_sum_exp(node.log_prob_b_cur, log_prob_c + prefix_score);
                    continue;
                }

                // A repeat extends the prefix in place; the fall-through
                // below also books the separate two-distinct-characters
                // reading of the same emission.
                if Some(c) == prefix_character {
                    let node = self.trie.node_mut(prefix);
                    node.log_prob_nb_cur =
                        log_sum_exp(node.log_prob_nb_cur, log_prob_c + prefix_nb_prev);
                }

                let Some(new_prefix) =
                    self.trie
                        .get_path_trie(prefix, c, self.abs_time_step, log_prob_c, true)
                else {
                    // the lexicon rules this extension out
                    continue;
                };

                let mut log_p = f64::NEG_INFINITY;
                if Some(c) == prefix_character && prefix_b_prev > f64::NEG_INFINITY {
                    // a repeated character only survives across a blank
                    log_p = log_prob_c + prefix_b_prev;
                } else if Some(c) != prefix_character {
                    log_p = log_prob_c + prefix_score;
                }

                if let Some(scorer) = self.scorer {
                    // word mode scores the completed word on the parent;
                    // the space itself is never part of it
                    let prefix_to_score = if scorer.is_utf8_mode() {
                        new_prefix
                    } else {
                        prefix
                    };
                    if scorer.is_scoring_boundary(&self.trie, prefix_to_score, c) {
                        let ngram = scorer.make_ngram(&self.trie, prefix_to_score);
                        let bos = ngram.len() < scorer.max_order();
                        log_p += scorer.alpha() * scorer.get_log_cond_prob(&ngram, bos, false);
                        log_p += scorer.beta();
                    }
                }

                let node = self.trie.node_mut(new_prefix);
                node.log_prob_nb_cur = log_sum_exp(node.log_prob_nb_cur, log_p);
            }
        }

        // slide current log probs into previous and rebuild the frontier
        self.prefixes.clear();
        self.trie.iterate_to_vec(&mut self.prefixes);

        if self.prefixes.len() > self.beam_size {
            {
                let trie = &self.trie;
                self.prefixes.select_nth_unstable_by(self.beam_size, |&a, &b| {
                    prefix_compare(trie.node(a), trie.node(b))
                });
            }
            for i in self.beam_size..self.prefixes.len() {
                let id = self.prefixes[i];
                self.trie.remove(id);
            }
            self.prefixes.truncate(self.beam_size);
        }
    }

    /// Finalizes the search and returns the ranked outputs. The trailing
    /// partial word of each prefix is scored here, since no boundary ever
    /// closed it.
    pub fn decode(&self) -> Vec<Output> {
        let mut prefixes_copy = self.prefixes.clone();
        let mut scores: HashMap<NodeId, f64> = prefixes_copy
            .iter()
            .map(|&id| (id, self.trie.node(id).score))
            .collect();

        if let Some(scorer) = self.scorer {
            for &prefix in prefixes_copy.iter().take(self.beam_size) {
                let node = self.trie.node(prefix);
                match (node.character, node.parent) {
                    (None, _) => {
                        // an empty transcript has no words to score
                        scores.insert(prefix, OOV_SCORE);
                    }
                    (Some(character), Some(parent)) => {
                        if !scorer.is_scoring_boundary(&self.trie, parent, character) {
                            let ngram = scorer.make_ngram(&self.trie, prefix);
                            let bos = ngram.len() < scorer.max_order();
                            let bonus = scorer.alpha()
                                * scorer.get_log_cond_prob(&ngram, bos, false)
                                + scorer.beta();
                            if let Some(score) = scores.get_mut(&prefix) {
                                *score += bonus;
                            }
                        }
                    }
                    (Some(_), None) => {}
                }
            }
        }

        let num_prefixes = prefixes_copy.len().min(self.beam_size);
        {
            let trie = &self.trie;
            let scores = &scores;
            let compare = |&a: &NodeId, &b: &NodeId| {
                let score_a = scores.get(&a).copied().unwrap_or(f64::NEG_INFINITY);
                let score_b = scores.get(&b).copied().unwrap_or(f64::NEG_INFINITY);
                match score_b.total_cmp(&score_a) {
                    std::cmp::Ordering::Equal => {
                        trie.node(b).character.cmp(&trie.node(a).character)
                    }
                    ordering => ordering,
                }
            };
            if num_prefixes > 0 && num_prefixes < prefixes_copy.len() {
                prefixes_copy.select_nth_unstable_by(num_prefixes - 1, compare);
            }
            prefixes_copy[..num_prefixes].sort_unstable_by(compare);
        }

        let num_returned = num_prefixes.min(TOP_PATHS);
        let mut outputs = Vec::with_capacity(num_returned);
        for &prefix in prefixes_copy.iter().take(num_returned) {
            let mut tokens = Vec::new();
            let mut timesteps = Vec::new();
            self.trie.get_path_vec(prefix, &mut tokens, &mut timesteps);

            // approximate CTC score: strip the cumulative LM contribution
            // so the confidence reflects acoustics alone
            let mut approx_ctc = scores.get(&prefix).copied().unwrap_or(f64::NEG_INFINITY);
            if let Some(scorer) = self.scorer {
                let words = scorer.split_labels_into_scored_units(&tokens);
                approx_ctc -= words.len() as f64 * scorer.beta();
                approx_ctc -= scorer.alpha() * scorer.get_sent_log_prob(&words);
            }
            outputs.push(Output {
                tokens,
                timesteps,
                confidence: -approx_ctc,
            });
        }
        outputs
    }

    #[cfg(test)]
    fn frontier(&self) -> (&PathTrie, &[NodeId]) {
        (&self.trie, &self.prefixes)
    }
}

/// Orders the first `k` entries of `prefixes` best-first; the rest stay in
/// arbitrary order.
fn partial_sort_by_score(prefixes: &mut [NodeId], k: usize, trie: &PathTrie) {
    if k == 0 || prefixes.is_empty() {
        return;
    }
    if k < prefixes.len() {
        prefixes.select_nth_unstable_by(k - 1, |&a, &b| prefix_compare(trie.node(a), trie.node(b)));
    }
    prefixes[..k].sort_unstable_by(|&a, &b| prefix_compare(trie.node(a), trie.node(b)));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config(beam_size: usize) -> DecoderConfig {
        DecoderConfig {
            beam_size,
            cutoff_prob: 1.0,
            cutoff_top_n: 40,
            num_processes: 1,
        }
    }

    fn ab_alphabet() -> Alphabet {
        Alphabet::new(vec!["a".to_string(), "b".to_string()]).expect("valid alphabet")
    }

    fn uniform_rows(time_dim: usize, class_dim: usize) -> Vec<Vec<f64>> {
        vec![vec![1.0 / class_dim as f64; class_dim]; time_dim]
    }

    #[test]
    fn frontier_stays_within_beam_and_scores_are_consistent() {
        let alphabet =
            Alphabet::new("abcd".chars().map(|c| c.to_string()).collect()).expect("valid");
        let mut state =
            DecoderState::new(&alphabet, &small_config(2), None).expect("valid state");
        state.next(&uniform_rows(3, 5)).expect("well-formed probs");

        let (trie, prefixes) = state.frontier();
        assert!(prefixes.len() <= 2);
        for &id in prefixes {
            let node = trie.node(id);
            assert!(node.exists);
            assert_eq!(
                node.score,
                log_sum_exp(node.log_prob_b_prev, node.log_prob_nb_prev)
            );
        }
    }

    #[test]
    fn rejects_rows_with_wrong_class_count() {
        let mut state =
            DecoderState::new(&ab_alphabet(), &small_config(4), None).expect("valid state");
        let err = state.next(&[vec![0.5, 0.5]]).expect_err("2 classes, need 3");
        assert!(matches!(err, DecodeError::InvalidInput { .. }));
    }

    #[test]
    fn rejects_invalid_config() {
        assert!(DecoderState::new(&ab_alphabet(), &small_config(0), None).is_err());
    }

    #[test]
    fn blank_only_input_decodes_to_empty_with_zero_cost() {
        let mut state =
            DecoderState::new(&ab_alphabet(), &small_config(8), None).expect("valid state");
        state
            .next(&[vec![0.0, 0.0, 1.0], vec![0.0, 0.0, 1.0]])
            .expect("well-formed probs");
        let outputs = state.decode();
        assert_eq!(outputs.len(), 1);
        assert!(outputs[0].tokens.is_empty());
        assert!(outputs[0].timesteps.is_empty());
        assert!(outputs[0].confidence.abs() < 1e-9);
    }

    #[test]
    fn decode_is_idempotent() {
        let mut state =
            DecoderState::new(&ab_alphabet(), &small_config(4), None).expect("valid state");
        state.next(&uniform_rows(4, 3)).expect("well-formed probs");
        assert_eq!(state.decode(), state.decode());
    }

    #[test]
    fn next_can_be_fed_in_blocks() {
        let rows = uniform_rows(6, 3);
        let mut whole =
            DecoderState::new(&ab_alphabet(), &small_config(4), None).expect("valid state");
        whole.next(&rows).expect("well-formed probs");

        let mut split =
            DecoderState::new(&ab_alphabet(), &small_config(4), None).expect("valid state");
        split.next(&rows[..2]).expect("well-formed probs");
        split.next(&rows[2..]).expect("well-formed probs");

        assert_eq!(whole.decode(), split.decode());
    }
}
