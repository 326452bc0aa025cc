use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::DecodeError;

pub(crate) const START_TOKEN: &str = "<s>";
pub(crate) const END_TOKEN: &str = "</s>";
pub(crate) const UNK_TOKEN: &str = "<unk>";

/// Fixed penalty for words outside the language model vocabulary.
pub(crate) const OOV_SCORE: f64 = -1000.0;

pub(crate) type WordId = u32;

#[derive(Debug, Clone, Copy)]
struct NGramEntry {
    log_prob: f64,
    backoff: f64,
}

fn intern(vocab: &mut HashMap<String, WordId>, words: &mut Vec<String>, word: &str) -> WordId {
    if let Some(&id) = vocab.get(word) {
        return id;
    }
    let id = words.len() as WordId;
    vocab.insert(word.to_string(), id);
    words.push(word.to_string());
    id
}

/// Back-off n-gram language model read from an ARPA file.
///
/// ARPA stores base-10 logs; they are converted to natural logs at load
/// time so every probability in the decoder lives on one scale. Words are
/// interned to dense ids and n-grams keyed by id sequences.
pub(crate) struct NGramModel {
    vocab: HashMap<String, WordId>,
    words: Vec<String>,
    grams: Vec<HashMap<Box<[WordId]>, NGramEntry>>,
    order: usize,
}

impl NGramModel {
    pub(crate) fn load(path: &Path) -> Result<Self, DecodeError> {
        let file = File::open(path).map_err(|e| DecodeError::io("open language model", e))?;
        Self::from_reader(BufReader::new(file))
    }

    pub(crate) fn from_reader(reader: impl BufRead) -> Result<Self, DecodeError> {
        let mut vocab: HashMap<String, WordId> = HashMap::new();
        let mut words: Vec<String> = Vec::new();
        let mut counts: Vec<usize> = Vec::new();
        let mut grams: Vec<HashMap<Box<[WordId]>, NGramEntry>> = Vec::new();
        let mut in_data = false;
        let mut section: Option<usize> = None;

        for line in reader.lines() {
            let line = line.map_err(|e| DecodeError::io("read language model", e))?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if line == "\\data\\" {
                in_data = true;
                continue;
            }
            if line == "\\end\\" {
                break;
            }
            if !in_data {
                continue;
            }
            if let Some(rest) = line.strip_prefix("ngram ") {
                let (_, count) = rest.split_once('=').ok_or_else(|| {
                    DecodeError::lm("parse header", format!("malformed count line: {line:?}"))
                })?;
                let count: usize = count.trim().parse().map_err(|_| {
                    DecodeError::lm("parse header", format!("malformed count line: {line:?}"))
                })?;
                counts.push(count);
                grams.push(HashMap::with_capacity(count));
                continue;
            }
            if let Some(inner) = line.strip_prefix('\\').and_then(|l| l.strip_suffix("-grams:")) {
                let n: usize = inner.parse().map_err(|_| {
                    DecodeError::lm("parse section", format!("malformed section header: {line:?}"))
                })?;
                if n == 0 || n > counts.len() {
                    return Err(DecodeError::lm(
                        "parse section",
                        format!("section order {n} not announced in the header"),
                    ));
                }
                section = Some(n);
                continue;
            }
            let Some(n) = section else {
                return Err(DecodeError::lm(
                    "parse entries",
                    format!("entry outside any n-gram section: {line:?}"),
                ));
            };
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < n + 1 || fields.len() > n + 2 {
                return Err(DecodeError::lm(
                    "parse entries",
                    format!("malformed {n}-gram line: {line:?}"),
                ));
            }
            let log10_prob: f64 = fields[0].parse().map_err(|_| {
                DecodeError::lm("parse entries", format!("malformed probability: {line:?}"))
            })?;
            let log10_backoff: f64 = if fields.len() == n + 2 {
                fields[n + 1].parse().map_err(|_| {
                    DecodeError::lm("parse entries", format!("malformed backoff: {line:?}"))
                })?
            } else {
                0.0
            };
            let ids: Vec<WordId> = fields[1..=n]
                .iter()
                .map(|w| intern(&mut vocab, &mut words, w))
                .collect();
            grams[n - 1].insert(
                ids.into_boxed_slice(),
                NGramEntry {
                    log_prob: log10_prob * std::f64::consts::LN_10,
                    backoff: log10_backoff * std::f64::consts::LN_10,
                },
            );
        }

        if !in_data {
            return Err(DecodeError::lm(
                "parse header",
                "no \\data\\ section found; not an ARPA file",
            ));
        }
        let order = counts.len();
        if order == 0 || grams.first().map_or(true, HashMap::is_empty) {
            return Err(DecodeError::lm(
                "parse entries",
                "language model has no unigrams",
            ));
        }
        Ok(Self {
            vocab,
            words,
            grams,
            order,
        })
    }

    pub(crate) fn order(&self) -> usize {
        self.order
    }

    pub(crate) fn word_id(&self, word: &str) -> Option<WordId> {
        self.vocab.get(word).copied()
    }

    pub(crate) fn vocab(&self) -> impl Iterator<Item = &str> {
        self.words.iter().map(String::as_str)
    }

    pub(crate) fn vocab_len(&self) -> usize {
        self.words.len()
    }

    /// Natural-log conditional probability of `word` after `context`, with
    /// standard back-off: the longest stored n-gram wins, shorter contexts
    /// pay the back-off weights of the contexts they skip.
    pub(crate) fn log_cond_prob(&self, context: &[WordId], word: WordId) -> f64 {
        let max_context = self.order - 1;
        let context = if context.len() > max_context {
            &context[context.len() - max_context..]
        } else {
            context
        };
        self.backoff_score(context, word)
    }

    fn backoff_score(&self, context: &[WordId], word: WordId) -> f64 {
        let mut key = Vec::with_capacity(context.len() + 1);
        key.extend_from_slice(context);
        key.push(word);
        if let Some(entry) = self.grams[key.len() - 1].get(key.as_slice()) {
            return entry.log_prob;
        }
        if context.is_empty() {
            // unigram absent: the <unk> probability stands in when the
            // model has one
            return self
                .vocab
                .get(UNK_TOKEN)
                .and_then(|&unk| self.grams[0].get([unk].as_slice()))
                .map(|e| e.log_prob)
                .unwrap_or(OOV_SCORE);
        }
        let backoff = self.grams[context.len() - 1]
            .get(context)
            .map(|e| e.backoff)
            .unwrap_or(0.0);
        backoff + self.backoff_score(&context[1..], word)
    }
}

impl std::fmt::Debug for NGramModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NGramModel")
            .field("order", &self.order)
            .field("vocab", &self.words.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const LN_10: f64 = std::f64::consts::LN_10;

    const TINY_ARPA: &str = "\
\\data\\
ngram 1=5
ngram 2=3

\\1-grams:
-0.8\t<s>\t-0.4
-1.0\t</s>
-1.2\t<unk>
-0.5\thello\t-0.3
-0.7\tworld\t-0.2

\\2-grams:
-0.2\t<s> hello
-0.3\thello world
-0.4\tworld </s>

\\end\\
";

    fn tiny_model() -> NGramModel {
        NGramModel::from_reader(Cursor::new(TINY_ARPA)).expect("valid ARPA")
    }

    #[test]
    fn parses_orders_and_vocabulary() {
        let model = tiny_model();
        assert_eq!(model.order(), 2);
        assert_eq!(model.vocab_len(), 5);
        assert!(model.word_id("hello").is_some());
        assert!(model.word_id("absent").is_none());
    }

    #[test]
    fn stored_ngram_wins() {
        let model = tiny_model();
        let hello = model.word_id("hello").expect("in vocab");
        let world = model.word_id("world").expect("in vocab");
        let got = model.log_cond_prob(&[hello], world);
        assert!((got - (-0.3 * LN_10)).abs() < 1e-12);
    }

    #[test]
    fn missing_ngram_pays_backoff() {
        let model = tiny_model();
        let hello = model.word_id("hello").expect("in vocab");
        let world = model.word_id("world").expect("in vocab");
        // "world hello" is not stored: backoff(world) + P(hello)
        let got = model.log_cond_prob(&[world], hello);
        assert!((got - ((-0.2 - 0.5) * LN_10)).abs() < 1e-12);
    }

    #[test]
    fn context_is_clamped_to_model_order() {
        let model = tiny_model();
        let hello = model.word_id("hello").expect("in vocab");
        let world = model.word_id("world").expect("in vocab");
        let long_context = vec![world, world, world, hello];
        assert_eq!(
            model.log_cond_prob(&long_context, world),
            model.log_cond_prob(&[hello], world)
        );
    }

    #[test]
    fn rejects_non_arpa_input() {
        assert!(NGramModel::from_reader(Cursor::new("not an arpa file")).is_err());
        assert!(NGramModel::from_reader(Cursor::new("\\data\\\nngram 1=0\n\\end\\\n")).is_err());
        let bad_entry = "\\data\\\nngram 1=1\n\\1-grams:\nnot-a-number hello\n\\end\\\n";
        assert!(NGramModel::from_reader(Cursor::new(bad_entry)).is_err());
    }
}
