/// Class label emitted by the acoustic model. The blank label is
/// `alphabet.size()`, one past the last real label.
pub type Label = usize;

/// One ranked decoding result.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Output {
    pub tokens: Vec<Label>,
    /// `timesteps[i]` is the time index at which `tokens[i]` was first
    /// emitted; both vectors have equal length and exclude blanks.
    pub timesteps: Vec<usize>,
    /// Approximate CTC score with the language model contribution removed,
    /// negated so that higher is better.
    pub confidence: f64,
}
