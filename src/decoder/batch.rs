use rayon::prelude::*;

use crate::alphabet::Alphabet;
use crate::config::DecoderConfig;
use crate::decoder::state::DecoderState;
use crate::error::DecodeError;
use crate::scorer::Scorer;
use crate::types::Output;

/// Decodes one utterance. `probs` holds one row of softmax class
/// probabilities per timestep, `alphabet.size() + 1` entries each.
pub fn ctc_beam_search_decoder(
    probs: &[Vec<f64>],
    alphabet: &Alphabet,
    config: &DecoderConfig,
    scorer: Option<&Scorer>,
) -> Result<Vec<Output>, DecodeError> {
    let mut state = DecoderState::new(alphabet, config, scorer)?;
    state.next(probs)?;
    Ok(state.decode())
}

/// Decodes a batch of utterances on a fixed-size worker pool.
///
/// `probs[i]` may be padded beyond `seq_lengths[i]` timesteps; only the
/// valid extent is decoded. Every utterance runs an independent search with
/// its own trie; the scorer is shared read-only. Results come back in input
/// order regardless of completion order.
pub fn ctc_beam_search_decoder_batch(
    probs: &[Vec<Vec<f64>>],
    seq_lengths: &[usize],
    alphabet: &Alphabet,
    config: &DecoderConfig,
    scorer: Option<&Scorer>,
) -> Result<Vec<Vec<Output>>, DecodeError> {
    config.validate()?;
    if probs.len() != seq_lengths.len() {
        return Err(DecodeError::invalid_input(format!(
            "batch has {} utterances but {} sequence lengths",
            probs.len(),
            seq_lengths.len()
        )));
    }
    for (i, (utterance, &len)) in probs.iter().zip(seq_lengths).enumerate() {
        if len > utterance.len() {
            return Err(DecodeError::invalid_input(format!(
                "sequence length {len} exceeds the {} timesteps of utterance {i}",
                utterance.len()
            )));
        }
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.num_processes)
        .build()
        .map_err(|e| DecodeError::runtime("build decode worker pool", e))?;
    tracing::debug!(
        batch = probs.len(),
        workers = config.num_processes,
        "dispatching batch decode"
    );
    pool.install(|| {
        probs
            .par_iter()
            .zip(seq_lengths.par_iter())
            .map(|(utterance, &len)| {
                ctc_beam_search_decoder(&utterance[..len], alphabet, config, scorer)
            })
            .collect()
    })
}
