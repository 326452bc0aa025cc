mod batch;
pub(crate) mod path_trie;
mod state;
pub(crate) mod utils;

pub use batch::{ctc_beam_search_decoder, ctc_beam_search_decoder_batch};
pub use state::DecoderState;
