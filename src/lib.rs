pub mod alphabet;
pub mod config;
pub mod decoder;
pub mod error;
pub mod scorer;
pub mod types;

pub use alphabet::{byte_is_codepoint_boundary, Alphabet};
pub use config::DecoderConfig;
pub use decoder::{ctc_beam_search_decoder, ctc_beam_search_decoder_batch, DecoderState};
pub use error::DecodeError;
pub use scorer::Scorer;
pub use types::{Label, Output};
