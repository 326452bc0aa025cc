use std::path::PathBuf;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use ctcdecode_rs::{
    ctc_beam_search_decoder, ctc_beam_search_decoder_batch, Alphabet, DecoderConfig, DecoderState,
    Scorer,
};

fn ab_alphabet() -> Alphabet {
    Alphabet::new(vec!["a".to_string(), "b".to_string()]).expect("valid alphabet")
}

fn config(beam_size: usize) -> DecoderConfig {
    DecoderConfig {
        beam_size,
        cutoff_prob: 1.0,
        cutoff_top_n: 40,
        num_processes: 1,
    }
}

fn write_temp_arpa(name: &str, contents: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!(
        "ctcdecode-rs-scenario-{}-{}.arpa",
        std::process::id(),
        name
    ));
    std::fs::write(&path, contents).expect("write temp ARPA file");
    path
}

#[test]
fn blank_only_input_yields_empty_transcript() {
    let probs = vec![vec![0.0, 0.0, 1.0], vec![0.0, 0.0, 1.0]];
    let outputs =
        ctc_beam_search_decoder(&probs, &ab_alphabet(), &config(8), None).expect("valid input");
    assert_eq!(outputs.len(), 1);
    assert!(outputs[0].tokens.is_empty());
    assert!(outputs[0].timesteps.is_empty());
    assert!(outputs[0].confidence.abs() < 1e-9);
}

#[test]
fn consecutive_repeats_collapse() {
    let probs = vec![vec![1.0, 0.0, 0.0], vec![1.0, 0.0, 0.0]];
    let outputs =
        ctc_beam_search_decoder(&probs, &ab_alphabet(), &config(8), None).expect("valid input");
    assert_eq!(outputs[0].tokens, vec![0]);
    assert_eq!(outputs[0].timesteps, vec![0]);
}

#[test]
fn blank_separator_preserves_the_repeat() {
    let probs = vec![
        vec![1.0, 0.0, 0.0],
        vec![0.0, 0.0, 1.0],
        vec![1.0, 0.0, 0.0],
    ];
    let outputs =
        ctc_beam_search_decoder(&probs, &ab_alphabet(), &config(8), None).expect("valid input");
    assert_eq!(outputs[0].tokens, vec![0, 0]);
    assert_eq!(outputs[0].timesteps, vec![0, 2]);
}

#[test]
fn distinct_labels_are_kept_in_order() {
    let probs = vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]];
    let outputs =
        ctc_beam_search_decoder(&probs, &ab_alphabet(), &config(8), None).expect("valid input");
    assert_eq!(outputs[0].tokens, vec![0, 1]);
    assert_eq!(outputs[0].timesteps, vec![0, 1]);
}

#[test]
fn narrow_beam_still_produces_a_bounded_transcript() {
    let alphabet = Alphabet::new("abcd".chars().map(|c| c.to_string()).collect()).expect("valid");
    let probs = vec![vec![0.2; 5]; 3];
    let outputs =
        ctc_beam_search_decoder(&probs, &alphabet, &config(2), None).expect("valid input");
    assert_eq!(outputs.len(), 1);
    assert!(outputs[0].tokens.len() <= 3);
}

#[test]
fn lexicon_and_language_model_gate_the_transcript() {
    let arpa = "\
\\data\\
ngram 1=4

\\1-grams:
-0.1\t<s>
-0.1\t</s>
-0.1\t<unk>
-0.1\thi

\\end\\
";
    let lm_path = write_temp_arpa("lm-gating", arpa);
    let alphabet = Alphabet::new(vec![
        "h".to_string(),
        "i".to_string(),
        " ".to_string(),
    ])
    .expect("valid alphabet");
    let scorer = Scorer::init(1.0, 0.0, &lm_path, None, &alphabet).expect("valid scorer");
    std::fs::remove_file(&lm_path).ok();

    // greedy reads "h " here, but a space cannot follow a bare "h" in the
    // lexicon and the language model prefers the full word
    let probs = vec![
        vec![0.9, 0.02, 0.03, 0.05],
        vec![0.05, 0.3, 0.4, 0.25],
        vec![0.05, 0.05, 0.1, 0.8],
    ];
    let outputs = ctc_beam_search_decoder(&probs, &alphabet, &config(16), Some(&scorer))
        .expect("valid input");
    assert_eq!(outputs[0].tokens, vec![0, 1], "expected the transcript 'hi'");
}

#[test]
fn saved_lexicon_can_be_loaded_back() {
    let arpa = "\
\\data\\
ngram 1=4

\\1-grams:
-0.1\t<s>
-0.1\t</s>
-0.1\t<unk>
-0.2\thi

\\end\\
";
    let lm_path = write_temp_arpa("lexicon-roundtrip", arpa);
    let alphabet = Alphabet::new(vec![
        "h".to_string(),
        "i".to_string(),
        " ".to_string(),
    ])
    .expect("valid alphabet");
    let scorer = Scorer::init(0.5, 0.5, &lm_path, None, &alphabet).expect("valid scorer");

    let fst_path = std::env::temp_dir().join(format!(
        "ctcdecode-rs-scenario-{}-lexicon.fst",
        std::process::id()
    ));
    scorer.save_dictionary(&fst_path).expect("save lexicon");
    let reloaded = Scorer::init(0.5, 0.5, &lm_path, Some(fst_path.as_path()), &alphabet)
        .expect("valid scorer");
    std::fs::remove_file(&lm_path).ok();
    std::fs::remove_file(&fst_path).ok();

    let probs = vec![
        vec![0.9, 0.02, 0.03, 0.05],
        vec![0.05, 0.3, 0.4, 0.25],
        vec![0.05, 0.05, 0.1, 0.8],
    ];
    let with_built = ctc_beam_search_decoder(&probs, &alphabet, &config(16), Some(&scorer))
        .expect("valid input");
    let with_loaded = ctc_beam_search_decoder(&probs, &alphabet, &config(16), Some(&reloaded))
        .expect("valid input");
    assert_eq!(with_built, with_loaded);
}

#[test]
fn decode_without_new_timesteps_returns_the_same_result() {
    let probs = vec![vec![0.4, 0.4, 0.2], vec![0.3, 0.3, 0.4]];
    let mut state = DecoderState::new(&ab_alphabet(), &config(4), None).expect("valid state");
    state.next(&probs).expect("valid input");
    assert_eq!(state.decode(), state.decode());
}

#[test]
fn batched_decoding_matches_single_utterances() {
    let mut rng = StdRng::seed_from_u64(7);
    let alphabet = ab_alphabet();
    let config = config(8);

    let mut utterances = Vec::new();
    let mut seq_lengths = Vec::new();
    for _ in 0..4 {
        let padded_len = rng.gen_range(2..6);
        let valid_len = rng.gen_range(1..=padded_len);
        let mut rows = Vec::with_capacity(padded_len);
        for _ in 0..padded_len {
            let mut row: Vec<f64> = (0..3).map(|_| rng.gen_range(0.05..1.0)).collect();
            let sum: f64 = row.iter().sum();
            row.iter_mut().for_each(|p| *p /= sum);
            rows.push(row);
        }
        utterances.push(rows);
        seq_lengths.push(valid_len);
    }

    let batched = ctc_beam_search_decoder_batch(
        &utterances,
        &seq_lengths,
        &alphabet,
        &DecoderConfig {
            num_processes: 2,
            ..config.clone()
        },
        None,
    )
    .expect("valid batch");

    for ((utterance, &len), outputs) in utterances.iter().zip(&seq_lengths).zip(&batched) {
        let single =
            ctc_beam_search_decoder(&utterance[..len], &alphabet, &config, None).expect("valid");
        assert_eq!(&single, outputs);
    }
}
