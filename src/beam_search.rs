use crate::common::{log_softmax, ModelError};
use crate::config::GenerationDefaults;
use ndarray::{Array1, Array2, ArrayView1};

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("Invalid generation settings: {0}")]
    InvalidConfig(String),
    #[error("Decoder returned logits for {actual} beams, expected {expected}")]
    BeamCount { expected: usize, actual: usize },
    #[error("Only {found} live candidates for {needed} beams")]
    Exhausted { found: usize, needed: usize },
}

/// One incremental decoding step per call, for every beam at once.
pub trait StepDecoder {
    /// Logits `[num_beams, vocab]` for the next position, given each beam's newest token.
    fn next_logits(&mut self, last_tokens: &[u32]) -> Result<Array2<f32>, GenerationError>;

    /// Beam `i` continues from what was beam `beam_indices[i]`.
    fn reorder(&mut self, beam_indices: &[usize]) -> Result<(), GenerationError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct BeamSearchConfig {
    pub num_beams: usize,
    pub length_penalty: f32,
    pub early_stopping: bool,
    /// Lengths count decoder tokens, the start token included.
    pub min_length: usize,
    pub max_length: usize,
    pub no_repeat_ngram_size: usize,
    pub decoder_start_token_id: u32,
    pub eos_token_id: u32,
    pub forced_bos_token_id: Option<u32>,
    pub forced_eos_token_id: Option<u32>,
}

impl BeamSearchConfig {
    pub fn new(defaults: &GenerationDefaults, num_beams: usize, min_length: usize, max_length: usize) -> Self {
        Self {
            num_beams,
            length_penalty: 1.0,
            early_stopping: false,
            min_length,
            max_length,
            no_repeat_ngram_size: defaults.no_repeat_ngram_size,
            decoder_start_token_id: defaults.decoder_start_token_id,
            eos_token_id: defaults.eos_token_id,
            forced_bos_token_id: defaults.forced_bos_token_id,
            forced_eos_token_id: defaults.forced_eos_token_id,
        }
    }

    pub fn with_length_penalty(mut self, length_penalty: f32) -> Self {
        self.length_penalty = length_penalty;
        self
    }

    pub fn with_early_stopping(mut self, early_stopping: bool) -> Self {
        self.early_stopping = early_stopping;
        self
    }

    pub fn validate(&self) -> Result<(), GenerationError> {
        if self.num_beams == 0 {
            return Err(GenerationError::InvalidConfig("num_beams must be positive".to_string()));
        }
        if self.max_length == 0 {
            return Err(GenerationError::InvalidConfig("max_length must be positive".to_string()));
        }
        if self.min_length > self.max_length {
            return Err(GenerationError::InvalidConfig(format!(
                "min_length ({}) exceeds max_length ({})",
                self.min_length, self.max_length
            )));
        }
        Ok(())
    }

    /// Masks `log_probs` of one beam whose tokens so far are `tokens`.
    fn process(&self, log_probs: &mut Array1<f32>, tokens: &[u32]) {
        let cur_len = tokens.len();
        let mut ban = |id: u32| {
            if let Some(v) = log_probs.get_mut(id as usize) {
                *v = f32::NEG_INFINITY;
            }
        };

        if cur_len < self.min_length {
            ban(self.eos_token_id);
        }
        for id in banned_ngram_tokens(tokens, self.no_repeat_ngram_size) {
            ban(id);
        }

        let forced = match (self.forced_bos_token_id, self.forced_eos_token_id) {
            (_, Some(eos)) if cur_len + 1 == self.max_length => Some(eos),
            (Some(bos), _) if cur_len == 1 => Some(bos),
            _ => None,
        };
        if let Some(id) = forced {
            if (id as usize) < log_probs.len() {
                log_probs.fill(f32::NEG_INFINITY);
                log_probs[id as usize] = 0.0;
            }
        }
    }
}

/// Tokens that would complete an n-gram already present in `tokens`.
pub fn banned_ngram_tokens(tokens: &[u32], n: usize) -> Vec<u32> {
    if n == 0 || tokens.len() + 1 < n {
        return Vec::new();
    }
    let prefix = &tokens[tokens.len() + 1 - n..];
    tokens
        .windows(n)
        .filter(|window| &window[..n - 1] == prefix)
        .map(|window| window[n - 1])
        .collect()
}

#[derive(Debug, Clone)]
pub struct Hypothesis {
    pub tokens: Vec<u32>,
    pub score: f32,
}

/// The best finished hypotheses, scored by `sum_logprobs / len^length_penalty`.
#[derive(Debug)]
pub struct BeamHypotheses {
    num_beams: usize,
    length_penalty: f32,
    early_stopping: bool,
    hypotheses: Vec<Hypothesis>,
    worst_score: f32,
}

impl BeamHypotheses {
    pub fn new(num_beams: usize, length_penalty: f32, early_stopping: bool) -> Self {
        Self {
            num_beams,
            length_penalty,
            early_stopping,
            hypotheses: Vec::with_capacity(num_beams + 1),
            worst_score: 1e9,
        }
    }

    pub fn len(&self) -> usize {
        self.hypotheses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hypotheses.is_empty()
    }

    pub fn worst_score(&self) -> f32 {
        self.worst_score
    }

    pub fn add(&mut self, tokens: Vec<u32>, sum_logprobs: f32) {
        let score = sum_logprobs / (tokens.len() as f32).powf(self.length_penalty);
        if self.hypotheses.len() < self.num_beams || score > self.worst_score {
            self.hypotheses.push(Hypothesis { tokens, score });
            if self.hypotheses.len() > self.num_beams {
                let worst = self
                    .hypotheses
                    .iter()
                    .enumerate()
                    .min_by(|a, b| a.1.score.total_cmp(&b.1.score))
                    .map(|(i, _)| i);
                if let Some(i) = worst {
                    self.hypotheses.remove(i);
                }
                self.worst_score = self
                    .hypotheses
                    .iter()
                    .map(|h| h.score)
                    .fold(f32::INFINITY, f32::min);
            } else {
                self.worst_score = self.worst_score.min(score);
            }
        }
    }

    /// Whether no open beam can still beat the finished set.
    pub fn is_done(&self, best_sum_logprobs: f32, cur_len: usize) -> bool {
        if self.hypotheses.len() < self.num_beams {
            return false;
        }
        if self.early_stopping {
            return true;
        }
        let highest_attainable = best_sum_logprobs / (cur_len as f32).powf(self.length_penalty);
        self.worst_score >= highest_attainable
    }

    /// Highest-scoring hypothesis; among ties, the one added last.
    pub fn best(&self) -> Option<&Hypothesis> {
        self.hypotheses
            .iter()
            .max_by(|a, b| a.score.total_cmp(&b.score))
    }
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    beam: usize,
    token: u32,
    score: f32,
}

/// The `k` largest entries of `row` as `(index, value)`, best first.
fn top_k(row: ArrayView1<f32>, k: usize) -> Vec<(usize, f32)> {
    let mut best: Vec<(usize, f32)> = Vec::with_capacity(k + 1);
    for (i, &v) in row.iter().enumerate() {
        if best.len() == k && best.last().map_or(false, |&(_, worst)| v <= worst) {
            continue;
        }
        let pos = best.partition_point(|&(_, b)| b >= v);
        best.insert(pos, (i, v));
        best.truncate(k);
    }
    best
}

/// Beam search over `decoder`. Returns the best sequence, decoder start token
/// first, with EOS appended when it finished before `max_length`.
pub fn beam_search<D: StepDecoder + ?Sized>(
    decoder: &mut D,
    config: &BeamSearchConfig,
) -> Result<Vec<u32>, GenerationError> {
    config.validate()?;
    let num_beams = config.num_beams;
    let mut sequences: Vec<Vec<u32>> = vec![vec![config.decoder_start_token_id]; num_beams];
    // Only the first beam is live at the start, the others are copies of it.
    let mut beam_scores: Vec<f32> = (0..num_beams).map(|i| if i == 0 { 0.0 } else { -1e9 }).collect();
    let mut finished = BeamHypotheses::new(num_beams, config.length_penalty, config.early_stopping);
    let mut done = false;

    let mut cur_len = 1;
    while cur_len < config.max_length {
        let last_tokens: Vec<u32> = sequences.iter().map(|s| s[s.len() - 1]).collect();
        let logits = decoder.next_logits(&last_tokens)?;
        if logits.nrows() != num_beams {
            return Err(GenerationError::BeamCount {
                expected: num_beams,
                actual: logits.nrows(),
            });
        }

        let mut candidates: Vec<Candidate> = Vec::with_capacity(num_beams * 2 * num_beams);
        for (beam, row) in logits.rows().into_iter().enumerate() {
            let mut log_probs = log_softmax(row);
            config.process(&mut log_probs, &sequences[beam]);
            let beam_score = beam_scores[beam];
            for (token, score) in top_k(log_probs.view(), 2 * num_beams) {
                candidates.push(Candidate {
                    beam,
                    token: token as u32,
                    score: score + beam_score,
                });
            }
        }
        candidates.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then(a.beam.cmp(&b.beam))
                .then(a.token.cmp(&b.token))
        });
        candidates.truncate(2 * num_beams);

        let mut next: Vec<Candidate> = Vec::with_capacity(num_beams);
        for (rank, candidate) in candidates.iter().enumerate() {
            if candidate.token == config.eos_token_id {
                // An EOS outside the top `num_beams` is not a finished hypothesis.
                if rank < num_beams {
                    finished.add(sequences[candidate.beam].clone(), candidate.score);
                }
            } else {
                next.push(*candidate);
            }
            if next.len() == num_beams {
                break;
            }
        }
        if next.len() < num_beams {
            return Err(GenerationError::Exhausted {
                found: next.len(),
                needed: num_beams,
            });
        }

        let best_score = candidates.first().map_or(f32::NEG_INFINITY, |c| c.score);
        done = finished.is_done(best_score, cur_len);

        sequences = next
            .iter()
            .map(|c| {
                let mut tokens = sequences[c.beam].clone();
                tokens.push(c.token);
                tokens
            })
            .collect();
        beam_scores = next.iter().map(|c| c.score).collect();
        cur_len += 1;

        if done {
            break;
        }
        let beam_indices: Vec<usize> = next.iter().map(|c| c.beam).collect();
        decoder.reorder(&beam_indices)?;
        log::trace!("step {}: best running score {:.4}", cur_len, beam_scores[0]);
    }

    if !done {
        for (tokens, score) in sequences.into_iter().zip(beam_scores) {
            finished.add(tokens, score);
        }
    }
    log::debug!("beam search finished at length {} with {} hypotheses", cur_len, finished.len());

    let mut best = finished
        .best()
        .map(|h| h.tokens.clone())
        .unwrap_or_else(|| vec![config.decoder_start_token_id]);
    if best.len() < config.max_length {
        best.push(config.eos_token_id);
    }
    Ok(best)
}
