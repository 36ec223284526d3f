//! Novelty scoring by prediction error between adjacent content blocks.
//!
//! Content is split into blocks of approximately `novelty_block_tokens`
//! tokens (one token ≈ four characters). Each block is embedded, the
//! next block is predicted from the current one (identity transform),
//! and the prediction error is the cosine distance between prediction
//! and actual. Large, spiky errors read as novel; flat, small errors
//! read as routine:
//!
//! ```text
//! score = clamp(10 · (0.5·mean(e) + 0.3·max(e) + 0.2·stdev(e)), 0, 10)
//! ```
//!
//! boosted ×1.2 when `mean(e)` exceeds the prediction threshold, damped
//! ×0.8 otherwise, then re-clamped.
//!
//! The default embedder is a deterministic BLAKE3-projected vector, so
//! scoring needs no model and is reproducible. A learned model can
//! implement [`BlockEmbedder`]; per-block failures fall back to the
//! hash surrogate rather than aborting.

use std::sync::Arc;

use tracing::debug;

use crate::config::NoveltyConfig;
use crate::fingerprint::Fingerprint;

use super::types::NoveltyOutput;

/// Maps a content block to a numeric embedding.
///
/// Returning `None` signals the block could not be embedded; the
/// checker substitutes the hash surrogate for that block.
pub trait BlockEmbedder: Send + Sync {
    /// Embed one block.
    fn embed(&self, block: &str) -> Option<Vec<f32>>;
}

/// Deterministic hash-projected embedder.
///
/// Expands the block's BLAKE3 hash into `dim` floats in `[-1, 1]` via
/// the extendable output function. Identical blocks embed identically;
/// unrelated blocks are near-orthogonal in expectation.
pub struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    /// Create an embedder producing `dim`-dimensional vectors.
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(4) }
    }
}

impl BlockEmbedder for HashEmbedder {
    fn embed(&self, block: &str) -> Option<Vec<f32>> {
        let mut hasher = blake3::Hasher::new();
        hasher.update(block.as_bytes());
        let mut reader = hasher.finalize_xof();
        let mut bytes = vec![0u8; self.dim * 4];
        reader.fill(&mut bytes);

        let vector = bytes
            .chunks_exact(4)
            .map(|chunk| {
                let word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                (f64::from(word) / f64::from(u32::MAX) * 2.0 - 1.0) as f32
            })
            .collect();
        Some(vector)
    }
}

/// Novelty scorer.
pub struct NoveltyChecker {
    config: NoveltyConfig,
    embedder: Arc<dyn BlockEmbedder>,
    surrogate: HashEmbedder,
}

impl NoveltyChecker {
    /// Create a checker using the hash surrogate.
    pub fn new(config: NoveltyConfig) -> Self {
        let surrogate = HashEmbedder::new(config.embedding_dim);
        Self {
            embedder: Arc::new(HashEmbedder::new(config.embedding_dim)),
            surrogate,
            config,
        }
    }

    /// Create a checker with a custom embedder (e.g. a learned model,
    /// loaded eagerly by the caller). Failures fall back to the hash
    /// surrogate per block.
    pub fn with_embedder(config: NoveltyConfig, embedder: Arc<dyn BlockEmbedder>) -> Self {
        let surrogate = HashEmbedder::new(config.embedding_dim);
        Self {
            embedder,
            surrogate,
            config,
        }
    }

    /// Score `content`, optionally seeded with blocks from earlier
    /// context so novelty is judged relative to what came before.
    pub fn score(
        &self,
        content: &str,
        content_id: &str,
        previous_blocks: Option<&[String]>,
    ) -> NoveltyOutput {
        let mut blocks: Vec<String> = previous_blocks
            .map(|prior| prior.to_vec())
            .unwrap_or_default();
        blocks.extend(self.split_blocks(content));

        // Block identity is content-addressed; identical blocks share a
        // fingerprint and therefore an embedding.
        let mut distinct: Vec<Fingerprint> = blocks.iter().map(|b| Fingerprint::of(b)).collect();
        distinct.sort();
        distinct.dedup();
        debug!(
            content_id,
            blocks = blocks.len(),
            distinct = distinct.len(),
            "scoring novelty"
        );

        let embeddings: Vec<Vec<f32>> = blocks
            .iter()
            .map(|block| {
                self.embedder
                    .embed(block)
                    .or_else(|| self.surrogate.embed(block))
                    .unwrap_or_else(|| vec![0.0; self.config.embedding_dim])
            })
            .collect();

        let errors = prediction_errors(&embeddings);
        let score = self.score_from_errors(&errors);

        NoveltyOutput {
            target_output_id: content_id.to_string(),
            score,
            prediction_errors: errors,
            block_count: blocks.len(),
        }
    }

    fn split_blocks(&self, content: &str) -> Vec<String> {
        // One token ≈ four characters; block size is approximate.
        let chars_per_block = self.config.novelty_block_tokens.max(1) * 4;
        let chars: Vec<char> = content.chars().collect();
        chars
            .chunks(chars_per_block)
            .map(|chunk| chunk.iter().collect())
            .collect()
    }

    fn score_from_errors(&self, errors: &[f64]) -> f64 {
        if errors.is_empty() {
            return 0.0;
        }
        let mean = errors.iter().sum::<f64>() / errors.len() as f64;
        let max = errors.iter().cloned().fold(0.0_f64, f64::max);
        let stdev = if errors.len() > 1 {
            let var = errors.iter().map(|e| (e - mean).powi(2)).sum::<f64>()
                / errors.len() as f64;
            var.sqrt()
        } else {
            0.0
        };

        let mut score = (0.5 * mean + 0.3 * max + 0.2 * stdev) * 10.0;
        score = score.clamp(0.0, 10.0);
        if mean > self.config.prediction_threshold {
            score *= 1.2;
        } else {
            score *= 0.8;
        }
        score.clamp(0.0, 10.0)
    }
}

/// Identity-predictor errors between adjacent embeddings: cosine
/// distance in `[0, 1]`.
fn prediction_errors(embeddings: &[Vec<f32>]) -> Vec<f64> {
    if embeddings.len() < 2 {
        return vec![0.0];
    }
    embeddings
        .windows(2)
        .map(|pair| {
            let sim = cosine(&pair[0], &pair[1]);
            (1.0 - sim.abs()).clamp(0.0, 1.0)
        })
        .collect()
}

fn cosine(a: &[f32], b: &[f32]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| f64::from(*x) * f64::from(*y)).sum();
    let norm_a: f64 = a.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checker() -> NoveltyChecker {
        NoveltyChecker::new(NoveltyConfig::default())
    }

    fn varied_text(paragraphs: usize) -> String {
        (0..paragraphs)
            .map(|i| {
                format!(
                    "Paragraph {i} explores a distinct theme: topic-{i} with its own \
                     vocabulary, framing, and an unusual turn number {}.",
                    i * 31 + 7
                )
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    // ── Bounds ────────────────────────────────────────────────

    #[test]
    fn scores_stay_in_bounds() {
        let checker = checker();
        let inputs = [
            String::new(),
            "short".to_string(),
            "word ".repeat(50),
            varied_text(12),
            "same same same ".repeat(200),
        ];
        for input in &inputs {
            let output = checker.score(input, "id", None);
            assert!(
                (0.0..=10.0).contains(&output.score),
                "score {} out of bounds for {:?} chars",
                output.score,
                input.len()
            );
        }
    }

    #[test]
    fn scoring_is_deterministic() {
        let checker = checker();
        let text = varied_text(8);
        let a = checker.score(&text, "a", None);
        let b = checker.score(&text, "b", None);
        assert_eq!(a.score, b.score);
        assert_eq!(a.prediction_errors, b.prediction_errors);
    }

    #[test]
    fn single_block_scores_zero() {
        let checker = checker();
        let output = checker.score("tiny", "id", None);
        assert_eq!(output.prediction_errors, vec![0.0]);
        assert_eq!(output.score, 0.0);
    }

    #[test]
    fn repeated_blocks_score_below_varied_blocks() {
        let checker = checker();
        // Identical blocks embed identically: zero prediction error.
        let block = "z".repeat(400);
        let repeated = block.repeat(6);
        let repetitive = checker.score(&repeated, "rep", None);
        let varied = checker.score(&varied_text(12), "var", None);
        assert!(
            repetitive.score < varied.score,
            "repetitive {} !< varied {}",
            repetitive.score,
            varied.score
        );
    }

    #[test]
    fn block_count_reflects_content_length() {
        let checker = checker();
        // 400 chars per block at the default 100-token block size.
        let output = checker.score(&"x".repeat(1200), "id", None);
        assert_eq!(output.block_count, 3);
    }

    #[test]
    fn previous_blocks_extend_the_sequence() {
        let checker = checker();
        let prior = vec!["earlier context block".to_string()];
        let without = checker.score("fresh content here", "id", None);
        let with = checker.score("fresh content here", "id", Some(&prior));
        assert_eq!(without.block_count + 1, with.block_count);
    }

    // ── Embedder fallback ─────────────────────────────────────

    struct BrokenEmbedder;

    impl BlockEmbedder for BrokenEmbedder {
        fn embed(&self, _block: &str) -> Option<Vec<f32>> {
            None
        }
    }

    #[test]
    fn broken_embedder_falls_back_to_surrogate() {
        let config = NoveltyConfig::default();
        let with_broken =
            NoveltyChecker::with_embedder(config.clone(), Arc::new(BrokenEmbedder));
        let with_hash = NoveltyChecker::new(config);
        let text = varied_text(8);
        assert_eq!(
            with_broken.score(&text, "id", None).score,
            with_hash.score(&text, "id", None).score
        );
    }

    // ── Embedding surrogate ───────────────────────────────────

    #[test]
    fn hash_embedder_is_deterministic_and_content_sensitive() {
        let embedder = HashEmbedder::new(64);
        let a = embedder.embed("block one").expect("embed");
        let b = embedder.embed("block one").expect("embed");
        let c = embedder.embed("block two").expect("embed");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
        assert!(a.iter().all(|v| (-1.0..=1.0).contains(v)));
    }
}
