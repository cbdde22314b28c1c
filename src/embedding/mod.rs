//! The embedding provider interface and its content-addressed cache.
//!
//! The embedding model is an external collaborator (out of scope per the
//! design — no production backend ships in this crate); [`EmbeddingProvider`]
//! is the contract the rest of the engine is built against. [`cache`] wraps
//! any provider with a persisted, content-hashed memoization layer.

pub mod cache;

use anyhow::Result;

/// Trait for embedding text into vectors. Implementations produce
/// normalized vectors of a fixed [`EmbeddingProvider::dimension`], constant
/// for the deployment. All methods are synchronous — callers in async
/// contexts use `tokio::task::spawn_blocking`.
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text string into a vector.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a single text string with a short (~5s) deadline, for
    /// non-critical paths (e.g. auto-link's best-effort embedding).
    /// Default implementation simply delegates to [`Self::embed`].
    fn embed_fast(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(text)
    }

    /// Embed a batch of text strings, positional correspondence required.
    /// Implementations may override for batched inference.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    /// The number of dimensions this provider produces, constant per deployment.
    fn dimension(&self) -> usize;

    /// The model identifier, used to detect embedding-cache staleness across restarts.
    fn model_name(&self) -> &str;
}


#[cfg(test)]
mod tests {
    use super::test_support::StubProvider;
    use super::*;

    #[test]
    fn stub_provider_is_deterministic() {
        let p = StubProvider::new(8);
        let a = p.embed("docker restart").unwrap();
        let b = p.embed("docker restart").unwrap();
        assert_eq!(a, b);
        assert_eq!(p.call_count(), 2);
    }

    #[test]
    fn embed_fast_defaults_to_embed() {
        let p = StubProvider::new(8);
        let a = p.embed("x").unwrap();
        let b = p.embed_fast("x").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn embed_batch_preserves_order() {
        let p = StubProvider::new(8);
        let texts = ["a", "b", "c"];
        let batch = p.embed_batch(&texts).unwrap();
        for (t, v) in texts.iter().zip(batch.iter()) {
            assert_eq!(&p.embed(t).unwrap(), v);
        }
    }
}
