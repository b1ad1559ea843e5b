use std::hash::{Hash, Hasher};

use localdex_core::traits::Embedder;
use localdex_core::types::ModelProfile;
use twox_hash::XxHash64;

/// Deterministic bag-of-tokens embedder for tests and model-free runs.
/// Texts sharing tokens land close together; output is L2-normalized.
pub struct HashEmbedder {
    profile: ModelProfile,
}

impl HashEmbedder {
    pub fn new(profile: ModelProfile) -> Self {
        Self { profile }
    }
}

impl Embedder for HashEmbedder {
    fn profile(&self) -> &ModelProfile {
        &self.profile
    }

    fn device_description(&self) -> String {
        "cpu (hash)".to_string()
    }

    fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let dim = self.profile.dim;
        let mut v = vec![0f32; dim];
        for (i, token) in text.split(|c: char| !c.is_alphanumeric() && c != '_').filter(|t| !t.is_empty()).enumerate() {
            let mut hasher = XxHash64::with_seed(0);
            token.to_lowercase().hash(&mut hasher);
            let h = hasher.finish();
            let idx = (h as usize) % dim;
            let val = (((h >> 32) as u32) as f32) / (u32::MAX as f32);
            v[idx] += 0.5 + val + (i as f32 % 3.0) * 0.01;
        }
        let norm = (v.iter().map(|x| x * x).sum::<f32>()).sqrt();
        if norm > 0.0 {
            for x in &mut v { *x /= norm; }
        } else {
            v[0] = 1.0;
        }
        Ok(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::code_spec;

    #[test]
    fn shapes_and_determinism() {
        let e = HashEmbedder::new(code_spec().profile);
        let a = e.embed("hello world").expect("embed");
        let b = e.embed("hello world").expect("embed");
        assert_eq!(a.len(), 384);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() <= 1e-3, "norm={norm}");
        assert_eq!(a, b);
    }

    #[test]
    fn empty_text_is_still_a_unit_vector() {
        let e = HashEmbedder::new(code_spec().profile);
        let v = e.embed("").expect("embed");
        assert_eq!(v.iter().filter(|x| **x != 0.0).count(), 1);
    }
}
