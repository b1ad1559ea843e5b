use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use localdex_core::config::Settings;
use localdex_core::traits::Embedder;
use localdex_core::types::Modality;
use tracing::info;

use crate::hash::HashEmbedder;
use crate::model::{resolve_model_dir, CandleEmbedder};
use crate::profile::spec_for;

type Loader = dyn Fn(Modality) -> Result<Arc<dyn Embedder>> + Send + Sync;

/// One lazily created embedder per modality. A modality that is never asked
/// for is never loaded; `reset` drops everything that was.
pub struct EmbedderSet {
    loader: Box<Loader>,
    slots: Mutex<HashMap<Modality, Arc<dyn Embedder>>>,
}

impl EmbedderSet {
    pub fn new(loader: impl Fn(Modality) -> Result<Arc<dyn Embedder>> + Send + Sync + 'static) -> Self {
        Self { loader: Box::new(loader), slots: Mutex::new(HashMap::new()) }
    }

    /// Hash embedders with the real profiles' identities and dimensions.
    pub fn hashed() -> Self {
        Self::new(|m| Ok(Arc::new(HashEmbedder::new(spec_for(m).profile)) as Arc<dyn Embedder>))
    }

    /// Candle models located from `settings`, with relative model dirs
    /// resolved against `base`; the hash embedder when `embedding.fake` is set.
    pub fn from_settings(settings: &Settings, base: &Path) -> Self {
        if settings.embedding.fake {
            info!("using hash embedders");
            return Self::hashed();
        }
        let settings = settings.clone();
        let base: PathBuf = base.to_path_buf();
        Self::new(move |m| {
            let spec = spec_for(m);
            let dir = resolve_model_dir(settings.model_dir(m, &base), &spec.profile.model_id)?;
            let e = &settings.embedding;
            let model = CandleEmbedder::load(spec, &dir, e.device, e.cpu_batch_size, e.accelerator_batch_size)?;
            Ok(Arc::new(model) as Arc<dyn Embedder>)
        })
    }

    pub fn get(&self, modality: Modality) -> Result<Arc<dyn Embedder>> {
        let mut slots = self.slots.lock().map_err(|_| anyhow!("embedder set poisoned"))?;
        if let Some(e) = slots.get(&modality) {
            return Ok(e.clone());
        }
        let e = (self.loader)(modality)?;
        slots.insert(modality, e.clone());
        Ok(e)
    }

    pub fn is_loaded(&self, modality: Modality) -> bool {
        self.slots.lock().map(|s| s.contains_key(&modality)).unwrap_or(false)
    }

    pub fn reset(&self) {
        if let Ok(mut slots) = self.slots.lock() {
            slots.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn loads_each_modality_once_and_only_on_demand() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let set = EmbedderSet::new(move |m| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(HashEmbedder::new(spec_for(m).profile)) as Arc<dyn Embedder>)
        });
        assert!(!set.is_loaded(Modality::Code));
        set.get(Modality::Code).expect("code");
        set.get(Modality::Code).expect("code again");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!set.is_loaded(Modality::Prose));

        set.reset();
        assert!(!set.is_loaded(Modality::Code));
        set.get(Modality::Code).expect("reloaded");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn load_failures_are_not_cached() {
        let set = EmbedderSet::new(|_| Err(anyhow!("no weights")));
        assert!(set.get(Modality::Prose).is_err());
        assert!(!set.is_loaded(Modality::Prose));
    }

    #[test]
    fn fake_setting_selects_hash_embedders() {
        let mut settings = Settings::default();
        settings.embedding.fake = true;
        let set = EmbedderSet::from_settings(&settings, Path::new("."));
        let prose = set.get(Modality::Prose).expect("prose");
        assert_eq!(prose.profile().dim, 1024);
        assert_eq!(prose.device_description(), "cpu (hash)");
    }
}
