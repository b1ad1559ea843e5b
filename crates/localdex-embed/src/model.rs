use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, bail, Context, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use candle_transformers::models::xlm_roberta::{Config as XLMRobertaConfig, XLMRobertaModel};
use localdex_core::config::{data_root, expand_path, DeviceChoice};
use localdex_core::error::Error;
use localdex_core::traits::{BatchEmbedding, Embedder};
use localdex_core::types::ModelProfile;
use tokenizers::Tokenizer;
use tracing::{debug, info, warn};

use crate::device::{select_device, DeviceSelection};
use crate::pool::{cls_l2, masked_mean_l2};
use crate::profile::{Backbone, ModelSpec, Pooling};
use crate::tokenize::tokenize_batch;

enum Network {
    Bert(BertModel),
    XlmRoberta(XLMRobertaModel),
}

/// Candle transformer embedder for one model profile.
pub struct CandleEmbedder {
    spec: ModelSpec,
    network: Network,
    tokenizer: Tokenizer,
    device: DeviceSelection,
    batch_size: usize,
}

impl CandleEmbedder {
    /// Loads on the best device; if that fails on an accelerator, loads once
    /// more on the CPU and records why.
    pub fn load(spec: ModelSpec, model_dir: &Path, choice: DeviceChoice, cpu_batch: usize, accel_batch: usize) -> Result<Self> {
        let selection = select_device(choice);
        let started = Instant::now();
        let (network, tokenizer, device) = match load_on(&spec, model_dir, &selection.device) {
            Ok((n, t)) => (n, t, selection),
            Err(e) if selection.is_accelerator() => {
                warn!(model = %spec.profile.model_id, error = %format!("{e:#}"), "model init failed on accelerator, retrying on cpu");
                let (n, t) = load_on(&spec, model_dir, &Device::Cpu)?;
                let fallback = DeviceSelection {
                    device: Device::Cpu,
                    description: "cpu (fell back)".into(),
                    fallback_reason: Some(format!("{} init failed: {e:#}", selection.description)),
                };
                (n, t, fallback)
            }
            Err(e) => return Err(e),
        };
        let batch_size = if device.is_accelerator() { accel_batch } else { cpu_batch };
        info!(
            model = %spec.profile.model_id,
            device = %device.description,
            batch_size,
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "embedding model loaded"
        );
        Ok(Self { spec, network, tokenizer, device, batch_size })
    }

    pub fn device(&self) -> &DeviceSelection {
        &self.device
    }

    fn forward(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let dev = &self.device.device;
        let (input_ids, attention_mask) =
            tokenize_batch(&self.tokenizer, texts, self.spec.profile.max_len, self.spec.pad_id, dev)?;
        let token_type_ids = input_ids.zeros_like()?;
        let hidden = match &self.network {
            Network::Bert(m) => m.forward(&input_ids, &token_type_ids, Some(&attention_mask))?,
            Network::XlmRoberta(m) => m.forward(&input_ids, &attention_mask, &token_type_ids, None, None, None)?,
        };
        let pooled = match self.spec.pooling {
            Pooling::Cls => cls_l2(&hidden)?,
            Pooling::MaskedMean => masked_mean_l2(&hidden, &attention_mask)?,
        };
        Ok(pooled.to_device(&Device::Cpu)?.to_dtype(DType::F32)?.to_vec2::<f32>()?)
    }

    fn accept(&self, index: usize, row: Vec<f32>, out: &mut BatchEmbedding) {
        let expected = self.spec.profile.dim;
        if row.len() == expected {
            out.embedded.push((index, row));
        } else {
            let err = Error::DimensionMismatch { expected, actual: row.len() };
            warn!(index, error = %err, "dropping embedding");
            out.failures.push((index, err.to_string()));
        }
    }
}

impl Embedder for CandleEmbedder {
    fn profile(&self) -> &ModelProfile {
        &self.spec.profile
    }

    fn device_description(&self) -> String {
        match &self.device.fallback_reason {
            Some(reason) => format!("{} ({reason})", self.device.description),
            None => self.device.description.clone(),
        }
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let row = self.forward(&[text])?.pop().ok_or_else(|| anyhow!("model returned no rows"))?;
        let expected = self.spec.profile.dim;
        if row.len() != expected {
            return Err(Error::DimensionMismatch { expected, actual: row.len() }.into());
        }
        Ok(row)
    }

    /// Runs whole batches when possible; a failing batch is retried item by
    /// item so one bad input only costs itself.
    fn embed_batch(&self, texts: &[String]) -> BatchEmbedding {
        let mut out = BatchEmbedding::default();
        for (b, group) in texts.chunks(self.batch_size.max(1)).enumerate() {
            let base = b * self.batch_size.max(1);
            let refs: Vec<&str> = group.iter().map(String::as_str).collect();
            match self.forward(&refs) {
                Ok(rows) if rows.len() == group.len() => {
                    for (i, row) in rows.into_iter().enumerate() {
                        self.accept(base + i, row, &mut out);
                    }
                }
                result => {
                    if let Err(e) = result {
                        debug!(error = %format!("{e:#}"), size = group.len(), "batch failed, isolating items");
                    }
                    for (i, text) in group.iter().enumerate() {
                        match self.forward(&[text.as_str()]) {
                            Ok(mut rows) if rows.len() == 1 => self.accept(base + i, rows.remove(0), &mut out),
                            Ok(_) => out.failures.push((base + i, "model returned no rows".into())),
                            Err(e) => out.failures.push((base + i, format!("{e:#}"))),
                        }
                    }
                }
            }
        }
        out
    }
}

fn load_on(spec: &ModelSpec, model_dir: &Path, device: &Device) -> Result<(Network, Tokenizer)> {
    let tokenizer_path = model_dir.join("tokenizer.json");
    let tokenizer = Tokenizer::from_file(&tokenizer_path)
        .map_err(|e| anyhow!("Failed to load tokenizer from {}: {}", tokenizer_path.display(), e))?;
    let config_path = model_dir.join("config.json");
    let config_raw = std::fs::read_to_string(&config_path).with_context(|| format!("read {}", config_path.display()))?;
    let weights = read_weights(model_dir)?;
    let vb = VarBuilder::from_tensors(weights, DType::F32, device);
    let network = match spec.backbone {
        Backbone::Bert => {
            let config: BertConfig = serde_json::from_str(&config_raw)?;
            Network::Bert(BertModel::load(vb, &config)?)
        }
        Backbone::XlmRoberta => {
            let config: XLMRobertaConfig = serde_json::from_str(&config_raw)?;
            Network::XlmRoberta(XLMRobertaModel::new(&config, vb)?)
        }
    };
    Ok((network, tokenizer))
}

fn read_weights(model_dir: &Path) -> Result<HashMap<String, Tensor>> {
    let safetensors = model_dir.join("model.safetensors");
    if safetensors.exists() {
        return Ok(candle_core::safetensors::load(&safetensors, &Device::Cpu)?);
    }
    let pickle = model_dir.join("pytorch_model.bin");
    if pickle.exists() {
        return Ok(candle_core::pickle::read_all(&pickle)?.into_iter().collect());
    }
    bail!("no model.safetensors or pytorch_model.bin in {}", model_dir.display())
}

/// Finds the weights directory for `model_id`: the configured directory,
/// then `$LOCALDEX_MODEL_DIR/<model_id>`, then `<data root>/models/<model_id>`.
pub fn resolve_model_dir(configured: Option<PathBuf>, model_id: &str) -> Result<PathBuf> {
    if let Some(p) = configured {
        if p.exists() {
            return Ok(p);
        }
        bail!("configured model directory {} does not exist", p.display());
    }
    if let Ok(dir) = std::env::var("LOCALDEX_MODEL_DIR") {
        let p = expand_path(dir).join(model_id);
        if p.exists() {
            return Ok(p);
        }
    }
    let p = data_root()?.join("models").join(model_id);
    if p.exists() {
        return Ok(p);
    }
    Err(anyhow!("Could not locate model directory for {model_id}"))
}
