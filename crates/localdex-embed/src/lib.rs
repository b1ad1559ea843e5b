//! Embedders for the code and prose model profiles.

pub mod device;
pub mod hash;
pub mod model;
pub mod pool;
pub mod profile;
pub mod set;
pub mod tokenize;

pub use device::{select_device, DeviceSelection};
pub use hash::HashEmbedder;
pub use model::{resolve_model_dir, CandleEmbedder};
pub use pool::masked_mean_l2;
pub use profile::{code_spec, prose_spec, spec_for, ModelSpec};
pub use set::EmbedderSet;
