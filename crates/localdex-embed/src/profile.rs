use localdex_core::types::{Modality, ModelProfile};

/// Transformer family a profile's weights belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backbone {
    Bert,
    XlmRoberta,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pooling {
    Cls,
    MaskedMean,
}

/// Static description of a supported model.
#[derive(Debug, Clone)]
pub struct ModelSpec {
    pub profile: ModelProfile,
    pub backbone: Backbone,
    pub pooling: Pooling,
    pub pad_id: u32,
}

pub fn code_spec() -> ModelSpec {
    ModelSpec {
        profile: ModelProfile {
            modality: Modality::Code,
            model_id: "bge-small-en-v1.5".into(),
            display_name: "BGE small (code)".into(),
            dim: 384,
            max_len: 512,
        },
        backbone: Backbone::Bert,
        pooling: Pooling::Cls,
        pad_id: 0,
    }
}

pub fn prose_spec() -> ModelSpec {
    ModelSpec {
        profile: ModelProfile {
            modality: Modality::Prose,
            model_id: "bge-m3".into(),
            display_name: "BGE-M3 (prose)".into(),
            dim: 1024,
            max_len: 512,
        },
        backbone: Backbone::XlmRoberta,
        pooling: Pooling::MaskedMean,
        pad_id: 1,
    }
}

pub fn spec_for(modality: Modality) -> ModelSpec {
    match modality {
        Modality::Code => code_spec(),
        Modality::Prose => prose_spec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profiles_are_distinct() {
        let (c, p) = (code_spec().profile, prose_spec().profile);
        assert_ne!(c.model_id, p.model_id);
        assert_ne!(c.display_name, p.display_name);
        assert_ne!(c.dim, p.dim);
    }
}
