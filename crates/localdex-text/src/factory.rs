//! Chooses and opens the lexical engine for an index.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use localdex_core::config::EnginePreference;
use localdex_core::traits::LexicalStore;
use localdex_core::types::{EngineSelection, LexicalEngineKind};
use tracing::{info, warn};

use crate::builtin::BuiltinLexicalStore;

/// Whether the native engine can be used, and if not, why.
pub fn native_availability() -> std::result::Result<(), String> {
    if cfg!(feature = "native") {
        Ok(())
    } else {
        Err("this build does not include the native engine".to_string())
    }
}

/// Pure selection policy: an explicit preference wins, otherwise corpus size
/// against `threshold` decides; an unavailable native engine always falls
/// back to the builtin one.
pub fn select_engine(
    preference: EnginePreference,
    file_count: usize,
    threshold: usize,
    native: std::result::Result<(), String>,
) -> EngineSelection {
    let pref = Some(preference.as_str().to_string());
    let pick = |engine, reason: String| EngineSelection { engine, reason, preference: pref.clone() };
    match (preference, native) {
        (EnginePreference::Builtin, _) => pick(LexicalEngineKind::Builtin, "builtin engine requested".into()),
        (EnginePreference::Native, Ok(())) => pick(LexicalEngineKind::Native, "native engine requested".into()),
        (EnginePreference::Native, Err(why)) => {
            pick(LexicalEngineKind::Builtin, format!("native engine requested but unavailable ({why}); fell back to builtin"))
        }
        (EnginePreference::Auto, _) if file_count < threshold => pick(
            LexicalEngineKind::Builtin,
            format!("{file_count} files is below the native threshold of {threshold}"),
        ),
        (EnginePreference::Auto, Ok(())) => pick(
            LexicalEngineKind::Native,
            format!("{file_count} files reaches the native threshold of {threshold}"),
        ),
        (EnginePreference::Auto, Err(why)) => pick(
            LexicalEngineKind::Builtin,
            format!("{file_count} files reaches the native threshold of {threshold}, but native is unavailable ({why}); fell back to builtin"),
        ),
    }
}

/// Opens the engine named by `selection` in `dir`. If the native engine
/// fails to open, the builtin one is used and the returned selection says so.
pub fn open_lexical(selection: &EngineSelection, dir: &Path) -> Result<(Arc<dyn LexicalStore>, EngineSelection)> {
    match selection.engine {
        LexicalEngineKind::Builtin => Ok((Arc::new(BuiltinLexicalStore::open(&dir.join("builtin"))?), selection.clone())),
        LexicalEngineKind::Native => match open_native(dir) {
            Ok(store) => {
                info!(reason = %selection.reason, "using native lexical engine");
                Ok((store, selection.clone()))
            }
            Err(e) => {
                warn!(error = %format!("{e:#}"), "native lexical engine failed to open; falling back to builtin");
                let fallback = EngineSelection {
                    engine: LexicalEngineKind::Builtin,
                    reason: format!("native engine failed to open ({e}); fell back to builtin"),
                    preference: selection.preference.clone(),
                };
                Ok((Arc::new(BuiltinLexicalStore::open(&dir.join("builtin"))?), fallback))
            }
        },
    }
}

#[cfg(feature = "native")]
fn open_native(dir: &Path) -> Result<Arc<dyn LexicalStore>> {
    Ok(Arc::new(crate::native::TantivyLexicalStore::open(&dir.join("native"))?))
}

#[cfg(not(feature = "native"))]
fn open_native(_dir: &Path) -> Result<Arc<dyn LexicalStore>> {
    anyhow::bail!("this build does not include the native engine")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unavailable() -> std::result::Result<(), String> {
        Err("not compiled in".to_string())
    }

    #[test]
    fn native_preference_without_native_falls_back() {
        let sel = select_engine(EnginePreference::Native, 10, 2000, unavailable());
        assert_eq!(sel.engine, LexicalEngineKind::Builtin);
        assert!(sel.reason.contains("fell back"), "{}", sel.reason);
        assert_eq!(sel.preference.as_deref(), Some("native"));
    }

    #[test]
    fn explicit_preference_beats_corpus_size() {
        let sel = select_engine(EnginePreference::Builtin, 1_000_000, 2000, Ok(()));
        assert_eq!(sel.engine, LexicalEngineKind::Builtin);
        let sel = select_engine(EnginePreference::Native, 1, 2000, Ok(()));
        assert_eq!(sel.engine, LexicalEngineKind::Native);
    }

    #[test]
    fn auto_uses_file_count_threshold() {
        assert_eq!(select_engine(EnginePreference::Auto, 1999, 2000, Ok(())).engine, LexicalEngineKind::Builtin);
        assert_eq!(select_engine(EnginePreference::Auto, 2000, 2000, Ok(())).engine, LexicalEngineKind::Native);
        let sel = select_engine(EnginePreference::Auto, 5000, 2000, unavailable());
        assert_eq!(sel.engine, LexicalEngineKind::Builtin);
        assert!(sel.reason.contains("fell back"));
    }

    #[test]
    fn opens_the_selected_builtin_engine() {
        let dir = tempfile::tempdir().expect("tmp");
        let sel = select_engine(EnginePreference::Builtin, 0, 2000, native_availability());
        let (store, used) = open_lexical(&sel, dir.path()).expect("open");
        assert_eq!(store.engine(), LexicalEngineKind::Builtin);
        assert_eq!(used, sel);
    }
}
