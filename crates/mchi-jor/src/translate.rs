//! Display-name translation for node and control names.
//!
//! Targets name their objects in Japanese. Translation only affects how names
//! are rendered; the tree always keeps the names the target sent.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, trace};

use crate::error::{JorError, Result};

/// Maps a name from the target to the name shown to the user.
pub trait Translate {
    fn translate<'a>(&self, name: &'a str) -> Cow<'a, str>;
}

/// Shows names exactly as received.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl Translate for Passthrough {
    fn translate<'a>(&self, name: &'a str) -> Cow<'a, str> {
        Cow::Borrowed(name)
    }
}

impl Translate for HashMap<String, String> {
    fn translate<'a>(&self, name: &'a str) -> Cow<'a, str> {
        match self.get(name) {
            Some(text) => Cow::Owned(text.clone()),
            None => Cow::Borrowed(name),
        }
    }
}

/// A JSON translation file that collects the names it has no entry for.
///
/// The file is an object from source name to translation. Names looked up
/// without an entry are recorded with a `null` translation so a translator
/// can fill them in later; [`StringDictionary::save`] writes them out.
#[derive(Debug)]
pub struct StringDictionary {
    path: PathBuf,
    state: Mutex<DictState>,
}

#[derive(Debug, Default)]
struct DictState {
    entries: BTreeMap<String, Option<String>>,
    dirty: bool,
}

impl StringDictionary {
    /// Load `path`, or start empty if it does not exist yet.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = match std::fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "dictionary not found, starting empty");
                BTreeMap::new()
            }
            Err(source) => return Err(JorError::Dictionary { path, source }),
        };
        Ok(Self {
            path,
            state: Mutex::new(DictState {
                entries,
                dirty: false,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of names known, translated or not.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Names recorded without a translation.
    pub fn untranslated(&self) -> Vec<String> {
        self.lock()
            .entries
            .iter()
            .filter(|(_, v)| v.is_none())
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Add or replace a translation.
    pub fn insert(&self, name: impl Into<String>, translation: impl Into<String>) {
        let mut state = self.lock();
        state.entries.insert(name.into(), Some(translation.into()));
        state.dirty = true;
    }

    /// Whether names were recorded since the last load or save.
    pub fn is_dirty(&self) -> bool {
        self.lock().dirty
    }

    /// Write the dictionary back to its file, pretty-printed.
    pub fn save(&self) -> Result<()> {
        let mut state = self.lock();
        let mut text = serde_json::to_string_pretty(&state.entries)?;
        text.push('\n');
        std::fs::write(&self.path, text).map_err(|source| JorError::Dictionary {
            path: self.path.clone(),
            source,
        })?;
        state.dirty = false;
        debug!(path = %self.path.display(), entries = state.entries.len(), "dictionary saved");
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, DictState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Translate for StringDictionary {
    fn translate<'a>(&self, name: &'a str) -> Cow<'a, str> {
        if name.is_empty() {
            return Cow::Borrowed(name);
        }
        let mut state = self.lock();
        match state.entries.get(name) {
            Some(Some(text)) => Cow::Owned(text.clone()),
            Some(None) => Cow::Borrowed(name),
            None => {
                trace!(name, "untranslated name recorded");
                state.entries.insert(name.to_string(), None);
                state.dirty = true;
                Cow::Borrowed(name)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "mchi-dict-{tag}-{}-{}.json",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ))
    }

    #[test]
    fn passthrough_borrows() {
        assert!(matches!(Passthrough.translate("カメラ"), Cow::Borrowed("カメラ")));
    }

    #[test]
    fn map_falls_back_to_source_name() {
        let map = HashMap::from([("カメラ".to_string(), "Camera".to_string())]);
        assert_eq!(map.translate("カメラ"), "Camera");
        assert_eq!(map.translate("プレイヤー"), "プレイヤー");
    }

    #[test]
    fn dictionary_records_misses_as_null() {
        let path = temp_path("miss");
        std::fs::write(&path, r#"{"カメラ": "Camera", "敵": null}"#)
            .expect("dictionary should be writable");

        let dict = StringDictionary::open(&path).expect("dictionary should load");
        assert_eq!(dict.translate("カメラ"), "Camera");
        assert_eq!(dict.translate("敵"), "敵");
        assert!(!dict.is_dirty());

        assert_eq!(dict.translate("プレイヤー"), "プレイヤー");
        assert!(dict.is_dirty());
        dict.save().expect("dictionary should save");

        let reloaded: BTreeMap<String, Option<String>> = serde_json::from_str(
            &std::fs::read_to_string(&path).expect("dictionary should be readable"),
        )
        .expect("saved dictionary should be json");
        assert_eq!(reloaded.get("プレイヤー"), Some(&None));
        assert_eq!(reloaded.get("カメラ"), Some(&Some("Camera".to_string())));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn missing_dictionary_starts_empty() {
        let path = temp_path("absent");
        let dict = StringDictionary::open(&path).expect("missing file should be tolerated");
        assert!(dict.is_empty());
        dict.insert("ライト", "Light");
        assert_eq!(dict.translate("ライト"), "Light");
        assert!(dict.untranslated().is_empty());
    }

    #[test]
    fn malformed_dictionary_is_rejected() {
        let path = temp_path("bad");
        std::fs::write(&path, "not json").expect("dictionary should be writable");
        assert!(matches!(StringDictionary::open(&path), Err(JorError::Json(_))));
        let _ = std::fs::remove_file(&path);
    }
}
