//! JSON files under the data directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use nightfall_core::Theme;

use crate::error::{EngineError, EngineResult};
use crate::interfaces::StateStore;
use crate::postpone::PostponeSnapshot;

const POSTPONE_FILE: &str = "postpone.json";
const LEARNED_NAMES_FILE: &str = "learned_themes.json";

pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn read<T: serde::de::DeserializeOwned>(&self, file: &str) -> EngineResult<Option<T>> {
        let path = self.dir.join(file);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// Writes through a temporary file so a crash never leaves half a file.
    fn write<T: serde::Serialize>(&self, file: &str, value: &T) -> EngineResult<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(file);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(value)?;
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &path)
            .map_err(|e| EngineError::Store(format!("{}: {e}", path.display())))?;
        Ok(())
    }
}

impl StateStore for JsonFileStore {
    fn load_postpones(&self) -> anyhow::Result<Option<PostponeSnapshot>> {
        Ok(self.read(POSTPONE_FILE)?)
    }

    fn save_postpones(&self, snapshot: &PostponeSnapshot) -> anyhow::Result<()> {
        Ok(self.write(POSTPONE_FILE, snapshot)?)
    }

    fn load_learned_names(&self) -> anyhow::Result<HashMap<Theme, String>> {
        Ok(self.read(LEARNED_NAMES_FILE)?.unwrap_or_default())
    }

    fn save_learned_names(&self, names: &HashMap<Theme, String>) -> anyhow::Result<()> {
        Ok(self.write(LEARNED_NAMES_FILE, names)?)
    }
}
