use std::path::{Path, PathBuf};
use std::sync::Mutex;

use indexmap::IndexSet;
use serde::Serialize;
use serde_json::Value;

use crate::session::PromptMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresetPrompt {
    pub id: &'static str,
    pub prompt: &'static str,
}

pub const RETOUCH_PRESETS: &[PresetPrompt] = &[
    PresetPrompt { id: "retouch_base", prompt: "Retouch this photo" },
    PresetPrompt { id: "retouch_colorize", prompt: "Colorize photo and enhance details" },
    PresetPrompt { id: "retouch_remove_dust", prompt: "Remove dust and scratches" },
    PresetPrompt { id: "retouch_enhance_clarity", prompt: "Enhance image detail and clarity without altering composition" },
    PresetPrompt { id: "retouch_sharpen", prompt: "Restore and sharpen faded image" },
    PresetPrompt { id: "retouch_fix_damage", prompt: "Fix damage and improve overall quality" },
    PresetPrompt { id: "retouch_brighten", prompt: "Brighten and contrast enhance old photo" },
    PresetPrompt { id: "retouch_restore_colors", prompt: "Restore faded colors to be vibrant and natural" },
    PresetPrompt { id: "retouch_remove_frame", prompt: "Remove photo frame and repair torn edges" },
    PresetPrompt { id: "retouch_improve_skin", prompt: "Improve skin texture and reduce facial blemishes" },
    PresetPrompt { id: "retouch_remove_noise", prompt: "Remove digital noise and grain from the photo" },
    PresetPrompt { id: "retouch_soft_focus", prompt: "Apply a dreamy soft-focus effect" },
];

pub const REIMAGINE_PRESETS: &[PresetPrompt] = &[
    PresetPrompt { id: "reimagine_studio_portrait", prompt: "Studio portrait of the subject(s) in modern, plain clothing against a light background." },
    PresetPrompt { id: "reimagine_futuristic_city", prompt: "Place the subject(s) in a futuristic city with flying cars." },
    PresetPrompt { id: "reimagine_ancient_jungle", prompt: "Reimagine the person(s) as explorers in a lush, ancient jungle." },
    PresetPrompt { id: "reimagine_sunny_beach", prompt: "Show the subject(s) on a beautiful, sunny beach at sunset." },
    PresetPrompt { id: "reimagine_rustic_cabin", prompt: "Depict the person(s) in a cozy, rustic cabin with a fireplace." },
    PresetPrompt { id: "reimagine_fantasy_forest", prompt: "Transform the scene into a vibrant, fantastical forest with glowing plants." },
    PresetPrompt { id: "reimagine_film_noir", prompt: "Place the character(s) in a classic, black-and-white film noir scene." },
    PresetPrompt { id: "reimagine_art_deco", prompt: "Dress the person(s) in elegant 1920s Art Deco fashion." },
    PresetPrompt { id: "reimagine_cyberpunk", prompt: "Change the outfits to rugged, futuristic cyberpunk gear." },
    PresetPrompt { id: "reimagine_medieval", prompt: "Place the subject(s) in royal, medieval-era attire." },
    PresetPrompt { id: "reimagine_zen_garden", prompt: "Reimagine the scene as a serene zen garden with cherry blossoms." },
    PresetPrompt { id: "reimagine_steampunk", prompt: "Place the subject(s) in a bustling steampunk city with brass machinery." },
];

pub fn presets_for(mode: PromptMode) -> &'static [PresetPrompt] {
    match mode {
        PromptMode::Retouch => RETOUCH_PRESETS,
        PromptMode::Reimagine => REIMAGINE_PRESETS,
    }
}

/// The prompt a fresh session starts with.
pub fn default_prompt() -> &'static str {
    RETOUCH_PRESETS[0].prompt
}

/// A prompt string must be globally unique across all presets regardless of
/// the mode it is being added under.
pub fn is_preset(prompt: &str) -> bool {
    RETOUCH_PRESETS
        .iter()
        .chain(REIMAGINE_PRESETS.iter())
        .any(|preset| preset.prompt == prompt)
}

/// Key-value persistence port for user-added prompts. A single logical
/// document is stored under a fixed key; the registry never sees where.
pub trait PromptStore {
    fn load(&self) -> anyhow::Result<Option<String>>;
    fn save(&self, raw: &str) -> anyhow::Result<()>;
}

/// On-disk store: one pretty-printed JSON document per file.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PromptStore for JsonFileStore {
    fn load(&self) -> anyhow::Result<Option<String>> {
        if !self.path.exists() {
            return Ok(None);
        }
        Ok(Some(std::fs::read_to_string(&self.path)?))
    }

    fn save(&self, raw: &str) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, raw)?;
        Ok(())
    }
}

/// In-memory store for tests and embedders that bring their own persistence.
#[derive(Debug, Default)]
pub struct MemoryPromptStore {
    slot: Mutex<Option<String>>,
}

impl MemoryPromptStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_contents(raw: impl Into<String>) -> Self {
        Self {
            slot: Mutex::new(Some(raw.into())),
        }
    }
}

impl PromptStore for MemoryPromptStore {
    fn load(&self) -> anyhow::Result<Option<String>> {
        Ok(self
            .slot
            .lock()
            .map_err(|_| anyhow::anyhow!("prompt store lock poisoned"))?
            .clone())
    }

    fn save(&self, raw: &str) -> anyhow::Result<()> {
        *self
            .slot
            .lock()
            .map_err(|_| anyhow::anyhow!("prompt store lock poisoned"))? = Some(raw.to_string());
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct StoredPrompts {
    retouch: Vec<String>,
    reimagine: Vec<String>,
}

/// User-added prompts per mode, insertion-ordered and deduplicated against
/// every preset. Persistence failures are logged and never surfaced.
pub struct CustomPromptRegistry {
    store: Box<dyn PromptStore>,
    retouch: IndexSet<String>,
    reimagine: IndexSet<String>,
}

impl CustomPromptRegistry {
    pub fn load(store: Box<dyn PromptStore>) -> Self {
        let (retouch, reimagine) = match store.load() {
            Ok(Some(raw)) => parse_stored(&raw),
            Ok(None) => (IndexSet::new(), IndexSet::new()),
            Err(err) => {
                log::warn!("failed to load custom prompts: {err:#}");
                (IndexSet::new(), IndexSet::new())
            }
        };
        Self {
            store,
            retouch,
            reimagine,
        }
    }

    pub fn list(&self, mode: PromptMode) -> Vec<String> {
        self.set(mode).iter().cloned().collect()
    }

    /// Adds the prompt to the given mode's list. Returns false without
    /// persisting when the prompt is empty, already present, or collides
    /// with a preset from either mode.
    pub fn add(&mut self, mode: PromptMode, prompt: &str) -> bool {
        let prompt = prompt.trim();
        if prompt.is_empty() || is_preset(prompt) || self.set(mode).contains(prompt) {
            return false;
        }
        self.set_mut(mode).insert(prompt.to_string());
        self.persist();
        true
    }

    /// Removes every occurrence of the prompt from the given mode's list.
    pub fn delete(&mut self, mode: PromptMode, prompt: &str) -> bool {
        let removed = self.set_mut(mode).shift_remove(prompt);
        if removed {
            self.persist();
        }
        removed
    }

    fn set(&self, mode: PromptMode) -> &IndexSet<String> {
        match mode {
            PromptMode::Retouch => &self.retouch,
            PromptMode::Reimagine => &self.reimagine,
        }
    }

    fn set_mut(&mut self, mode: PromptMode) -> &mut IndexSet<String> {
        match mode {
            PromptMode::Retouch => &mut self.retouch,
            PromptMode::Reimagine => &mut self.reimagine,
        }
    }

    fn persist(&self) {
        let stored = StoredPrompts {
            retouch: self.retouch.iter().cloned().collect(),
            reimagine: self.reimagine.iter().cloned().collect(),
        };
        let raw = match serde_json::to_string_pretty(&stored) {
            Ok(raw) => raw,
            Err(err) => {
                log::warn!("failed to serialize custom prompts: {err:#}");
                return;
            }
        };
        if let Err(err) = self.store.save(&raw) {
            log::warn!("failed to save custom prompts: {err:#}");
        }
    }
}

/// Accepts both the mode-keyed shape and the legacy bare list, which is
/// treated as the retouch list with an empty reimagine list.
fn parse_stored(raw: &str) -> (IndexSet<String>, IndexSet<String>) {
    let parsed: Value = match serde_json::from_str(raw) {
        Ok(parsed) => parsed,
        Err(err) => {
            log::warn!("custom prompt payload is not valid JSON: {err}");
            return (IndexSet::new(), IndexSet::new());
        }
    };
    match parsed {
        Value::Array(rows) => (string_set(&rows), IndexSet::new()),
        Value::Object(obj) => {
            let retouch = obj
                .get("retouch")
                .and_then(Value::as_array)
                .map(|rows| string_set(rows))
                .unwrap_or_default();
            let reimagine = obj
                .get("reimagine")
                .and_then(Value::as_array)
                .map(|rows| string_set(rows))
                .unwrap_or_default();
            (retouch, reimagine)
        }
        _ => {
            log::warn!("custom prompt payload has an unexpected shape");
            (IndexSet::new(), IndexSet::new())
        }
    }
}

fn string_set(rows: &[Value]) -> IndexSet<String> {
    rows.iter()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use crate::session::PromptMode;

    use super::{
        default_prompt, is_preset, CustomPromptRegistry, JsonFileStore, MemoryPromptStore,
        PromptStore, REIMAGINE_PRESETS, RETOUCH_PRESETS,
    };

    struct FailingStore;

    impl PromptStore for FailingStore {
        fn load(&self) -> anyhow::Result<Option<String>> {
            anyhow::bail!("storage unavailable")
        }

        fn save(&self, _raw: &str) -> anyhow::Result<()> {
            anyhow::bail!("storage unavailable")
        }
    }

    fn empty_registry() -> CustomPromptRegistry {
        CustomPromptRegistry::load(Box::new(MemoryPromptStore::new()))
    }

    #[test]
    fn default_prompt_is_first_retouch_preset() {
        assert_eq!(default_prompt(), "Retouch this photo");
        assert!(is_preset(default_prompt()));
    }

    #[test]
    fn add_is_idempotent_per_mode() {
        let mut registry = empty_registry();
        assert!(registry.add(PromptMode::Retouch, "Remove the lamp post"));
        assert!(!registry.add(PromptMode::Retouch, "Remove the lamp post"));
        assert_eq!(
            registry.list(PromptMode::Retouch),
            vec!["Remove the lamp post".to_string()]
        );
    }

    #[test]
    fn presets_are_rejected_in_both_modes() {
        let mut registry = empty_registry();
        let retouch_preset = RETOUCH_PRESETS[2].prompt;
        let reimagine_preset = REIMAGINE_PRESETS[0].prompt;
        assert!(!registry.add(PromptMode::Retouch, retouch_preset));
        assert!(!registry.add(PromptMode::Reimagine, retouch_preset));
        assert!(!registry.add(PromptMode::Retouch, reimagine_preset));
        assert!(!registry.add(PromptMode::Reimagine, reimagine_preset));
        assert!(registry.list(PromptMode::Retouch).is_empty());
        assert!(registry.list(PromptMode::Reimagine).is_empty());
    }

    #[test]
    fn empty_prompts_are_rejected() {
        let mut registry = empty_registry();
        assert!(!registry.add(PromptMode::Retouch, ""));
        assert!(!registry.add(PromptMode::Retouch, "   "));
    }

    #[test]
    fn modes_keep_independent_lists() {
        let mut registry = empty_registry();
        assert!(registry.add(PromptMode::Retouch, "Fix the torn corner"));
        assert!(registry.add(PromptMode::Reimagine, "Set the scene on the moon"));
        assert_eq!(
            registry.list(PromptMode::Retouch),
            vec!["Fix the torn corner".to_string()]
        );
        assert_eq!(
            registry.list(PromptMode::Reimagine),
            vec!["Set the scene on the moon".to_string()]
        );
    }

    #[test]
    fn delete_removes_the_entry() {
        let mut registry = empty_registry();
        registry.add(PromptMode::Retouch, "Fix the torn corner");
        assert!(registry.delete(PromptMode::Retouch, "Fix the torn corner"));
        assert!(!registry.delete(PromptMode::Retouch, "Fix the torn corner"));
        assert!(registry.list(PromptMode::Retouch).is_empty());
    }

    #[test]
    fn legacy_bare_list_migrates_to_retouch() {
        let store = MemoryPromptStore::with_contents(r#"["One", "Two"]"#);
        let registry = CustomPromptRegistry::load(Box::new(store));
        assert_eq!(
            registry.list(PromptMode::Retouch),
            vec!["One".to_string(), "Two".to_string()]
        );
        assert!(registry.list(PromptMode::Reimagine).is_empty());
    }

    #[test]
    fn corrupt_payload_loads_as_empty() {
        let store = MemoryPromptStore::with_contents("not json at all");
        let registry = CustomPromptRegistry::load(Box::new(store));
        assert!(registry.list(PromptMode::Retouch).is_empty());
        assert!(registry.list(PromptMode::Reimagine).is_empty());
    }

    #[test]
    fn store_failures_never_reach_the_caller() {
        let mut registry = CustomPromptRegistry::load(Box::new(FailingStore));
        assert!(registry.add(PromptMode::Retouch, "Still works"));
        assert_eq!(
            registry.list(PromptMode::Retouch),
            vec!["Still works".to_string()]
        );
    }

    #[test]
    fn file_store_round_trips_between_instances() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("custom_prompts.json");

        let mut registry = CustomPromptRegistry::load(Box::new(JsonFileStore::new(&path)));
        registry.add(PromptMode::Retouch, "Repair the water stain");
        registry.add(PromptMode::Reimagine, "Make it a winter scene");

        let reloaded = CustomPromptRegistry::load(Box::new(JsonFileStore::new(&path)));
        assert_eq!(
            reloaded.list(PromptMode::Retouch),
            vec!["Repair the water stain".to_string()]
        );
        assert_eq!(
            reloaded.list(PromptMode::Reimagine),
            vec!["Make it a winter scene".to_string()]
        );
        Ok(())
    }
}
