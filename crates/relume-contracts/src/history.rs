use serde::{Deserialize, Serialize};

/// Upper bound on retained results; the oldest entry is evicted on overflow.
pub const HISTORY_CAP: usize = 15;

/// Label of the synthetic entry created for the uploaded image itself.
pub const ORIGINAL_LABEL: &str = "Original Image";

/// Label of entries produced by the local editing collaborator.
pub const EDITED_LABEL: &str = "Image Edited";

/// One generated (or synthetic) result. Immutable once created; identity is
/// `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultItem {
    pub id: String,
    pub image_url: String,
    pub mime_type: String,
    pub prompt: String,
    pub source_image_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultKind {
    Original,
    Generated,
    Edited,
}

impl ResultKind {
    fn id_prefix(&self) -> &'static str {
        match self {
            ResultKind::Original => "original",
            ResultKind::Generated => "res",
            ResultKind::Edited => "edit",
        }
    }
}

/// Newest-first, bounded collection of results with a selection cursor.
///
/// Ids are `<kind>-<seq>` where `seq` is strictly monotonic for the lifetime
/// of the store, so ids stay unique even after evictions and clears.
#[derive(Debug, Default)]
pub struct ResultHistory {
    items: Vec<ResultItem>,
    selected: Option<String>,
    next_seq: u64,
}

impl ResultHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepends a new result and trims to [`HISTORY_CAP`]. If the evicted
    /// entry was selected, the selection is cleared rather than left
    /// dangling.
    pub fn push(
        &mut self,
        kind: ResultKind,
        image_url: impl Into<String>,
        mime_type: impl Into<String>,
        prompt: impl Into<String>,
        source_image_url: Option<String>,
    ) -> ResultItem {
        self.next_seq += 1;
        let item = ResultItem {
            id: format!("{}-{}", kind.id_prefix(), self.next_seq),
            image_url: image_url.into(),
            mime_type: mime_type.into(),
            prompt: prompt.into(),
            source_image_url,
        };
        self.items.insert(0, item.clone());
        self.items.truncate(HISTORY_CAP);
        if let Some(selected) = self.selected.as_deref() {
            if !self.items.iter().any(|entry| entry.id == selected) {
                self.selected = None;
            }
        }
        item
    }

    pub fn items(&self) -> &[ResultItem] {
        self.items.as_slice()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&ResultItem> {
        self.items.iter().find(|entry| entry.id == id)
    }

    /// Marks the given result as selected. Unknown ids leave the current
    /// selection untouched.
    pub fn select(&mut self, id: &str) -> Option<&ResultItem> {
        if self.items.iter().any(|entry| entry.id == id) {
            self.selected = Some(id.to_string());
            return self.get(id);
        }
        None
    }

    pub fn clear_selection(&mut self) {
        self.selected = None;
    }

    pub fn selected(&self) -> Option<&ResultItem> {
        let id = self.selected.as_deref()?;
        self.get(id)
    }

    /// The synthetic entry for the uploaded image, if it is still retained.
    pub fn original(&self) -> Option<&ResultItem> {
        self.items.iter().find(|entry| entry.prompt == ORIGINAL_LABEL)
    }

    /// Drops every entry and the selection. The id counter keeps running so
    /// entries from before and after a clear can never collide.
    pub fn clear(&mut self) {
        self.items.clear();
        self.selected = None;
    }
}

#[cfg(test)]
mod tests {
    use super::{ResultHistory, ResultKind, HISTORY_CAP, ORIGINAL_LABEL};

    fn push_generated(history: &mut ResultHistory, url: &str) -> String {
        history
            .push(
                ResultKind::Generated,
                url,
                "image/png",
                "Retouch this photo",
                Some("data:image/png;base64,source".to_string()),
            )
            .id
    }

    #[test]
    fn push_prepends_newest_first() {
        let mut history = ResultHistory::new();
        let first = push_generated(&mut history, "url-1");
        let second = push_generated(&mut history, "url-2");
        assert_eq!(history.items()[0].id, second);
        assert_eq!(history.items()[1].id, first);
    }

    #[test]
    fn push_evicts_exactly_the_oldest_beyond_cap() {
        let mut history = ResultHistory::new();
        history.push(
            ResultKind::Original,
            "url-original",
            "image/png",
            ORIGINAL_LABEL,
            Some("url-original".to_string()),
        );
        for idx in 0..HISTORY_CAP {
            push_generated(&mut history, &format!("url-{idx}"));
        }
        assert_eq!(history.len(), HISTORY_CAP);
        assert!(history.original().is_none());
        assert_eq!(history.items()[HISTORY_CAP - 1].image_url, "url-0");
        assert_eq!(
            history.items()[0].image_url,
            format!("url-{}", HISTORY_CAP - 1)
        );
    }

    #[test]
    fn ids_stay_unique_across_eviction_and_clear() {
        let mut history = ResultHistory::new();
        let mut seen = std::collections::HashSet::new();
        for idx in 0..HISTORY_CAP + 3 {
            assert!(seen.insert(push_generated(&mut history, &format!("url-{idx}"))));
        }
        history.clear();
        assert!(seen.insert(push_generated(&mut history, "url-after-clear")));
    }

    #[test]
    fn select_ignores_unknown_ids() {
        let mut history = ResultHistory::new();
        let id = push_generated(&mut history, "url-1");
        assert!(history.select(&id).is_some());
        assert!(history.select("res-999").is_none());
        assert_eq!(history.selected().map(|item| item.id.clone()), Some(id));
    }

    #[test]
    fn eviction_of_selected_entry_clears_selection() {
        let mut history = ResultHistory::new();
        let oldest = push_generated(&mut history, "url-oldest");
        history.select(&oldest);
        for idx in 0..HISTORY_CAP {
            push_generated(&mut history, &format!("url-{idx}"));
        }
        assert!(history.get(&oldest).is_none());
        assert!(history.selected().is_none());
    }

    #[test]
    fn original_lookup_finds_the_synthetic_entry() {
        let mut history = ResultHistory::new();
        let original = history.push(
            ResultKind::Original,
            "url-original",
            "image/png",
            ORIGINAL_LABEL,
            Some("url-original".to_string()),
        );
        push_generated(&mut history, "url-1");
        assert_eq!(history.original().map(|item| item.id.clone()), Some(original.id));
    }
}
