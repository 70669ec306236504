use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use anyhow::{Result, bail, ensure};
use serde::de::{self, Deserializer, SeqAccess, Visitor};
use serde::{Deserialize, Serialize};

pub use action::{ControlAction, ParseActionError};
pub use hotkeys::HotkeyBindings;
pub use search::{DEFAULT_API_URL, Rating, SearchOptions};

mod search {
    use super::*;
    use xxhash_rust::xxh3::xxh3_64;

    pub const DEFAULT_API_URL: &str = "https://konachan.com/post.json";

    /// Content rating filter understood by the image board.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
    pub enum Rating {
        #[serde(rename = "s", alias = "safe")]
        Safe,
        #[serde(rename = "q", alias = "questionable")]
        Questionable,
        #[serde(rename = "e", alias = "explicit")]
        Explicit,
    }

    impl Rating {
        /// Tag value used in the `rating:` search term.
        pub const fn as_tag(self) -> &'static str {
            match self {
                Rating::Safe => "s",
                Rating::Questionable => "q",
                Rating::Explicit => "e",
            }
        }
    }

    /// Remote search parameters. Everything that changes the result set is part
    /// of [`SearchOptions::fingerprint`]; paging knobs are not.
    #[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
    #[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
    pub struct SearchOptions {
        pub queries: Vec<String>,
        pub ratings: Vec<Rating>,
        pub min_score: Option<u32>,
        /// Posts whose declared file size exceeds this many bytes are skipped.
        pub max_image_size: Option<u64>,
        pub max_pages: u32,
        pub page_limit: u32,
        pub api_url: String,
    }

    impl Default for SearchOptions {
        fn default() -> Self {
            Self {
                queries: vec!["*".to_string()],
                ratings: vec![Rating::Safe],
                min_score: None,
                max_image_size: None,
                max_pages: 10,
                page_limit: 100,
                api_url: DEFAULT_API_URL.to_string(),
            }
        }
    }

    #[derive(Serialize)]
    struct FingerprintKey<'a> {
        queries: Vec<&'a str>,
        ratings: Vec<&'static str>,
        min_score: Option<u32>,
        max_image_size: Option<u64>,
    }

    impl SearchOptions {
        /// Ratings with duplicates removed, in a stable order.
        pub fn unique_ratings(&self) -> Vec<Rating> {
            self.ratings
                .iter()
                .copied()
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect()
        }

        /// Deterministic digest of the filter configuration. Order and
        /// duplicates in `queries`/`ratings` do not affect the value.
        pub fn fingerprint(&self) -> String {
            let queries: BTreeSet<&str> = self.queries.iter().map(String::as_str).collect();
            let key = FingerprintKey {
                queries: queries.into_iter().collect(),
                ratings: self.unique_ratings().into_iter().map(Rating::as_tag).collect(),
                min_score: self.min_score,
                max_image_size: self.max_image_size,
            };
            let encoded = serde_json::to_vec(&key).unwrap_or_default();
            format!("{:016x}", xxh3_64(&encoded))
        }

        pub fn validate(&self) -> Result<()> {
            ensure!(
                !self.queries.is_empty(),
                "search.queries must contain at least one entry"
            );
            ensure!(
                self.queries.iter().all(|q| !q.trim().is_empty()),
                "search.queries must not contain blank entries"
            );
            ensure!(
                !self.ratings.is_empty(),
                "search.ratings must contain at least one rating"
            );
            ensure!(self.max_pages > 1, "search.max-pages must be > 1");
            ensure!(
                self.page_limit > 1 && self.page_limit <= 100,
                "search.page-limit must be > 1 and <= 100"
            );
            ensure!(
                !self.api_url.trim().is_empty(),
                "search.api-url must not be blank"
            );
            Ok(())
        }
    }
}

mod action {
    use super::*;

    /// Named operations exposed by the rotation engine to external triggers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
    #[serde(rename_all = "kebab-case")]
    pub enum ControlAction {
        Next,
        #[serde(alias = "back")]
        Prev,
        Pause,
        Unpause,
        TogglePause,
        Enable,
        Disable,
        ToggleEnable,
        Save,
        Delete,
        ToggleSave,
        Exit,
    }

    impl ControlAction {
        pub const ALL: [ControlAction; 12] = [
            ControlAction::Next,
            ControlAction::Prev,
            ControlAction::Pause,
            ControlAction::Unpause,
            ControlAction::TogglePause,
            ControlAction::Enable,
            ControlAction::Disable,
            ControlAction::ToggleEnable,
            ControlAction::Save,
            ControlAction::Delete,
            ControlAction::ToggleSave,
            ControlAction::Exit,
        ];

        pub const fn as_str(self) -> &'static str {
            match self {
                ControlAction::Next => "next",
                ControlAction::Prev => "prev",
                ControlAction::Pause => "pause",
                ControlAction::Unpause => "unpause",
                ControlAction::TogglePause => "toggle-pause",
                ControlAction::Enable => "enable",
                ControlAction::Disable => "disable",
                ControlAction::ToggleEnable => "toggle-enable",
                ControlAction::Save => "save",
                ControlAction::Delete => "delete",
                ControlAction::ToggleSave => "toggle-save",
                ControlAction::Exit => "exit",
            }
        }
    }

    impl fmt::Display for ControlAction {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.as_str())
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct ParseActionError(pub String);

    impl fmt::Display for ParseActionError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "unknown action '{}'", self.0)
        }
    }

    impl std::error::Error for ParseActionError {}

    impl FromStr for ControlAction {
        type Err = ParseActionError;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            let needle = s.trim().to_ascii_lowercase().replace('_', "-");
            if needle == "back" {
                return Ok(ControlAction::Prev);
            }
            ControlAction::ALL
                .into_iter()
                .find(|action| action.as_str() == needle)
                .ok_or_else(|| ParseActionError(s.to_string()))
        }
    }
}

mod hotkeys {
    use super::*;

    /// Trigger strings bound to each primitive action. A trigger shared by
    /// both halves of a toggle pair resolves to the pair's toggle action.
    #[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
    #[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
    pub struct HotkeyBindings {
        #[serde(deserialize_with = "one_or_many")]
        pub next: Vec<String>,
        #[serde(deserialize_with = "one_or_many", alias = "back")]
        pub prev: Vec<String>,
        #[serde(deserialize_with = "one_or_many")]
        pub pause: Vec<String>,
        #[serde(deserialize_with = "one_or_many")]
        pub unpause: Vec<String>,
        #[serde(deserialize_with = "one_or_many")]
        pub enable: Vec<String>,
        #[serde(deserialize_with = "one_or_many")]
        pub disable: Vec<String>,
        #[serde(deserialize_with = "one_or_many")]
        pub save: Vec<String>,
        #[serde(deserialize_with = "one_or_many")]
        pub delete: Vec<String>,
        #[serde(deserialize_with = "one_or_many")]
        pub exit: Vec<String>,
    }

    impl Default for HotkeyBindings {
        fn default() -> Self {
            let one = |s: &str| vec![s.to_string()];
            Self {
                next: one("<ctrl>+<alt>+i"),
                prev: one("<ctrl>+<alt>+u"),
                pause: one("<ctrl>+<alt>+p"),
                unpause: one("<ctrl>+<alt>+p"),
                enable: one("<ctrl>+<alt>+e"),
                disable: one("<ctrl>+<alt>+e"),
                save: one("<ctrl>+<alt>+s"),
                delete: one("<ctrl>+<alt>+s"),
                exit: one("<ctrl>+<shift>+<alt>+e"),
            }
        }
    }

    const TOGGLE_PAIRS: [(ControlAction, ControlAction, ControlAction); 3] = [
        (
            ControlAction::Pause,
            ControlAction::Unpause,
            ControlAction::TogglePause,
        ),
        (
            ControlAction::Enable,
            ControlAction::Disable,
            ControlAction::ToggleEnable,
        ),
        (
            ControlAction::Save,
            ControlAction::Delete,
            ControlAction::ToggleSave,
        ),
    ];

    fn is_toggle_pair(a: ControlAction, b: ControlAction) -> bool {
        TOGGLE_PAIRS
            .iter()
            .any(|&(x, y, _)| (x == a && y == b) || (x == b && y == a))
    }

    impl HotkeyBindings {
        fn entries(&self) -> [(ControlAction, &[String]); 9] {
            [
                (ControlAction::Next, self.next.as_slice()),
                (ControlAction::Prev, self.prev.as_slice()),
                (ControlAction::Pause, self.pause.as_slice()),
                (ControlAction::Unpause, self.unpause.as_slice()),
                (ControlAction::Enable, self.enable.as_slice()),
                (ControlAction::Disable, self.disable.as_slice()),
                (ControlAction::Save, self.save.as_slice()),
                (ControlAction::Delete, self.delete.as_slice()),
                (ControlAction::Exit, self.exit.as_slice()),
            ]
        }

        fn triggers_for(&self, action: ControlAction) -> BTreeSet<&str> {
            self.entries()
                .into_iter()
                .filter(|(a, _)| *a == action)
                .flat_map(|(_, keys)| keys.iter().map(|k| k.trim()))
                .collect()
        }

        pub fn validate(&self) -> Result<()> {
            let mut seen: BTreeMap<&str, ControlAction> = BTreeMap::new();
            for (action, keys) in self.entries() {
                for key in keys {
                    let key = key.trim();
                    ensure!(!key.is_empty(), "hotkeys.{action} contains a blank trigger");
                    match seen.get(key) {
                        Some(&previous) if previous == action => {}
                        Some(&previous) if is_toggle_pair(previous, action) => {}
                        Some(&previous) => bail!(
                            "duplicate hotkey '{key}' for '{previous}' and '{action}' is not allowed"
                        ),
                        None => {
                            seen.insert(key, action);
                        }
                    }
                }
            }
            Ok(())
        }

        /// Trigger → action table with toggle pairs merged.
        pub fn resolve(&self) -> BTreeMap<String, ControlAction> {
            let mut table = BTreeMap::new();
            for action in [ControlAction::Next, ControlAction::Prev, ControlAction::Exit] {
                for key in self.triggers_for(action) {
                    table.insert(key.to_string(), action);
                }
            }
            for (a, b, toggle) in TOGGLE_PAIRS {
                let a_keys = self.triggers_for(a);
                let b_keys = self.triggers_for(b);
                for key in a_keys.union(&b_keys) {
                    let action = match (a_keys.contains(key), b_keys.contains(key)) {
                        (true, true) => toggle,
                        (true, false) => a,
                        _ => b,
                    };
                    table.insert((*key).to_string(), action);
                }
            }
            table
        }
    }

    fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct OneOrMany;

        impl<'de> Visitor<'de> for OneOrMany {
            type Value = Vec<String>;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a trigger string, a list of triggers, or null")
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(vec![value.to_string()])
            }

            fn visit_unit<E>(self) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(Vec::new())
            }

            fn visit_none<E>(self) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(Vec::new())
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: SeqAccess<'de>,
            {
                let mut keys = Vec::new();
                while let Some(key) = seq.next_element::<String>()? {
                    keys.push(key);
                }
                Ok(keys)
            }
        }

        deserializer.deserialize_any(OneOrMany)
    }
}
