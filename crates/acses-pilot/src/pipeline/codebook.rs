//! KBLI hierarchy model.
//!
//! A hierarchy entry is one sub-class row of the prepared codebook together
//! with its four ancestors. Entries are keyed by the sub-class code exactly as
//! written in the codebook, so `"01111"` and `"1111"` are different codes.

use std::collections::HashMap;

use strum::{EnumIter, IntoEnumIterator};

/// Classification levels, coarsest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumIter)]
pub enum HierarchyLevel {
    Section,
    Division,
    Group,
    Class,
    SubClass,
}

impl HierarchyLevel {
    pub const COUNT: usize = 5;

    /// One-based depth matching the `code_N` / `title_N` codebook columns.
    pub fn depth(self) -> usize {
        match self {
            Self::Section => 1,
            Self::Division => 2,
            Self::Group => 3,
            Self::Class => 4,
            Self::SubClass => 5,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Section => "Section",
            Self::Division => "Division",
            Self::Group => "Group",
            Self::Class => "Class",
            Self::SubClass => "Sub-Class",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelEntry {
    pub level: HierarchyLevel,
    pub code: String,
    pub title: String,
    pub description: Option<String>,
}

/// Full ancestor chain for one sub-class code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HierarchyEntry {
    levels: Vec<LevelEntry>,
}

impl HierarchyEntry {
    /// Build an entry from exactly one [`LevelEntry`] per level, in any order.
    pub fn new(mut levels: Vec<LevelEntry>) -> Option<Self> {
        levels.sort_by_key(|entry| entry.level);
        let complete = levels.len() == HierarchyLevel::COUNT
            && levels
                .iter()
                .zip(HierarchyLevel::iter())
                .all(|(entry, level)| entry.level == level);
        complete.then_some(Self { levels })
    }

    /// Levels ordered section → sub-class.
    pub fn levels(&self) -> &[LevelEntry] {
        &self.levels
    }

    pub fn level(&self, level: HierarchyLevel) -> &LevelEntry {
        &self.levels[level.depth() - 1]
    }

    pub fn most_specific(&self) -> &LevelEntry {
        self.level(HierarchyLevel::SubClass)
    }

    pub fn code(&self) -> &str {
        &self.most_specific().code
    }

    /// Free-text description of the sub-class, if the codebook carries one.
    pub fn description(&self) -> Option<&str> {
        self.most_specific()
            .description
            .as_deref()
            .map(str::trim)
            .filter(|desc| !desc.is_empty())
    }
}

/// Exact lookup from a sub-class code to its hierarchy entry.
pub trait CodebookLookup {
    fn lookup(&self, code: &str) -> Option<&HierarchyEntry>;
}

/// In-memory codebook keyed by sub-class code.
#[derive(Debug, Clone, Default)]
pub struct Codebook {
    entries: HashMap<String, HierarchyEntry>,
}

impl Codebook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry unless its code is already present.
    ///
    /// Returns `false` for duplicates; the first entry for a code wins.
    pub fn insert(&mut self, entry: HierarchyEntry) -> bool {
        let code = entry.code().to_owned();
        if self.entries.contains_key(&code) {
            return false;
        }
        self.entries.insert(code, entry);
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CodebookLookup for Codebook {
    fn lookup(&self, code: &str) -> Option<&HierarchyEntry> {
        self.entries.get(code)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_requires_every_level() {
        let mut levels = fixtures::entry("01111", None).levels().to_vec();
        levels.pop();
        assert!(HierarchyEntry::new(levels).is_none());
    }

    #[test]
    fn entry_sorts_levels_coarsest_first() {
        let mut levels = fixtures::entry("01111", None).levels().to_vec();
        levels.reverse();
        let entry = HierarchyEntry::new(levels).expect("complete hierarchy");
        assert_eq!(entry.levels()[0].level, HierarchyLevel::Section);
        assert_eq!(entry.code(), "01111");
    }

    #[test]
    fn lookup_is_exact_and_first_entry_wins() {
        let mut codebook = Codebook::new();
        assert!(codebook.insert(fixtures::entry("01111", Some("first"))));
        assert!(!codebook.insert(fixtures::entry("01111", Some("second"))));

        let found = codebook.lookup("01111").expect("code present");
        assert_eq!(found.description(), Some("first"));
        assert!(codebook.lookup("1111").is_none());
        assert_eq!(codebook.len(), 1);
    }

    #[test]
    fn blank_description_is_treated_as_missing() {
        let entry = fixtures::entry("01111", Some("   "));
        assert_eq!(entry.description(), None);
    }

    #[test]
    fn sub_class_label_keeps_hyphen() {
        assert_eq!(HierarchyLevel::SubClass.label(), "Sub-Class");
    }
}
