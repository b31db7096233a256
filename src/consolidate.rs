//! Group metric names by shared prefix; one group per subplot row.
//!
//! Group order and member order are first-seen order so a subplot keeps its
//! row across refresh cycles.

use serde::Serialize;
use std::collections::HashMap;

/// Separator between name segments, e.g. `train/loss/total`.
pub const SEGMENT_DELIMITER: char = '/';

/// How names are merged into subplot groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Consolidation {
    /// Every name is its own group.
    None,
    /// Names sharing their first `n` segments share a group. `0` means all.
    Level(usize),
    /// One group for every name.
    All,
}

impl Consolidation {
    pub fn is_enabled(self) -> bool {
        !matches!(self, Self::None)
    }

    /// Group key of `name`; names shorter than the level key on their full name.
    pub fn key<'a>(self, name: &'a str) -> &'a str {
        match self {
            Self::None => name,
            Self::All | Self::Level(0) => "",
            Self::Level(n) => match name.match_indices(SEGMENT_DELIMITER).nth(n - 1) {
                Some((cut, _)) => &name[..cut],
                None => name,
            },
        }
    }
}

/// Case-sensitive keyword filters applied before grouping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KeywordFilter {
    /// Keep names containing any of these. `None` keeps everything.
    pub whitelist: Option<Vec<String>>,
    /// Drop names containing any of these.
    pub blacklist: Option<Vec<String>>,
}

impl KeywordFilter {
    pub fn accepts(&self, name: &str) -> bool {
        let whitelisted = self
            .whitelist
            .as_ref()
            .map(|kws| kws.iter().any(|kw| name.contains(kw.as_str())))
            .unwrap_or(true);
        let blacklisted = self
            .blacklist
            .as_ref()
            .map(|kws| kws.iter().any(|kw| name.contains(kw.as_str())))
            .unwrap_or(false);
        whitelisted && !blacklisted
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub prefix: String,
    pub members: Vec<String>,
}

/// Ordered prefix -> members mapping of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Groups {
    groups: Vec<Group>,
}

impl Groups {
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Group> {
        self.groups.iter()
    }

    pub fn prefixes(&self) -> Vec<&str> {
        self.groups.iter().map(|g| g.prefix.as_str()).collect()
    }
}

/// Filter `names` and partition the survivors into prefix groups.
pub fn consolidate<S: AsRef<str>>(
    names: &[S],
    consolidation: Consolidation,
    filter: &KeywordFilter,
) -> Groups {
    let mut groups: Vec<Group> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for name in names.iter().map(AsRef::as_ref) {
        if !filter.accepts(name) {
            continue;
        }
        let key = consolidation.key(name);
        match index.get(key) {
            Some(&i) => groups[i].members.push(name.to_string()),
            None => {
                index.insert(key.to_string(), groups.len());
                groups.push(Group {
                    prefix: key.to_string(),
                    members: vec![name.to_string()],
                });
            }
        }
    }

    Groups { groups }
}
