use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const MAX_TAG_DEPTH: usize = 8;

static SEGMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9_-]*$").expect("valid tag segment regex"));

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tag {
    pub id: String,
    pub parent_id: Option<String>,
    pub basename: String,
    pub path: String,
    pub description: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewTag {
    pub path: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TagPatch {
    pub basename: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TagFilter {
    /// Only tags at or below this path.
    pub prefix: Option<String>,
}

/// A normalized `parent/basename` tag path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TagPath {
    segments: Vec<String>,
}

impl TagPath {
    /// Parse a raw path: surrounding slashes and whitespace are dropped and
    /// segments are lower-cased.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let trimmed = raw.trim().trim_matches('/');
        if trimmed.is_empty() {
            return Err("tag path is empty".to_string());
        }

        let segments: Vec<String> = trimmed
            .split('/')
            .map(|s| s.trim().to_lowercase())
            .collect();

        if segments.len() > MAX_TAG_DEPTH {
            return Err(format!(
                "tag path '{trimmed}' is deeper than {MAX_TAG_DEPTH} levels"
            ));
        }
        for segment in &segments {
            if segment.is_empty() {
                return Err(format!("tag path '{trimmed}' has an empty segment"));
            }
            if !SEGMENT.is_match(segment) {
                return Err(format!(
                    "tag segment '{segment}' may only contain a-z, 0-9, '_' and '-'"
                ));
            }
        }

        Ok(Self { segments })
    }

    pub fn from_parent(parent: Option<&TagPath>, basename: &str) -> Result<Self, String> {
        match parent {
            Some(parent) => Self::parse(&format!("{parent}/{basename}")),
            None => Self::parse(basename),
        }
    }

    pub fn basename(&self) -> &str {
        self.segments
            .last()
            .map(String::as_str)
            .unwrap_or_default()
    }

    pub fn parent(&self) -> Option<TagPath> {
        (self.segments.len() > 1).then(|| TagPath {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// Every prefix of this path, root first, ending with the path itself.
    pub fn ancestors(&self) -> Vec<TagPath> {
        (1..=self.segments.len())
            .map(|n| TagPath {
                segments: self.segments[..n].to_vec(),
            })
            .collect()
    }

    /// True when `self` equals `other` or sits below it.
    pub fn is_within(&self, other: &TagPath) -> bool {
        self.segments.len() >= other.segments.len()
            && self.segments[..other.segments.len()] == other.segments[..]
    }
}

impl fmt::Display for TagPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}

/// String form of [`TagPath::is_within`] for paths already stored normalized.
pub fn path_is_within(path: &str, ancestor: &str) -> bool {
    path == ancestor
        || (path.starts_with(ancestor) && path.as_bytes().get(ancestor.len()) == Some(&b'/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_normalizes_case_and_slashes() {
        let path = TagPath::parse(" /Conditions/Diabetes/ ").unwrap();
        assert_eq!(path.to_string(), "conditions/diabetes");
        assert_eq!(path.basename(), "diabetes");
        assert_eq!(path.depth(), 2);
    }

    #[test]
    fn parse_rejects_bad_paths() {
        assert!(TagPath::parse("").is_err());
        assert!(TagPath::parse("///").is_err());
        assert!(TagPath::parse("a//b").is_err());
        assert!(TagPath::parse("a/b c").is_err());
        assert!(TagPath::parse("a/-b").is_err());
        assert!(TagPath::parse("a/b/c/d/e/f/g/h/i").is_err());
        assert!(TagPath::parse("a/b/c/d/e/f/g/h").is_ok());
    }

    #[test]
    fn ancestors_run_root_first() {
        let path = TagPath::parse("study/arm-a/week_1").unwrap();
        let ancestors: Vec<String> = path.ancestors().iter().map(|p| p.to_string()).collect();
        assert_eq!(ancestors, vec!["study", "study/arm-a", "study/arm-a/week_1"]);
        assert_eq!(path.parent().unwrap().to_string(), "study/arm-a");
        assert!(TagPath::parse("study").unwrap().parent().is_none());
    }

    #[test]
    fn is_within_respects_segment_boundaries() {
        let parent = TagPath::parse("study/arm").unwrap();
        assert!(TagPath::parse("study/arm/week1").unwrap().is_within(&parent));
        assert!(parent.is_within(&parent));
        assert!(!TagPath::parse("study/army").unwrap().is_within(&parent));
        assert!(!TagPath::parse("study").unwrap().is_within(&parent));

        assert!(path_is_within("study/arm/week1", "study/arm"));
        assert!(!path_is_within("study/army", "study/arm"));
    }

    #[test]
    fn from_parent_joins_segments() {
        let parent = TagPath::parse("sites").unwrap();
        let child = TagPath::from_parent(Some(&parent), "Oslo").unwrap();
        assert_eq!(child.to_string(), "sites/oslo");
        assert!(TagPath::from_parent(Some(&parent), "a/b").is_ok());
    }
}
