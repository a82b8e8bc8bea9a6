//! Version resolution: pick the newest qualifying tag of a remote repository.
//!
//! Two orderings are supported per repository:
//! - [`TagOrder::Raw`] trusts the remote's order and takes the last
//!   surviving tag (fine for repositories that only ever append tags).
//! - [`TagOrder::Semantic`] parses each surviving tag as a version and takes
//!   the maximum.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use regex::Regex;
use tracing::{debug, info};

use crate::error::{CoreError, Result};
use crate::git::VersionControl;
use crate::process::ExecutionContext;

/// A single exclusion rule applied to tag names.
#[derive(Debug, Clone)]
pub enum TagRule {
    ExcludePrefix(String),
    ExcludeContaining(String),
    /// Known-broken tag, excluded by exact match.
    ExcludeExact(String),
    ExcludeMatching(Regex),
}

impl TagRule {
    fn rejects(&self, tag: &str) -> bool {
        match self {
            TagRule::ExcludePrefix(prefix) => tag.starts_with(prefix.as_str()),
            TagRule::ExcludeContaining(needle) => tag.contains(needle.as_str()),
            TagRule::ExcludeExact(exact) => tag == exact,
            TagRule::ExcludeMatching(pattern) => pattern.is_match(tag),
        }
    }
}

/// Predicate over tag names: a tag qualifies if no rule rejects it.
#[derive(Debug, Clone, Default)]
pub struct TagFilter {
    rules: Vec<TagRule>,
}

impl TagFilter {
    /// Filter that accepts every tag.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn exclude_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.rules.push(TagRule::ExcludePrefix(prefix.into()));
        self
    }

    pub fn exclude_containing(mut self, needle: impl Into<String>) -> Self {
        self.rules.push(TagRule::ExcludeContaining(needle.into()));
        self
    }

    pub fn exclude_exact(mut self, tag: impl Into<String>) -> Self {
        self.rules.push(TagRule::ExcludeExact(tag.into()));
        self
    }

    pub fn exclude_matching(mut self, pattern: &str) -> Result<Self> {
        self.rules.push(TagRule::ExcludeMatching(Regex::new(pattern)?));
        Ok(self)
    }

    pub fn accepts(&self, tag: &str) -> bool {
        !self.rules.iter().any(|rule| rule.rejects(tag))
    }

    pub fn rules(&self) -> &[TagRule] {
        &self.rules
    }
}

/// How surviving tags are ordered before taking the newest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TagOrder {
    #[default]
    Raw,
    Semantic,
}

/// How a repository's ref is chosen.
#[derive(Debug, Clone)]
pub enum RefPolicy {
    /// Use this ref as-is, without querying the remote.
    Fixed(String),
    /// Newest remote tag accepted by `filter` under `order`.
    LatestTag { filter: TagFilter, order: TagOrder },
}

impl RefPolicy {
    pub fn latest(filter: TagFilter, order: TagOrder) -> Self {
        RefPolicy::LatestTag { filter, order }
    }
}

/// Parsed version used for semantic ordering.
///
/// `v1.2.0`, `1.2` and `1.2.0` compare equal; a trailing pre-release marker
/// (`1.2rc1`, `1.2.0-beta`) sorts below the plain release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionKey {
    release: Vec<u64>,
    pre: Option<PreRelease>,
}

/// Pre-release marker split as `<label><number><tail>`, e.g. `rc10`.
///
/// Labels compare as strings and numbers as integers, so `rc9 < rc10` and
/// `beta < rc`. A bare label sorts below the same label with a number.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct PreRelease {
    label: String,
    number: Option<u64>,
    tail: String,
}

impl PreRelease {
    fn parse(marker: &str) -> Self {
        let label_end = marker
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(marker.len());
        let (label, rest) = marker.split_at(label_end);
        let digits_end = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        let (digits, tail) = rest.split_at(digits_end);

        match digits.parse::<u64>() {
            Ok(number) => Self {
                label: label.to_string(),
                number: Some(number),
                tail: tail.to_string(),
            },
            Err(_) => Self {
                label: label.to_string(),
                number: None,
                tail: rest.to_string(),
            },
        }
    }
}

impl fmt::Display for PreRelease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label)?;
        if let Some(number) = self.number {
            write!(f, "{number}")?;
        }
        write!(f, "{}", self.tail)
    }
}

impl VersionKey {
    pub fn parse(tag: &str) -> Option<Self> {
        let body = tag.strip_prefix(['v', 'V']).unwrap_or(tag);
        if body.is_empty() {
            return None;
        }

        let parts: Vec<&str> = body.split('.').collect();
        let mut release = Vec::with_capacity(parts.len());
        let mut pre = None;

        for (index, part) in parts.iter().enumerate() {
            let digits_end = part
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(part.len());
            if digits_end == 0 {
                return None;
            }
            release.push(part[..digits_end].parse::<u64>().ok()?);

            let rest = &part[digits_end..];
            if !rest.is_empty() {
                // Suffixes are only meaningful on the last component.
                if index + 1 != parts.len() {
                    return None;
                }
                let marker = rest.trim_start_matches(['-', '+', '_']);
                pre = Some(PreRelease::parse(marker));
            }
        }

        while release.len() > 1 && release.last() == Some(&0) {
            release.pop();
        }

        Some(Self { release, pre })
    }
}

impl Ord for VersionKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.release
            .cmp(&other.release)
            .then_with(|| match (&self.pre, &other.pre) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => a.cmp(b),
            })
    }
}

impl PartialOrd for VersionKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for VersionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let release: Vec<String> = self.release.iter().map(u64::to_string).collect();
        write!(f, "{}", release.join("."))?;
        if let Some(pre) = &self.pre {
            write!(f, "-{pre}")?;
        }
        Ok(())
    }
}

/// Select the newest tag of `tags` accepted by `filter`.
///
/// Under [`TagOrder::Semantic`], tags that do not parse as versions are
/// skipped. Ties keep the later tag in remote order.
pub fn select_latest(url: &str, tags: &[String], filter: &TagFilter, order: TagOrder) -> Result<String> {
    let candidates = tags.iter().filter(|tag| filter.accepts(tag));

    let selected = match order {
        TagOrder::Raw => candidates.last(),
        TagOrder::Semantic => candidates
            .filter_map(|tag| match VersionKey::parse(tag) {
                Some(key) => Some((key, tag)),
                None => {
                    debug!(tag = %tag, "skipping tag that is not a version");
                    None
                }
            })
            .max_by(|(a, _), (b, _)| a.cmp(b))
            .map(|(_, tag)| tag),
    };

    selected
        .cloned()
        .ok_or_else(|| CoreError::NoMatchingTag {
            url: url.to_string(),
        })
}

/// Resolves refs against remote repositories.
#[derive(Clone)]
pub struct VersionOracle {
    vcs: Arc<dyn VersionControl>,
}

impl VersionOracle {
    pub fn new(vcs: Arc<dyn VersionControl>) -> Self {
        Self { vcs }
    }

    pub async fn list_remote_tags(&self, ctx: &ExecutionContext, url: &str) -> Result<Vec<String>> {
        self.vcs.list_remote_tags(ctx, url).await
    }

    pub async fn latest_tag(
        &self,
        ctx: &ExecutionContext,
        url: &str,
        filter: &TagFilter,
        order: TagOrder,
    ) -> Result<String> {
        let tags = self.list_remote_tags(ctx, url).await?;
        debug!(url = %url, count = tags.len(), "listed remote tags");
        select_latest(url, &tags, filter, order)
    }

    /// Resolve `policy` to a concrete ref. Fixed refs never touch the remote.
    pub async fn resolve(&self, ctx: &ExecutionContext, url: &str, policy: &RefPolicy) -> Result<String> {
        let resolved = match policy {
            RefPolicy::Fixed(git_ref) => git_ref.clone(),
            RefPolicy::LatestTag { filter, order } => {
                self.latest_tag(ctx, url, filter, *order).await?
            }
        };
        info!(url = %url, git_ref = %resolved, "resolved ref");
        Ok(resolved)
    }
}
