use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::IgnoredAny;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::warn;

use crate::error::Error;

/// Maximum length for a GitHub username/organization name.
/// This limit is enforced by GitHub.
const MAX_GITHUB_OWNER_LENGTH: usize = 39;

/// Maximum length for a GitHub repository name.
/// This limit is enforced by GitHub.
const MAX_GITHUB_REPO_LENGTH: usize = 100;

/// A repository whose releases are watched, in "owner/repo" format.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TrackedRepository(String);

impl TrackedRepository {
    /// Parses and validates an "owner/repo" identifier.
    pub fn parse(repo: impl Into<String>) -> Result<Self, Error> {
        let repo = repo.into();
        let trimmed = repo.trim();
        if !is_valid_repo_format(trimmed) {
            return Err(Error::InvalidRepo(repo));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn owner(&self) -> &str {
        self.0.split_once('/').map_or("", |(owner, _)| owner)
    }

    pub fn name(&self) -> &str {
        self.0.split_once('/').map_or("", |(_, name)| name)
    }
}

impl fmt::Display for TrackedRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TrackedRepository {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TrackedRepository {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<TrackedRepository> for String {
    fn from(repo: TrackedRepository) -> Self {
        repo.0
    }
}

/// Represents a GitHub release.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Release {
    /// The repository the release belongs to.
    pub repository: TrackedRepository,
    /// GitHub's numeric release id.
    pub id: u64,
    /// The release tag name (e.g., "v1.0.0").
    pub tag_name: String,
    /// The release name/title.
    pub name: Option<String>,
    /// The release body/description.
    pub body: Option<String>,
    /// Whether this is a prerelease.
    pub prerelease: bool,
    /// Whether this is a draft release.
    pub draft: bool,
    /// The URL to the release page.
    pub html_url: String,
    /// When the release was published.
    pub published_at: Option<DateTime<Utc>>,
}

/// Internal structure for GitHub API response.
#[derive(Debug, Deserialize)]
pub(crate) struct GitHubReleaseResponse {
    #[serde(default)]
    pub id: u64,
    pub tag_name: String,
    pub name: Option<String>,
    pub body: Option<String>,
    #[serde(default)]
    pub prerelease: bool,
    #[serde(default)]
    pub draft: bool,
    pub html_url: String,
    pub published_at: Option<DateTime<Utc>>,
}

impl GitHubReleaseResponse {
    pub(crate) fn into_release(self, repository: &TrackedRepository) -> Release {
        Release {
            repository: repository.clone(),
            id: self.id,
            tag_name: self.tag_name,
            name: self.name,
            body: self.body,
            prerelease: self.prerelease,
            draft: self.draft,
            html_url: self.html_url,
            published_at: self.published_at,
        }
    }
}

/// An announcement of one new release.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub repository: TrackedRepository,
    pub release_tag: String,
    /// Link to the release page.
    pub link: String,
    pub name: Option<String>,
    pub body: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub prerelease: bool,
}

impl From<&Release> for Notification {
    fn from(release: &Release) -> Self {
        Self {
            repository: release.repository.clone(),
            release_tag: release.tag_name.clone(),
            link: release.html_url.clone(),
            name: release.name.clone(),
            body: release.body.clone(),
            published_at: release.published_at,
            prerelease: release.prerelease,
        }
    }
}

/// Durable record of which release tags have already been announced.
///
/// Keys are repository identifiers, matched ignoring ASCII case as GitHub does.
/// Tags are only ever added; entries for repositories that are no longer
/// tracked are kept as well.
///
/// Files written by the older single-id format (`{"owner/repo": "<release id>"}`)
/// load as a legacy release id for that repository. The poller folds it into
/// tags the first time the repository is fetched successfully.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotifiedState {
    tags: BTreeMap<String, BTreeSet<String>>,
    legacy_ids: BTreeMap<String, u64>,
}

/// One value of the on-disk map.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredEntry {
    Tags(BTreeSet<String>),
    LegacyId(String),
    Invalid(IgnoredAny),
}

fn lookup<'a, V>(
    map: &'a BTreeMap<String, V>,
    repo: &TrackedRepository,
) -> Option<(&'a String, &'a V)> {
    map.get_key_value(repo.as_str())
        .or_else(|| map.iter().find(|(key, _)| key.eq_ignore_ascii_case(repo.as_str())))
}

impl NotifiedState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if `tag` has already been announced for `repo`.
    pub fn contains(&self, repo: &TrackedRepository, tag: &str) -> bool {
        self.tags(repo).is_some_and(|tags| tags.contains(tag))
    }

    /// Marks `tag` as announced. Returns false if it already was.
    pub fn insert(&mut self, repo: &TrackedRepository, tag: impl Into<String>) -> bool {
        let key = lookup(&self.tags, repo)
            .map(|(key, _)| key)
            .or_else(|| lookup(&self.legacy_ids, repo).map(|(key, _)| key))
            .map_or_else(|| repo.as_str().to_string(), |key| key.clone());
        self.tags.entry(key).or_default().insert(tag.into())
    }

    pub fn tags(&self, repo: &TrackedRepository) -> Option<&BTreeSet<String>> {
        lookup(&self.tags, repo).map(|(_, tags)| tags)
    }

    /// The release id recorded for `repo` by the single-id format, if not yet folded in.
    pub fn legacy_release_id(&self, repo: &TrackedRepository) -> Option<u64> {
        lookup(&self.legacy_ids, repo).map(|(_, id)| *id)
    }

    /// Records every release at or below the legacy id of `repo` as announced
    /// and forgets the id. Returns how many tags were added.
    ///
    /// GitHub release ids increase with creation, so anything newer than the
    /// legacy id was never announced. The id is kept while `releases` is empty.
    pub(crate) fn absorb_legacy_id(
        &mut self,
        repo: &TrackedRepository,
        releases: &[Release],
    ) -> usize {
        if releases.is_empty() {
            return 0;
        }
        let Some(key) = lookup(&self.legacy_ids, repo).map(|(key, _)| key.clone()) else {
            return 0;
        };
        let Some(legacy_id) = self.legacy_ids.remove(&key) else {
            return 0;
        };

        let tags = self.tags.entry(key).or_default();
        releases
            .iter()
            .filter(|release| release.id <= legacy_id)
            .filter(|release| tags.insert(release.tag_name.clone()))
            .count()
    }

    /// Iterates the repository identifiers present in the state.
    pub fn repositories(&self) -> impl Iterator<Item = &str> {
        self.tags
            .keys()
            .chain(self.legacy_ids.keys().filter(|key| !self.tags.contains_key(*key)))
            .map(String::as_str)
    }

    /// Returns true if every (repository, tag) pair in `other` is also in `self`.
    ///
    /// A legacy id in `other` is covered by the same id or by any recorded tags.
    pub fn is_superset_of(&self, other: &NotifiedState) -> bool {
        let tags_covered = other.tags.iter().all(|(repo, tags)| {
            self.tags
                .get(repo)
                .map_or(tags.is_empty(), |mine| mine.is_superset(tags))
        });
        let legacy_covered = other.legacy_ids.iter().all(|(repo, id)| {
            self.legacy_ids.get(repo) == Some(id)
                || self.tags.get(repo).is_some_and(|mine| !mine.is_empty())
        });
        tags_covered && legacy_covered
    }

    pub fn is_empty(&self) -> bool {
        self.tags.values().all(BTreeSet::is_empty) && self.legacy_ids.is_empty()
    }
}

impl Serialize for NotifiedState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let keys: BTreeSet<&String> = self.tags.keys().chain(self.legacy_ids.keys()).collect();
        let mut map = serializer.serialize_map(Some(keys.len()))?;
        for key in keys {
            let tags = self.tags.get(key).filter(|tags| !tags.is_empty());
            match (tags, self.legacy_ids.get(key)) {
                (None, Some(id)) => map.serialize_entry(key, &id.to_string())?,
                (tags, _) => map.serialize_entry(key, tags.unwrap_or(&BTreeSet::new()))?,
            }
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for NotifiedState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let entries = BTreeMap::<String, StoredEntry>::deserialize(deserializer)?;

        let mut state = Self::new();
        for (repo, entry) in entries {
            match entry {
                StoredEntry::Tags(tags) => {
                    state.tags.insert(repo, tags);
                }
                StoredEntry::LegacyId(id) => match id.trim().parse::<u64>() {
                    Ok(id) => {
                        state.legacy_ids.insert(repo, id);
                    }
                    Err(_) => warn!(repo = %repo, id = %id, "Ignoring unreadable legacy release id"),
                },
                StoredEntry::Invalid(_) => warn!(repo = %repo, "Ignoring malformed notified entry"),
            }
        }
        Ok(state)
    }
}

impl<R, T, I> FromIterator<(R, I)> for NotifiedState
where
    R: Into<String>,
    T: Into<String>,
    I: IntoIterator<Item = T>,
{
    fn from_iter<It: IntoIterator<Item = (R, I)>>(iter: It) -> Self {
        let mut tags: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (repo, repo_tags) in iter {
            tags.entry(repo.into())
                .or_default()
                .extend(repo_tags.into_iter().map(Into::into));
        }
        Self {
            tags,
            legacy_ids: BTreeMap::new(),
        }
    }
}

/// Count of tracked repositories, published as a badge document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BadgeState {
    pub tracked_count: usize,
}

/// On-disk layout of the badge document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BadgeFormat {
    /// `{"tracked_count": N}`.
    #[default]
    Count,
    /// A shields.io endpoint document.
    Shields,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ShieldsEndpoint<'a> {
    schema_version: u8,
    label: &'a str,
    message: String,
    color: &'a str,
}

impl BadgeState {
    pub fn new(tracked_count: usize) -> Self {
        Self { tracked_count }
    }

    /// Renders the document written to the badge file.
    pub fn to_document(&self, format: BadgeFormat) -> serde_json::Result<serde_json::Value> {
        match format {
            BadgeFormat::Count => serde_json::to_value(self),
            BadgeFormat::Shields => serde_json::to_value(ShieldsEndpoint {
                schema_version: 1,
                label: "tracked repos",
                message: self.tracked_count.to_string(),
                color: "brightgreen",
            }),
        }
    }
}

/// Validates that a repo string is in valid "owner/repo" format.
///
/// GitHub requirements:
/// - Owner: alphanumeric or hyphens, cannot start/end with hyphen, max 39 chars
/// - Repo: alphanumeric, hyphens, underscores, or dots, max 100 chars
fn is_valid_repo_format(repo: &str) -> bool {
    let Some((owner, name)) = repo.split_once('/') else {
        return false;
    };

    if name.contains('/') {
        return false;
    }

    is_valid_owner(owner) && is_valid_repo_name(name)
}

fn is_valid_owner(owner: &str) -> bool {
    !owner.is_empty()
        && owner.len() <= MAX_GITHUB_OWNER_LENGTH
        && !owner.starts_with('-')
        && !owner.ends_with('-')
        && owner.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

fn is_valid_repo_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_GITHUB_REPO_LENGTH
        && name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}
