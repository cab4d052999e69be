//! Repository events and the conditions under which a pipeline runs.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Kind of repository event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Push,
    PullRequest,
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Push => "push",
            EventKind::PullRequest => "pull_request",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "push" => Ok(EventKind::Push),
            "pull_request" | "pull-request" | "pr" => Ok(EventKind::PullRequest),
            other => Err(format!("unknown event kind: {other}")),
        }
    }
}

/// The event that asks for a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDescriptor {
    pub event_kind: EventKind,

    /// Git ref the event refers to, e.g. `refs/heads/main`.
    #[serde(rename = "ref")]
    pub git_ref: String,

    /// Free-form event metadata (sha, actor, pr number...).
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl EventDescriptor {
    pub fn new(event_kind: EventKind, git_ref: impl Into<String>) -> Self {
        Self {
            event_kind,
            git_ref: git_ref.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn push(git_ref: impl Into<String>) -> Self {
        Self::new(EventKind::Push, git_ref)
    }

    pub fn pull_request(git_ref: impl Into<String>) -> Self {
        Self::new(EventKind::PullRequest, git_ref)
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

impl fmt::Display for EventDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.event_kind, self.git_ref)
    }
}

/// Which events start a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerConditions {
    pub events: BTreeSet<EventKind>,

    /// Ref filters. Empty matches every ref. A trailing `*` makes a pattern a
    /// prefix match; patterns may be full refs or short branch/tag names.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub refs: Vec<String>,
}

impl TriggerConditions {
    pub fn on<I>(events: I) -> Self
    where
        I: IntoIterator<Item = EventKind>,
    {
        Self {
            events: events.into_iter().collect(),
            refs: Vec::new(),
        }
    }

    /// `push` and `pull_request` on any ref.
    pub fn push_and_pull_request() -> Self {
        Self::on([EventKind::Push, EventKind::PullRequest])
    }

    pub fn with_refs<I, S>(mut self, refs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.refs = refs.into_iter().map(Into::into).collect();
        self
    }

    /// Whether `event` should start a run.
    pub fn matches(&self, event: &EventDescriptor) -> bool {
        if !self.events.contains(&event.event_kind) {
            return false;
        }
        self.refs.is_empty()
            || self
                .refs
                .iter()
                .any(|pattern| ref_matches(pattern, &event.git_ref))
    }
}

fn ref_matches(pattern: &str, git_ref: &str) -> bool {
    let short = git_ref
        .strip_prefix("refs/heads/")
        .or_else(|| git_ref.strip_prefix("refs/tags/"))
        .unwrap_or(git_ref);

    match pattern.strip_suffix('*') {
        Some(prefix) => git_ref.starts_with(prefix) || short.starts_with(prefix),
        None => pattern == git_ref || pattern == short,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_parse() {
        assert_eq!("push".parse::<EventKind>().unwrap(), EventKind::Push);
        assert_eq!("pull-request".parse::<EventKind>().unwrap(), EventKind::PullRequest);
        assert_eq!("PULL_REQUEST".parse::<EventKind>().unwrap(), EventKind::PullRequest);
        assert!("tag".parse::<EventKind>().is_err());
    }

    #[test]
    fn test_matches_any_ref_by_default() {
        let trigger = TriggerConditions::push_and_pull_request();
        assert!(trigger.matches(&EventDescriptor::push("refs/heads/feature/x")));
        assert!(trigger.matches(&EventDescriptor::pull_request("refs/pull/7/merge")));
    }

    #[test]
    fn test_event_kind_filter() {
        let trigger = TriggerConditions::on([EventKind::PullRequest]);
        assert!(!trigger.matches(&EventDescriptor::push("refs/heads/main")));
    }

    #[test]
    fn test_ref_patterns() {
        let trigger = TriggerConditions::on([EventKind::Push]).with_refs(["main", "release/*"]);
        assert!(trigger.matches(&EventDescriptor::push("refs/heads/main")));
        assert!(trigger.matches(&EventDescriptor::push("main")));
        assert!(trigger.matches(&EventDescriptor::push("refs/heads/release/1.2")));
        assert!(!trigger.matches(&EventDescriptor::push("refs/heads/mainline")));
        assert!(!trigger.matches(&EventDescriptor::push("refs/heads/dev")));
    }

    #[test]
    fn test_descriptor_serializes_ref_key() {
        let event = EventDescriptor::push("refs/heads/main").with_metadata("sha", "abc123");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["ref"], "refs/heads/main");
        assert_eq!(json["event_kind"], "push");
        assert_eq!(json["metadata"]["sha"], "abc123");
    }
}
