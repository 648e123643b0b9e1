//! Per-tenant link table between tracker keys and desk ticket ids.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use time::OffsetDateTime;
use tracing::warn;

use crate::error::CoreError;
use crate::text::{format_timestamp, parse_timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentOrigin {
    Tracker,
    Desk,
}

impl AttachmentOrigin {
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Tracker => "tracker",
            Self::Desk => "desk",
        }
    }

    const fn legacy_prefix(self) -> &'static str {
        match self {
            Self::Tracker => "jira",
            Self::Desk => "fd",
        }
    }

    pub fn tag(self, native_id: impl AsRef<str>) -> String {
        format!("{}-{}", self.prefix(), native_id.as_ref())
    }
}

/// Rewrites tags written by older releases (`jira-`, `fd-`) to the current prefixes.
pub fn normalize_attachment_tag(raw: &str) -> String {
    let raw = raw.trim();
    for origin in [AttachmentOrigin::Tracker, AttachmentOrigin::Desk] {
        if let Some(native_id) = raw
            .strip_prefix(origin.legacy_prefix())
            .and_then(|rest| rest.strip_prefix('-'))
        {
            return origin.tag(native_id);
        }
    }
    raw.to_owned()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingRecord {
    #[serde(alias = "freshdesk_id")]
    pub desk_ticket_id: u64,
    #[serde(default, alias = "last_jira_update", with = "watermark")]
    pub last_tracker_sync: Option<OffsetDateTime>,
    #[serde(default, alias = "last_freshdesk_update", with = "watermark")]
    pub last_desk_sync: Option<OffsetDateTime>,
    #[serde(
        default,
        alias = "synced_attachments",
        deserialize_with = "deserialize_attachment_tags"
    )]
    pub synced_attachment_ids: BTreeSet<String>,
}

impl MappingRecord {
    pub fn new(desk_ticket_id: u64, now: OffsetDateTime) -> Self {
        Self {
            desk_ticket_id,
            last_tracker_sync: Some(now),
            last_desk_sync: Some(now),
            synced_attachment_ids: BTreeSet::new(),
        }
    }

    pub fn has_attachment(&self, tag: &str) -> bool {
        self.synced_attachment_ids.contains(tag)
    }

    pub fn record_attachment(&mut self, tag: String) -> bool {
        self.synced_attachment_ids.insert(tag)
    }

    /// Watermarks never move backwards.
    pub fn advance_tracker_sync(&mut self, at: OffsetDateTime) {
        advance(&mut self.last_tracker_sync, at);
    }

    pub fn advance_desk_sync(&mut self, at: OffsetDateTime) {
        advance(&mut self.last_desk_sync, at);
    }
}

fn advance(watermark: &mut Option<OffsetDateTime>, at: OffsetDateTime) {
    if watermark.is_none_or(|current| at > current) {
        *watermark = Some(at);
    }
}

/// Tracker key → record. The desk → tracker direction is derived on demand.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct MappingTable {
    records: BTreeMap<String, MappingRecord>,
}

impl MappingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, tracker_key: &str) -> Option<&MappingRecord> {
        self.records.get(tracker_key)
    }

    pub fn get_mut(&mut self, tracker_key: &str) -> Option<&mut MappingRecord> {
        self.records.get_mut(tracker_key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MappingRecord)> {
        self.records.iter()
    }

    pub fn contains_desk_ticket(&self, desk_ticket_id: u64) -> bool {
        self.records
            .values()
            .any(|record| record.desk_ticket_id == desk_ticket_id)
    }

    pub fn desk_index(&self) -> HashMap<u64, String> {
        self.records
            .iter()
            .map(|(key, record)| (record.desk_ticket_id, key.clone()))
            .collect()
    }

    /// Links a new pair, refusing anything that would break the one-to-one invariant.
    pub fn insert(
        &mut self,
        tracker_key: impl Into<String>,
        record: MappingRecord,
    ) -> Result<(), CoreError> {
        let tracker_key = tracker_key.into();
        if self.records.contains_key(&tracker_key) {
            return Err(CoreError::persistence(format!(
                "tracker ticket '{tracker_key}' is already mapped"
            )));
        }
        if let Some((existing, _)) = self
            .records
            .iter()
            .find(|(_, existing)| existing.desk_ticket_id == record.desk_ticket_id)
        {
            return Err(CoreError::persistence(format!(
                "desk ticket {} is already mapped to tracker ticket '{existing}'",
                record.desk_ticket_id
            )));
        }
        self.records.insert(tracker_key, record);
        Ok(())
    }
}

impl<'de> Deserialize<'de> for MappingTable {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = BTreeMap::<String, MappingRecord>::deserialize(deserializer)?;
        let mut table = MappingTable::new();
        for (tracker_key, record) in raw {
            if let Err(error) = table.insert(tracker_key.clone(), record) {
                warn!(tracker_key = %tracker_key, error = %error, "dropping conflicting mapping entry");
            }
        }
        Ok(table)
    }
}

fn deserialize_attachment_tags<'de, D>(deserializer: D) -> Result<BTreeSet<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(raw
        .iter()
        .map(|tag| normalize_attachment_tag(tag))
        .filter(|tag| !tag.is_empty())
        .collect())
}

mod watermark {
    use super::*;

    pub fn serialize<S>(value: &Option<OffsetDateTime>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(at) => serializer.serialize_some(&format_timestamp(*at)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<OffsetDateTime>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw.and_then(|value| {
            let parsed = parse_timestamp(&value);
            if parsed.is_none() {
                warn!(value = %value, "ignoring unparseable sync watermark");
            }
            parsed
        }))
    }
}
