use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::ops::Bound;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::stream::{ReadCursor, StreamEntry, StreamFields};

/// `<millis>-<seq>`, ordered like Redis stream ids.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct EntryId {
    ms: u64,
    seq: u64,
}

impl EntryId {
    fn parse(text: &str) -> Option<Self> {
        let (ms, seq) = text.split_once('-')?;
        Some(Self {
            ms: ms.parse().ok()?,
            seq: seq.parse().ok()?,
        })
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

#[derive(Debug)]
struct PendingEntry {
    consumer: String,
    deliveries: u64,
}

#[derive(Debug, Default)]
struct ConsumerGroup {
    last_delivered: EntryId,
    pending: BTreeMap<EntryId, PendingEntry>,
}

/// Append-only log with consumer groups and per-group pending regions.
#[derive(Debug, Default)]
pub(crate) struct StreamLog {
    entries: BTreeMap<EntryId, StreamFields>,
    last_id: EntryId,
    groups: HashMap<String, ConsumerGroup>,
}

impl StreamLog {
    pub(crate) fn append(&mut self, fields: StreamFields) -> EntryId {
        let ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or_default();
        let id = if ms > self.last_id.ms {
            EntryId { ms, seq: 0 }
        } else {
            EntryId {
                ms: self.last_id.ms,
                seq: self.last_id.seq + 1,
            }
        };
        self.entries.insert(id, fields);
        self.last_id = id;
        id
    }

    /// Creates a group positioned before the first entry.
    pub(crate) fn create_group(&mut self, group: &str) -> bool {
        if self.groups.contains_key(group) {
            return false;
        }
        self.groups
            .insert(group.to_string(), ConsumerGroup::default());
        true
    }

    /// Returns `None` if the group does not exist.
    pub(crate) fn read_group(
        &mut self,
        group: &str,
        consumer: &str,
        cursor: ReadCursor,
        count: usize,
    ) -> Option<Vec<StreamEntry>> {
        let Self {
            entries, groups, ..
        } = self;
        let state = groups.get_mut(group)?;
        let mut delivered = Vec::new();

        match cursor {
            ReadCursor::New => {
                let range = entries.range((Bound::Excluded(state.last_delivered), Bound::Unbounded));
                for (id, fields) in range.take(count) {
                    state.pending.insert(
                        *id,
                        PendingEntry {
                            consumer: consumer.to_string(),
                            deliveries: 1,
                        },
                    );
                    state.last_delivered = *id;
                    delivered.push(StreamEntry {
                        id: id.to_string(),
                        fields: fields.clone(),
                    });
                }
            }
            ReadCursor::Pending => {
                let mine = state
                    .pending
                    .iter_mut()
                    .filter(|(_, pending)| pending.consumer == consumer)
                    .take(count);
                for (id, pending) in mine {
                    pending.deliveries += 1;
                    if let Some(fields) = entries.get(id) {
                        delivered.push(StreamEntry {
                            id: id.to_string(),
                            fields: fields.clone(),
                        });
                    }
                }
            }
        }

        Some(delivered)
    }

    pub(crate) fn ack(&mut self, group: &str, ids: &[String]) -> Option<u64> {
        let state = self.groups.get_mut(group)?;
        let acked = ids
            .iter()
            .filter_map(|id| EntryId::parse(id))
            .filter(|id| state.pending.remove(id).is_some())
            .count();
        Some(acked as u64)
    }

    pub(crate) fn pending_count(&self, group: &str) -> Option<u64> {
        self.groups
            .get(group)
            .map(|state| state.pending.len() as u64)
    }

    pub(crate) fn len(&self) -> u64 {
        self.entries.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(n: usize) -> StreamFields {
        vec![("n".to_string(), n.to_string())]
    }

    #[test]
    fn test_ids_are_strictly_increasing() {
        let mut log = StreamLog::default();
        let ids: Vec<EntryId> = (0..100).map(|n| log.append(fields(n))).collect();
        assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn test_entry_id_parse_and_display() {
        let id = EntryId::parse("1700000000000-3").unwrap();
        assert_eq!(id.to_string(), "1700000000000-3");
        assert!(EntryId::parse("garbage").is_none());
    }

    #[test]
    fn test_group_delivers_each_entry_once() {
        let mut log = StreamLog::default();
        log.create_group("g");
        log.append(fields(1));
        log.append(fields(2));

        let first = log.read_group("g", "c1", ReadCursor::New, 1).unwrap();
        let second = log.read_group("g", "c2", ReadCursor::New, 10).unwrap();
        let third = log.read_group("g", "c1", ReadCursor::New, 10).unwrap();

        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert_ne!(first[0].id, second[0].id);
        assert!(third.is_empty());
        assert_eq!(log.pending_count("g"), Some(2));
    }

    #[test]
    fn test_pending_is_per_consumer_until_ack() {
        let mut log = StreamLog::default();
        log.create_group("g");
        log.append(fields(1));

        let read = log.read_group("g", "c1", ReadCursor::New, 1).unwrap();
        assert!(log.read_group("g", "c2", ReadCursor::Pending, 10).unwrap().is_empty());
        let pending = log.read_group("g", "c1", ReadCursor::Pending, 10).unwrap();
        assert_eq!(pending, read);

        assert_eq!(log.ack("g", &[read[0].id.clone()]), Some(1));
        assert_eq!(log.ack("g", &[read[0].id.clone()]), Some(0));
        assert!(log.read_group("g", "c1", ReadCursor::Pending, 10).unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_group_is_not_recreated() {
        let mut log = StreamLog::default();
        assert!(log.create_group("g"));
        assert!(!log.create_group("g"));
        assert!(log.read_group("missing", "c", ReadCursor::New, 1).is_none());
    }
}
