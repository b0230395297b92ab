use std::sync::Arc;

use serde::Serialize;

use rewind_api::{Cursor, Event, EventKind, EventLog, EventPayload, LogError, StreamFilter};

/// Parameters of one merged timeline page.
#[derive(Debug, Clone, Default)]
pub struct TimelineQuery {
    pub cursor: Cursor,
    pub limit: usize,
    pub kinds: Vec<EventKind>,
    pub filter: StreamFilter,
    /// Inclusive timestamp range, applied after the per-kind fetch.
    pub ts_from: Option<i64>,
    pub ts_to: Option<i64>,
}

impl TimelineQuery {
    /// Parse a comma-separated `types` parameter. Unknown names are dropped;
    /// an empty result selects every timeline kind (see [`Self::effective_kinds`]).
    pub fn parse_kinds(raw: Option<&str>) -> Vec<EventKind> {
        let mut kinds = Vec::new();
        for kind in raw.unwrap_or_default().split(',').filter_map(EventKind::parse) {
            if EventKind::TIMELINE.contains(&kind) && !kinds.contains(&kind) {
                kinds.push(kind);
            }
        }
        kinds
    }

    /// Requested kinds, or all timeline kinds when none were requested.
    pub fn effective_kinds(&self) -> Vec<EventKind> {
        let kinds: Vec<EventKind> = self
            .kinds
            .iter()
            .copied()
            .filter(|k| EventKind::TIMELINE.contains(k))
            .collect();
        if kinds.is_empty() {
            EventKind::TIMELINE.to_vec()
        } else {
            kinds
        }
    }

    fn in_range(&self, ts: i64) -> bool {
        self.ts_from.is_none_or(|from| ts >= from) && self.ts_to.is_none_or(|to| ts <= to)
    }
}

/// Compact, kind-tagged view of an event for the timeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineItem {
    pub kind: EventKind,
    pub event_id: String,
    pub ts: i64,
    pub seq: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl From<&Event> for TimelineItem {
    fn from(event: &Event) -> Self {
        let mut item = TimelineItem {
            kind: event.kind(),
            event_id: event.event_id.clone(),
            ts: event.timestamp_ms,
            seq: event.sequence,
            level: None,
            message: None,
            stack: None,
            method: None,
            url: None,
            status: None,
            duration_ms: None,
            name: None,
        };
        match &event.payload {
            EventPayload::Console(c) => {
                item.level = Some(c.level.clone());
                item.message = Some(c.message.clone());
                item.stack = c.stack.clone();
            }
            EventPayload::Network(n) => {
                item.method = Some(n.method.clone());
                item.url = Some(n.url.clone());
                item.status = Some(n.status);
                item.duration_ms = Some(n.duration_ms);
            }
            EventPayload::Breadcrumb(b) => {
                item.name = Some(b.name.clone());
                item.message = Some(b.message.clone());
            }
            EventPayload::Rrweb(_) => {}
        }
        item
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelinePage {
    pub items: Vec<TimelineItem>,
    pub next_after: Cursor,
}

/// Single-stream page.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamPage {
    pub items: Vec<Event>,
    pub next_after: Cursor,
}

/// Merges independently paginated streams into one time-ordered page.
///
/// Two stages: every requested kind is fetched with its own `limit` after the
/// shared cursor, then the union is sorted by `(ts, seq)` and cut to `limit`.
/// A kind is never re-read to back-fill, so a page can hold fewer than
/// `limit` items while later events still exist; the next page picks them
/// up from the returned cursor.
#[derive(Clone)]
pub struct TimelineMerger {
    log: Arc<dyn EventLog>,
}

impl TimelineMerger {
    pub fn new(log: Arc<dyn EventLog>) -> Self {
        Self { log }
    }

    pub async fn record_exists(&self, record_id: &str) -> bool {
        self.log.record_exists(record_id).await
    }

    pub async fn find(&self, record_id: &str, kind: EventKind, event_id: &str) -> Result<Option<Event>, LogError> {
        self.log.find(record_id, kind, event_id).await
    }

    pub async fn page(&self, record_id: &str, query: &TimelineQuery) -> Result<TimelinePage, LogError> {
        let limit = query.limit.max(1);

        let mut events: Vec<Event> = Vec::new();
        for kind in query.effective_kinds() {
            let batch = self
                .log
                .read_after(record_id, kind, query.cursor, limit, &query.filter)
                .await?;
            events.extend(batch);
        }

        events.retain(|e| query.in_range(e.timestamp_ms));
        events.sort_by_key(Event::order_key);
        events.truncate(limit);

        let next_after = events.last().map(Event::cursor).unwrap_or(query.cursor);
        Ok(TimelinePage {
            items: events.iter().map(TimelineItem::from).collect(),
            next_after,
        })
    }

    pub async fn stream_page(
        &self,
        record_id: &str,
        kind: EventKind,
        cursor: Cursor,
        limit: usize,
        filter: &StreamFilter,
    ) -> Result<StreamPage, LogError> {
        let items = self.log.read_after(record_id, kind, cursor, limit.max(1), filter).await?;
        let next_after = items.last().map(Event::cursor).unwrap_or(cursor);
        Ok(StreamPage { items, next_after })
    }

    /// Every event of one stream, read in `batch`-sized pages.
    pub async fn load_all(&self, record_id: &str, kind: EventKind, batch: usize) -> Result<Vec<Event>, LogError> {
        let batch = batch.max(1);
        let filter = StreamFilter::default();
        let mut cursor = Cursor::START;
        let mut all = Vec::new();
        loop {
            let page = self.log.read_after(record_id, kind, cursor, batch, &filter).await?;
            let Some(last) = page.last() else {
                break;
            };
            cursor = last.cursor();
            let full = page.len() >= batch;
            all.extend(page);
            if !full {
                break;
            }
        }
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_parsing() {
        assert!(TimelineQuery::parse_kinds(None).is_empty());
        assert_eq!(
            TimelineQuery::parse_kinds(Some("network, bogus,CONSOLE,network")),
            vec![EventKind::Network, EventKind::Console]
        );
        assert!(TimelineQuery::parse_kinds(Some("bogus,rrweb")).is_empty());
    }

    #[test]
    fn empty_kind_set_means_all_timeline_kinds() {
        let query = TimelineQuery {
            kinds: TimelineQuery::parse_kinds(Some("bogus")),
            ..Default::default()
        };
        assert_eq!(query.effective_kinds(), EventKind::TIMELINE.to_vec());
    }
}
