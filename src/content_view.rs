use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// A viewing record as returned by the content-view service. Values are kept verbatim.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentViewRecord {
    pub session_id: String,
    pub lookup_type: String,
    pub title: String,
    pub station: String,
    pub start_first: String,
    pub end_last: String,
}

fn field_text(v: &Value, key: &str) -> String {
    match v.get(key) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

impl ContentViewRecord {
    pub fn from_json(v: &Value) -> Self {
        let title = field_text(v, "title");
        Self {
            session_id: field_text(v, "session_id"),
            lookup_type: field_text(v, "lookup_type"),
            title: if title.is_empty() { field_text(v, "program_title") } else { title },
            station: field_text(v, "network_name"),
            start_first: field_text(v, "start_time_first"),
            end_last: field_text(v, "start_time_last"),
        }
    }
}

pub fn parse_views(body: &str) -> anyhow::Result<Vec<ContentViewRecord>> {
    let rows: Vec<Value> = serde_json::from_str(body).context("content view response is not a JSON array")?;
    Ok(rows.iter().map(ContentViewRecord::from_json).collect())
}

pub trait ContentViewSource {
    fn fetch_views(&self, device_id: &str) -> anyhow::Result<Vec<ContentViewRecord>>;
}

pub struct HttpContentViews {
    agent: ureq::Agent,
    url: String,
    limit: usize,
}

impl HttpContentViews {
    pub fn new(url: &str, limit: usize, timeout_secs: u64) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(timeout_secs)))
            .build()
            .into();
        Self { agent, url: url.to_string(), limit }
    }
}

impl ContentViewSource for HttpContentViews {
    fn fetch_views(&self, device_id: &str) -> anyhow::Result<Vec<ContentViewRecord>> {
        let body = self.agent
            .get(&self.url)
            .query("device_id", device_id)
            .query("limit", self.limit.to_string())
            .header("User-Agent", "acrdoctor")
            .call()
            .with_context(|| format!("GET {}", self.url))?
            .body_mut()
            .read_to_string()
            .context("reading content view response")?;
        let rows = parse_views(&body)?;
        log::debug!("Got {} CV records...", rows.len());
        Ok(rows)
    }
}

/// Outcome of the content-view stage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ViewLookup {
    /// No sessions were correlated, so the service was not asked.
    Skipped,
    Empty,
    Found(Vec<ContentViewRecord>),
    Failed,
}

impl ViewLookup {
    pub fn records(&self) -> &[ContentViewRecord] {
        match self { ViewLookup::Found(v) => v, _ => &[] }
    }
}

pub fn lookup_views<S: ContentViewSource>(source: &S, device_id: &str, session_count: usize) -> ViewLookup {
    log::info!("Getting Content View data for matched sessions...");
    if session_count == 0 {
        log::info!("No sessions matched, nothing to query from the content view service.");
        return ViewLookup::Skipped;
    }
    match source.fetch_views(device_id) {
        Ok(rows) if rows.is_empty() => {
            log::info!("No content_view records for matched sessions for this device.");
            log::info!("Note: only the last hour's worth of content view data is queryable.");
            ViewLookup::Empty
        }
        Ok(rows) => ViewLookup::Found(rows),
        Err(e) => {
            log::error!("Content view lookup failed: {:#}", e);
            ViewLookup::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct Canned {
        body: &'static str,
        calls: Cell<usize>,
    }

    impl ContentViewSource for Canned {
        fn fetch_views(&self, _device_id: &str) -> anyhow::Result<Vec<ContentViewRecord>> {
            self.calls.set(self.calls.get() + 1);
            parse_views(self.body)
        }
    }

    #[test]
    fn title_falls_back_to_program_title() {
        let rows = parse_views(r#"[
            {"session_id":"s1","lookup_type":"ad","title":"Spot","network_name":"NBC","start_time_first":"10:00","start_time_last":"10:01"},
            {"session_id":"s2","lookup_type":"tv","title":"","program_title":"News","start_time_first":"11:00","start_time_last":null},
            {"session_id":42,"lookup_type":"tv","program_title":"Movie"}
        ]"#).unwrap();
        assert_eq!(rows[0].title, "Spot");
        assert_eq!(rows[0].station, "NBC");
        assert_eq!(rows[1].title, "News");
        assert_eq!(rows[1].station, "");
        assert_eq!(rows[1].end_last, "");
        assert_eq!(rows[2].session_id, "42");
        assert_eq!(rows[2].title, "Movie");
    }

    #[test]
    fn malformed_body_is_an_error() {
        assert!(parse_views("{\"error\":\"nope\"}").is_err());
    }

    #[test]
    fn no_sessions_skips_the_service() {
        let src = Canned { body: "[]", calls: Cell::new(0) };
        assert_eq!(lookup_views(&src, "dev1", 0), ViewLookup::Skipped);
        assert_eq!(src.calls.get(), 0);
    }

    #[test]
    fn empty_answer_is_informational() {
        let src = Canned { body: "[]", calls: Cell::new(0) };
        assert_eq!(lookup_views(&src, "dev1", 3), ViewLookup::Empty);
        assert_eq!(src.calls.get(), 1);
    }

    #[test]
    fn failures_are_reported_not_raised() {
        let src = Canned { body: "not json", calls: Cell::new(0) };
        assert!(matches!(lookup_views(&src, "dev1", 1), ViewLookup::Failed));
        let ok = Canned { body: r#"[{"session_id":"s1"}]"#, calls: Cell::new(0) };
        assert_eq!(lookup_views(&ok, "dev1", 1).records().len(), 1);
    }
}
