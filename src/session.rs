//! Rebuilds ACR session lifecycles from the device's slice of the server log.
//!
//! Each line is classified on its own into a [`LineEvent`]; the events are then
//! folded into a [`SessionCorrelator`], which keeps every record it has seen but
//! only reports the ids held by its bounded [`SessionWindow`].

use crate::locate::ServerAssignment;
use crate::remote::{shell_quote, Executor, Target};
use anyhow::Context;
use regex::Regex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::OnceLock;

pub const DEFAULT_WINDOW: usize = 10;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LineEvent {
    Start { ts: String, id: String },
    End { ts: String, id: String },
    AdMatch { id: String, tag: String, content_id: String, station_id: String },
    Unrecognized,
}

struct Patterns {
    start: Regex,
    end: Regex,
    ad_match: Regex,
}

fn patterns() -> &'static Patterns {
    static P: OnceLock<Patterns> = OnceLock::new();
    P.get_or_init(|| Patterns {
        start: Regex::new(r"^\[([^\]]+)\].*session id ([^,]+), .* type = start").expect("static regex"),
        end: Regex::new(r"^\[([^\]]+)\].*session id ([^,]+), .* type = end").expect("static regex"),
        ad_match: Regex::new(r".*Got match.*token (\S+)-[cl]-.*tag = (\S*).*content id = (\d*).*station id = (\d*)").expect("static regex"),
    })
}

/// First matching rule wins: start, end, ad match.
pub fn classify(line: &str) -> LineEvent {
    let p = patterns();
    if let Some(c) = p.start.captures(line) {
        return LineEvent::Start { ts: c[1].to_string(), id: c[2].to_string() };
    }
    if let Some(c) = p.end.captures(line) {
        return LineEvent::End { ts: c[1].to_string(), id: c[2].to_string() };
    }
    if let Some(c) = p.ad_match.captures(line) {
        return LineEvent::AdMatch {
            id: c[1].to_string(),
            tag: c[2].to_string(),
            content_id: c[3].to_string(),
            station_id: c[4].to_string(),
        };
    }
    LineEvent::Unrecognized
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub start_time: String,
    pub end_time: String,
    pub tag: String,
    pub station_id: String,
    pub content_id: String,
}

impl SessionRecord {
    fn started(id: &str, ts: &str) -> Self {
        Self { session_id: id.to_string(), start_time: ts.to_string(), ..Default::default() }
    }
}

fn fill_if_empty(field: &mut String, value: &str) {
    if field.is_empty() { value.clone_into(field); }
}

/// Fixed-capacity FIFO of session ids in discovery order.
#[derive(Clone, Debug)]
pub struct SessionWindow {
    ids: VecDeque<String>,
    capacity: usize,
}

impl SessionWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { ids: VecDeque::with_capacity(capacity), capacity }
    }

    /// Appends `id` as the newest entry, returning the id evicted to make room.
    /// A repeated id takes a fresh slot; its older slot ages out in turn.
    pub fn push(&mut self, id: &str) -> Option<String> {
        let evicted = if self.ids.len() == self.capacity { self.ids.pop_front() } else { None };
        self.ids.push_back(id.to_string());
        evicted
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> { self.ids.iter().map(String::as_str) }
    pub fn len(&self) -> usize { self.ids.len() }
    pub fn is_empty(&self) -> bool { self.ids.is_empty() }
    pub fn capacity(&self) -> usize { self.capacity }
}

#[derive(Clone, Debug)]
pub struct SessionCorrelator {
    records: HashMap<String, SessionRecord>,
    window: SessionWindow,
}

impl SessionCorrelator {
    pub fn new(capacity: usize) -> Self {
        Self { records: HashMap::new(), window: SessionWindow::new(capacity) }
    }

    pub fn apply(&mut self, event: LineEvent) {
        match event {
            LineEvent::Start { ts, id } => {
                log::debug!("Got new session start message with session id: {}", id);
                self.records.insert(id.clone(), SessionRecord::started(&id, &ts));
                if let Some(old) = self.window.push(&id) { log::trace!("Session {} left the window", old); }
            }
            LineEvent::End { ts, id } => {
                log::debug!("Got new session end message with session id: {}", id);
                match self.records.get_mut(&id) {
                    Some(r) => r.end_time = ts,
                    None => log::debug!("Ignoring end of {} since start was not in log.", id),
                }
            }
            LineEvent::AdMatch { id, tag, content_id, station_id } => {
                log::debug!("Got match for: {} cid: {} sid: {}", id, content_id, station_id);
                let Some(r) = self.records.get_mut(&id) else {
                    log::debug!("Ignoring match for {} since start was not in log.", id);
                    return;
                };
                // an ad match without a station is not tagged
                if !station_id.is_empty() { r.tag = tag; }
                fill_if_empty(&mut r.content_id, &content_id);
                fill_if_empty(&mut r.station_id, &station_id);
            }
            LineEvent::Unrecognized => {}
        }
    }

    /// Records for the windowed ids, oldest discovery first. A restarted id
    /// appears once per slot it holds.
    pub fn sessions(&self) -> Vec<SessionRecord> {
        self.window.ids().filter_map(|id| self.records.get(id).cloned()).collect()
    }
}

pub fn correlate(log_text: &str, device_id: &str, capacity: usize) -> Vec<SessionRecord> {
    log::debug!("Parsing log for device {}, size = {} ...", device_id, log_text.len());
    let state = log_text
        .lines()
        .map(classify)
        .fold(SessionCorrelator::new(capacity), |mut acc, ev| { acc.apply(ev); acc });
    if state.window.is_empty() {
        log::debug!("No session starts for device {} in log", device_id);
    } else {
        log::debug!("Window holds {} of {} sessions", state.window.len(), state.window.capacity());
    }
    state.sessions()
}

pub fn log_path(log_dir: &str, port: u16) -> String {
    format!("{}/acr-{}.out", log_dir.trim_end_matches('/'), port)
}

/// Pulls the device's lines out of the ACR server log.
pub fn fetch_session_log<E: Executor>(exec: &E, assignment: &ServerAssignment, device_id: &str, log_dir: &str) -> anyhow::Result<String> {
    log::debug!("Getting info for device {} from ACR server {}...", device_id, assignment.server);
    let path = log_path(log_dir, assignment.port);
    let command = format!("grep -- {} {}", shell_quote(device_id), shell_quote(&path));
    let out = exec
        .execute(&Target::Remote(assignment.server.clone()), &command)
        .with_context(|| format!("reading {} on {}", path, assignment.server))?;
    match out.code {
        0 => Ok(out.stdout),
        // grep found no lines for the device
        1 => Ok(String::new()),
        code => anyhow::bail!("reading {} on {} failed with exit status {}", path, assignment.server, code),
    }
}
