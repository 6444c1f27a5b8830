use crate::content_view::ContentViewRecord;
use crate::locate::ServerAssignment;
use crate::session::SessionRecord;
use comfy_table::{ContentArrangement, Table};
use serde::Serialize;

pub const SESSION_COLUMNS: [&str; 6] = ["Session ID", "Start", "End", "Tag", "Station", "Content"];
pub const VIEW_COLUMNS: [&str; 6] = ["Session ID", "Type", "Title", "Station", "Start", "End"];

#[derive(Clone, Debug, Serialize)]
pub struct DiagnosticReport {
    pub device_id: String,
    pub assignment: ServerAssignment,
    pub reachable: bool,
    pub sessions: Vec<SessionRecord>,
    pub content_views: Vec<ContentViewRecord>,
}

pub fn render_table(columns: &[&str], rows: &[Vec<String>]) -> String {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(columns.iter().map(|c| crate::paint(c, "1")).collect::<Vec<String>>());
    for r in rows { table.add_row(r.clone()); }
    table.to_string()
}

pub fn session_rows(sessions: &[SessionRecord]) -> Vec<Vec<String>> {
    sessions
        .iter()
        .map(|s| vec![s.session_id.clone(), s.start_time.clone(), s.end_time.clone(), s.tag.clone(), s.station_id.clone(), s.content_id.clone()])
        .collect()
}

pub fn view_rows(views: &[ContentViewRecord]) -> Vec<Vec<String>> {
    views
        .iter()
        .map(|v| vec![v.session_id.clone(), v.lookup_type.clone(), v.title.clone(), v.station.clone(), v.start_first.clone(), v.end_last.clone()])
        .collect()
}

pub fn print_sessions(device_id: &str, sessions: &[SessionRecord]) {
    log::debug!("Preparing report for device {}...", device_id);
    println!("{}", crate::paint(&format!("ACR sessions for device {}:", device_id), "1;36"));
    println!("{}", render_table(&SESSION_COLUMNS, &session_rows(sessions)));
}

pub fn print_views(views: &[ContentViewRecord]) {
    println!("{}", crate::paint("Content Views for device:", "1;36"));
    println!("{}", render_table(&VIEW_COLUMNS, &view_rows(views)));
}

pub fn write_csv(path: &str, sessions: &[SessionRecord]) -> anyhow::Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;
    wtr.write_record(["session_id", "start_time", "end_time", "tag", "station_id", "content_id"])?;
    for row in session_rows(sessions) { wtr.write_record(&row)?; }
    wtr.flush()?;
    Ok(())
}

pub fn to_json(report: &DiagnosticReport) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(report)?)
}
