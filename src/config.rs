use crate::content_view::HttpContentViews;
use crate::locate::LocateOptions;
use crate::probe::ProbeSettings;
use crate::remote::ShellExecutor;
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "AcrDoctor.toml";

/// Settings read from the TOML file. Every key is optional.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Queried in order; the first entry is the primary directory host.
    pub directory_hosts: Vec<String>,
    pub domain: String,
    pub ssh_user: String,
    pub ssh_connect_timeout_secs: u64,
    pub status_command: String,
    pub status_context_lines: usize,
    pub log_dir: String,
    pub probe_count: u32,
    pub probe_interval_secs: f64,
    pub probe_payload_bytes: u32,
    pub window_size: usize,
    pub content_view_url: String,
    pub content_view_limit: usize,
    pub http_timeout_secs: u64,
    pub output: Option<crate::OutputFmt>,
    pub csv_path: Option<String>,
    pub json_path: Option<String>,
    pub progress: Option<bool>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            directory_hosts: ["prov", "prov1", "prov2", "prov3"].iter().map(|s| s.to_string()).collect(),
            domain: "alphonso.tv".to_string(),
            ssh_user: "alpha".to_string(),
            ssh_connect_timeout_secs: 10,
            status_command: "show_servers_status".to_string(),
            status_context_lines: 2000,
            log_dir: "/mnt/alpha/var/log/pm2".to_string(),
            probe_count: 10,
            probe_interval_secs: 0.2,
            probe_payload_bytes: 2048,
            window_size: crate::session::DEFAULT_WINDOW,
            content_view_url: "http://fh.alphonso.tv/device_views".to_string(),
            content_view_limit: 10,
            http_timeout_secs: 30,
            output: None,
            csv_path: None,
            json_path: None,
            progress: None,
        }
    }
}

impl AppConfig {
    pub fn executor(&self) -> ShellExecutor {
        ShellExecutor { user: self.ssh_user.clone(), domain: self.domain.clone(), connect_timeout_secs: self.ssh_connect_timeout_secs }
    }

    pub fn locate_options(&self) -> LocateOptions {
        LocateOptions {
            directory_hosts: self.directory_hosts.clone(),
            domain: self.domain.clone(),
            status_command: self.status_command.clone(),
            context_lines: self.status_context_lines,
        }
    }

    pub fn probe_settings(&self) -> ProbeSettings {
        ProbeSettings { count: self.probe_count, interval_secs: self.probe_interval_secs, payload_bytes: self.probe_payload_bytes, domain: self.domain.clone() }
    }

    pub fn content_views(&self) -> HttpContentViews {
        HttpContentViews::new(&self.content_view_url, self.content_view_limit, self.http_timeout_secs)
    }

    pub fn window(&self) -> usize { self.window_size.max(1) }
}

pub fn parse_config(text: &str) -> Result<AppConfig, toml::de::Error> { toml::from_str(text) }

/// Explicit path first, then `ACRDOCTOR_CONFIG`, then `AcrDoctor.toml` in the working directory.
pub fn load_config(path_opt: Option<&str>) -> AppConfig {
    let explicit = path_opt.map(|s| s.to_string()).or_else(|| std::env::var("ACRDOCTOR_CONFIG").ok());
    let path = explicit.clone().unwrap_or_else(|| DEFAULT_CONFIG_FILE.to_string());
    let text = match std::fs::read_to_string(&path) {
        Ok(t) => t,
        Err(e) => {
            if explicit.is_some() { log::warn!("Failed to read config file {}: {}", path, e); }
            return AppConfig::default();
        }
    };
    match parse_config(&text) {
        Ok(cfg) => { log::debug!("Loaded config from {}", path); cfg }
        Err(e) => { log::warn!("Failed to parse config file {}: {}", path, e); AppConfig::default() }
    }
}
