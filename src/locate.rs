use crate::remote::{qualify, shell_quote, Executor, Target};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Which ACR server and port handle a device.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerAssignment {
    pub server: String,
    pub port: u16,
}

#[derive(Clone, Debug)]
pub struct LocateOptions {
    pub directory_hosts: Vec<String>,
    pub domain: String,
    pub status_command: String,
    pub context_lines: usize,
}

fn assignment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"alphonsoalph([^_]+)_alphonso_tv(\d+)").expect("static regex"))
}

/// Picks the last `acr` line that sits within `context` lines before (or on) a line mentioning the device.
pub fn assignment_line<'a>(status: &'a str, device_id: &str, context: usize) -> Option<&'a str> {
    let lines: Vec<&str> = status.lines().collect();
    let hits: Vec<usize> = lines.iter().enumerate().filter(|(_, l)| l.contains(device_id)).map(|(i, _)| i).collect();
    let last_hit = *hits.last()?;
    (0..=last_hit).rev()
        .filter(|&i| lines[i].contains("acr"))
        .find(|&i| hits.iter().any(|&h| h >= i && h - i <= context))
        .map(|i| lines[i])
}

pub fn parse_assignment(line: &str) -> Option<ServerAssignment> {
    let caps = assignment_re().captures(line)?;
    let port = caps.get(2)?.as_str().parse::<u16>().ok()?;
    Some(ServerAssignment { server: caps.get(1)?.as_str().to_string(), port })
}

fn query_host<E: Executor>(exec: &E, host: &str, device_id: &str, opts: &LocateOptions) -> Option<ServerAssignment> {
    log::debug!("Checking directory host {} for device {}...", host, device_id);
    let out = match exec.execute(&Target::Remote(host.to_string()), &opts.status_command) {
        Ok(o) => o,
        Err(e) => { log::debug!("Directory host {} unavailable: {:#}", host, e); return None }
    };
    if !out.success() {
        log::debug!("Directory host {} exited with status {}", host, out.code);
        return None;
    }
    assignment_line(&out.stdout, device_id, opts.context_lines).and_then(parse_assignment)
}

/// Asks each directory host in order; the first one with an assignment wins.
pub fn locate<E: Executor>(exec: &E, device_id: &str, opts: &LocateOptions) -> Option<ServerAssignment> {
    let primary = opts.directory_hosts.first();
    for host in &opts.directory_hosts {
        let Some(a) = query_host(exec, host, device_id, opts) else { continue };
        log::info!("Device on {} assigned to ACR server: {}, port: {}.", host, a.server, a.port);
        if Some(host) == primary { log_primary_address(exec, host, &opts.domain); }
        return Some(a);
    }
    None
}

fn log_primary_address<E: Executor>(exec: &E, host: &str, domain: &str) {
    match exec.execute(&Target::Local, &format!("host {}", shell_quote(&qualify(host, domain)))) {
        Ok(out) => {
            if let Some(first) = out.stdout.lines().next() { log::info!("{}", first.trim()); }
        }
        Err(e) => log::debug!("Address lookup for {} failed: {:#}", host, e),
    }
}
