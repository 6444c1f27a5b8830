use std::fmt;
use std::sync::OnceLock;
use clap::{Parser, ValueEnum, ColorChoice, CommandFactory};
use clap_complete::Shell;
use is_terminal::IsTerminal;
use serde::{Deserialize, Serialize};
use crate::config::AppConfig;
use crate::content_view::{ContentViewSource, ViewLookup};
use crate::remote::Executor;
use crate::report::DiagnosticReport;
mod config;
mod content_view;
mod locate;
mod probe;
mod remote;
mod report;
mod session;

static ENABLE_COLOR: OnceLock<bool> = OnceLock::new();

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum OutputFmt { Text, Json }

#[derive(Clone, Copy, Debug, ValueEnum, Serialize, Deserialize)]
enum LogLevel { Error, Warn, Info, Debug, Trace }

#[derive(Clone, Copy, Debug, ValueEnum, Serialize, Deserialize)]
enum LogFormat { Text, Json }

#[derive(Parser, Debug)]
#[command(
    name = "acrdoctor",
    about = "ACR session diagnostics for a single device",
    long_about = "Finds the ACR server assigned to a device, checks that it answers, reconstructs the device's most recent ACR sessions from the server log and lists the matching content views.",
    after_long_help = "Examples:\n  acrdoctor --device 0123abcd\n  acrdoctor --device 0123abcd --loglevel debug\n  acrdoctor --device 0123abcd --output json --json-path report.json\n  acrdoctor --device 0123abcd --csv-path sessions.csv --progress",
    color = ColorChoice::Auto
)]
struct Args {
    /// Device ID to check
    #[arg(long)]
    device: Option<String>,
    #[arg(long, value_enum, default_value = "info")]
    loglevel: LogLevel,
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,
    #[arg(long)]
    log_path: Option<String>,
    #[arg(short = 'q', long, default_value_t = false)]
    quiet: bool,
    #[arg(long, short = 'o', value_enum)]
    output: Option<OutputFmt>,
    #[arg(long, short = 'j')]
    json_path: Option<String>,
    #[arg(long)]
    csv_path: Option<String>,
    #[arg(long, short = 'C', default_value_t = false)]
    no_color: bool,
    #[arg(long, default_value_t = false)]
    force_color: bool,
    #[arg(long, default_value_t = false)]
    progress: bool,
    /// Path to TOML config (default ./AcrDoctor.toml)
    #[arg(long)]
    config: Option<String>,
    #[arg(long, value_enum)]
    completions: Option<Shell>,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            device: None,
            loglevel: LogLevel::Info,
            log_format: None,
            log_path: None,
            quiet: false,
            output: None,
            json_path: None,
            csv_path: None,
            no_color: false,
            force_color: false,
            progress: false,
            config: None,
            completions: None,
        }
    }
}

#[derive(Debug)]
enum RunFailure {
    MissingDevice,
    NoServer { device: String },
    Unreachable { server: String },
    Fatal(anyhow::Error),
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunFailure::MissingDevice => write!(f, "Need a device id to check. Please use --device option."),
            RunFailure::NoServer { device } => write!(f, "Could not find ACR server for device {}.", device),
            RunFailure::Unreachable { server } => write!(f, "Ping to ACR server {} failed.", server),
            RunFailure::Fatal(e) => write!(f, "{:#}", e),
        }
    }
}

fn main() {
    let mut args = Args::parse();
    if let Some(sh) = args.completions {
        let mut cmd = Args::command();
        clap_complete::generate(sh, &mut cmd, "acrdoctor", &mut std::io::stdout());
        return;
    }
    init_logger(&args);
    let cfg = config::load_config(args.config.as_deref());
    apply_config(&mut args, &cfg);
    let term = std::env::var("TERM").unwrap_or_default();
    let no_color_env = std::env::var_os("NO_COLOR").is_some();
    let color_default = std::io::stdout().is_terminal() && !no_color_env && term != "dumb";
    let enable_color = if args.force_color { true } else { color_default && !args.no_color };
    let _ = ENABLE_COLOR.set(enable_color);
    let code = match run(&args, &cfg, &cfg.executor(), &cfg.content_views()) {
        Ok(_) => 0,
        Err(f) => { log::error!("{}", f); 1 }
    };
    finish(code)
}

fn init_logger(args: &Args) {
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
    if args.quiet {
        builder.filter_level(log::LevelFilter::Error);
    } else {
        let f = match args.loglevel { LogLevel::Error => log::LevelFilter::Error, LogLevel::Warn => log::LevelFilter::Warn, LogLevel::Info => log::LevelFilter::Info, LogLevel::Debug => log::LevelFilter::Debug, LogLevel::Trace => log::LevelFilter::Trace };
        builder.filter_level(f);
    }
    if let Some(fmt) = args.log_format {
        match fmt {
            LogFormat::Json => {
                builder.format(|buf, record| {
                    use std::io::Write;
                    let ts = chrono::Local::now().to_rfc3339();
                    let obj = serde_json::json!({
                        "ts": ts,
                        "level": record.level().to_string(),
                        "target": record.target(),
                        "msg": record.args().to_string(),
                    });
                    writeln!(buf, "{}", obj)
                });
            }
            LogFormat::Text => {
                builder.format(|buf, record| {
                    use std::io::Write;
                    let ts = chrono::Local::now().format("%H:%M:%S");
                    writeln!(buf, "[{:<5} {}] {}", record.level(), ts, record.args())
                });
            }
        }
    }
    if let Some(path) = args.log_path.as_ref() {
        match std::fs::File::create(path) {
            Ok(f) => { builder.target(env_logger::Target::Pipe(Box::new(f))); }
            Err(e) => { eprintln!("Failed to open log file {}: {}", path, e); }
        }
    }
    builder.init();
}

fn apply_config(args: &mut Args, cfg: &AppConfig) {
    if args.output.is_none() { args.output = cfg.output; }
    if args.csv_path.is_none() && let Some(v) = cfg.csv_path.as_ref() { args.csv_path = Some(v.clone()); }
    if args.json_path.is_none() && let Some(v) = cfg.json_path.as_ref() { args.json_path = Some(v.clone()); }
    if !args.progress && let Some(v) = cfg.progress { args.progress = v; }
}

/// Prints the closing banner for the exit status and leaves the process.
fn finish(code: i32) -> ! {
    if code == 0 {
        println!("{}", paint("Done: all checks completed.", "1;32"));
    } else {
        println!("{}", paint("Failed: the diagnostic could not complete.", "1;31"));
    }
    std::process::exit(code)
}

fn run<E: Executor, S: ContentViewSource>(args: &Args, cfg: &AppConfig, exec: &E, views: &S) -> Result<DiagnosticReport, RunFailure> {
    let device_id = args.device.as_deref().filter(|d| !d.trim().is_empty()).ok_or(RunFailure::MissingDevice)?;
    let text_mode = args.output.unwrap_or(OutputFmt::Text) == OutputFmt::Text;

    let assignment = locate::locate(exec, device_id, &cfg.locate_options())
        .ok_or_else(|| RunFailure::NoServer { device: device_id.to_string() })?;

    if !probe::probe(exec, &assignment.server, &cfg.probe_settings()) {
        return Err(RunFailure::Unreachable { server: assignment.server.clone() });
    }

    let pb = if args.progress { Some(indicatif::ProgressBar::new_spinner()) } else { None };
    if let Some(ref pb) = pb { pb.set_message(format!("Reading ACR log on {}", assignment.server)); pb.enable_steady_tick(std::time::Duration::from_millis(120)); }
    let log_text = session::fetch_session_log(exec, &assignment, device_id, &cfg.log_dir);
    if let Some(pb) = pb { pb.finish_and_clear(); }
    let log_text = log_text.map_err(RunFailure::Fatal)?;

    let sessions = session::correlate(&log_text, device_id, cfg.window());
    log::info!("Correlated {} session(s) for device {}", sessions.len(), device_id);
    if text_mode { report::print_sessions(device_id, &sessions); }
    if let Some(p) = args.csv_path.as_ref() {
        match report::write_csv(p, &sessions) {
            Ok(_) => log::info!("CSV written: {}", p),
            Err(e) => log::error!("CSV write failed for {}: {:#}", p, e),
        }
    }

    let lookup = content_view::lookup_views(views, device_id, sessions.len());
    if text_mode && let ViewLookup::Found(rows) = &lookup { report::print_views(rows); }

    let rep = DiagnosticReport {
        device_id: device_id.to_string(),
        assignment,
        reachable: true,
        sessions,
        content_views: lookup.records().to_vec(),
    };
    emit_json(args, &rep);
    Ok(rep)
}

fn emit_json(args: &Args, rep: &DiagnosticReport) {
    let json = match report::to_json(rep) {
        Ok(j) => j,
        Err(e) => { log::error!("JSON encoding failed: {:#}", e); return }
    };
    if let Some(p) = args.json_path.as_ref() {
        match std::fs::write(p, &json) {
            Ok(_) => log::info!("JSON written: {}", p),
            Err(e) => log::error!("JSON write failed for {}: {}", p, e),
        }
    } else if args.output == Some(OutputFmt::Json) {
        println!("{}", json);
    }
}

fn paint(s: &str, code: &str) -> String {
    if *ENABLE_COLOR.get().unwrap_or(&true) { format!("\x1b[{}m{}\x1b[0m", code, s) } else { s.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content_view::ContentViewRecord;
    use crate::remote::Target;
    use crate::remote::fake::FakeExecutor;
    use std::cell::Cell;

    struct CountingViews {
        rows: Vec<ContentViewRecord>,
        calls: Cell<usize>,
    }

    impl CountingViews {
        fn new(rows: Vec<ContentViewRecord>) -> Self { Self { rows, calls: Cell::new(0) } }
    }

    impl ContentViewSource for CountingViews {
        fn fetch_views(&self, _device_id: &str) -> anyhow::Result<Vec<ContentViewRecord>> {
            self.calls.set(self.calls.get() + 1);
            Ok(self.rows.clone())
        }
    }

    const STATUS: &str = "alphonsoalphacr9_alphonso_tv8042 online\nclient dev1\n";
    const LOG: &str = "[T1] acr session id X, device dev1, type = start\n\
        Got match token X-c-1 tag = AD1 content id = 500 station id = 7\n\
        [T2] acr session id X, device dev1, type = end\n";

    fn args(device: Option<&str>) -> Args {
        Args { device: device.map(|d| d.to_string()), output: Some(OutputFmt::Json), ..Default::default() }
    }

    fn healthy(log: &str) -> FakeExecutor {
        FakeExecutor::default()
            .reply(Target::Remote("prov1".to_string()), "show_servers_status", STATUS, 0)
            .reply(Target::Local, "ping", "", 0)
            .reply(Target::Remote("acr9".to_string()), "acr-8042.out", log, 0)
    }

    #[test]
    fn missing_device_fails_before_remote_work() {
        let exec = FakeExecutor::default();
        let views = CountingViews::new(vec![]);
        let res = run(&args(None), &AppConfig::default(), &exec, &views);
        assert!(matches!(res, Err(RunFailure::MissingDevice)));
        assert!(exec.calls.borrow().is_empty());
        assert!(matches!(run(&args(Some("  ")), &AppConfig::default(), &exec, &views), Err(RunFailure::MissingDevice)));
    }

    #[test]
    fn unknown_device_is_fatal() {
        let exec = FakeExecutor::default().reply(Target::Remote("prov".to_string()), "show_servers_status", STATUS, 0);
        let res = run(&args(Some("dev-unknown")), &AppConfig::default(), &exec, &CountingViews::new(vec![]));
        assert!(matches!(res, Err(RunFailure::NoServer { .. })));
    }

    #[test]
    fn failed_ping_stops_the_run() {
        let exec = FakeExecutor::default()
            .reply(Target::Remote("prov1".to_string()), "show_servers_status", STATUS, 0)
            .reply(Target::Local, "ping", "", 1);
        let res = run(&args(Some("dev1")), &AppConfig::default(), &exec, &CountingViews::new(vec![]));
        assert!(matches!(res, Err(RunFailure::Unreachable { ref server }) if server == "acr9"));
        assert!(!exec.calls.borrow().iter().any(|(_, c)| c.contains("grep")));
    }

    #[test]
    fn full_run_collects_sessions_and_views() {
        let views = CountingViews::new(vec![ContentViewRecord { session_id: "X".to_string(), ..Default::default() }]);
        let rep = run(&args(Some("dev1")), &AppConfig::default(), &healthy(LOG), &views).unwrap();
        assert_eq!(rep.assignment.port, 8042);
        assert_eq!(rep.sessions.len(), 1);
        assert_eq!(rep.sessions[0].end_time, "T2");
        assert_eq!(rep.sessions[0].tag, "AD1");
        assert_eq!(rep.content_views.len(), 1);
        assert_eq!(views.calls.get(), 1);
    }

    #[test]
    fn no_sessions_never_queries_content_views() {
        let views = CountingViews::new(vec![]);
        let rep = run(&args(Some("dev1")), &AppConfig::default(), &healthy("[T9] session id Y, x, type = end\n"), &views).unwrap();
        assert!(rep.sessions.is_empty());
        assert_eq!(views.calls.get(), 0);
    }

    #[test]
    fn unreadable_log_fails_the_run() {
        let exec = FakeExecutor::default()
            .reply(Target::Remote("prov1".to_string()), "show_servers_status", STATUS, 0)
            .reply(Target::Local, "ping", "", 0)
            .reply(Target::Remote("acr9".to_string()), "acr-8042.out", "", 2);
        let views = CountingViews::new(vec![]);
        let res = run(&args(Some("dev1")), &AppConfig::default(), &exec, &views);
        assert!(matches!(res, Err(RunFailure::Fatal(_))));
        assert_eq!(views.calls.get(), 0);
    }

    #[test]
    fn failure_messages_are_descriptive() {
        assert!(RunFailure::MissingDevice.to_string().contains("--device"));
        assert!(RunFailure::NoServer { device: "d1".to_string() }.to_string().contains("d1"));
        assert!(RunFailure::Unreachable { server: "acr9".to_string() }.to_string().contains("acr9"));
    }

    #[test]
    fn cli_values_beat_config() {
        let mut a = Args { output: Some(OutputFmt::Text), ..Default::default() };
        let cfg = AppConfig { output: Some(OutputFmt::Json), csv_path: Some("s.csv".to_string()), progress: Some(true), ..Default::default() };
        apply_config(&mut a, &cfg);
        assert_eq!(a.output, Some(OutputFmt::Text));
        assert_eq!(a.csv_path.as_deref(), Some("s.csv"));
        assert!(a.progress);
    }

    #[test]
    fn args_parse_device_and_loglevel() {
        let a = Args::try_parse_from(["acrdoctor", "--device", "abc", "--loglevel", "debug"]).unwrap();
        assert_eq!(a.device.as_deref(), Some("abc"));
        assert!(matches!(a.loglevel, LogLevel::Debug));
        let d = Args::try_parse_from(["acrdoctor"]).unwrap();
        assert!(matches!(d.loglevel, LogLevel::Info));
        assert!(d.device.is_none());
    }
}
