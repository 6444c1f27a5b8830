use crate::remote::{qualify, shell_quote, Executor, Target};

#[derive(Clone, Debug)]
pub struct ProbeSettings {
    pub count: u32,
    pub interval_secs: f64,
    pub payload_bytes: u32,
    pub domain: String,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self { count: 10, interval_secs: 0.2, payload_bytes: 2048, domain: "alphonso.tv".to_string() }
    }
}

pub fn ping_command(server: &str, s: &ProbeSettings) -> String {
    format!("ping -i {} -c {} -s {} {}", s.interval_secs, s.count, s.payload_bytes, shell_quote(&qualify(server, &s.domain)))
}

/// One ping burst against the server. Pass means exit status 0; there is no retry.
pub fn probe<E: Executor>(exec: &E, server: &str, settings: &ProbeSettings) -> bool {
    log::debug!("Pinging ACR server {}...", server);
    match exec.execute(&Target::Local, &ping_command(server, settings)) {
        Ok(out) if out.success() => {
            log::info!("ACR server {} is alive and reachable.", server);
            true
        }
        Ok(out) => {
            log::debug!("ping exited with status {}", out.code);
            false
        }
        Err(e) => {
            log::debug!("ping could not be run: {:#}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::fake::FakeExecutor;

    #[test]
    fn command_carries_count_interval_and_size() {
        assert_eq!(ping_command("acr9", &ProbeSettings::default()), "ping -i 0.2 -c 10 -s 2048 'acr9.alphonso.tv'");
    }

    #[test]
    fn zero_exit_is_reachable() {
        let exec = FakeExecutor::default().reply(Target::Local, "ping", "10 packets received", 0);
        assert!(probe(&exec, "acr9", &ProbeSettings::default()));
        assert_eq!(exec.calls.borrow().len(), 1);
    }

    #[test]
    fn nonzero_exit_or_spawn_error_fails_once() {
        let exec = FakeExecutor::default().reply(Target::Local, "ping", "100% packet loss", 1);
        assert!(!probe(&exec, "acr9", &ProbeSettings::default()));
        assert_eq!(exec.calls.borrow().len(), 1);
        let none = FakeExecutor::default();
        assert!(!probe(&none, "acr9", &ProbeSettings::default()));
    }
}
