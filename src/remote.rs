use anyhow::Context;
use std::process::Command;

/// Where a command runs: the local shell, or a host reached over ssh.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Target {
    Local,
    Remote(String),
}

#[derive(Clone, Debug, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool { self.code == 0 }
}

/// Runs one command and captures its stdout and exit status.
pub trait Executor {
    fn execute(&self, target: &Target, command: &str) -> anyhow::Result<CommandOutput>;
}

/// `Remote(host)` is expanded to `<user>@<host>.<domain>` and run through ssh;
/// `Local` goes through `sh -c`.
#[derive(Clone, Debug)]
pub struct ShellExecutor {
    pub user: String,
    pub domain: String,
    pub connect_timeout_secs: u64,
}

impl ShellExecutor {
    pub fn host_name(&self, host: &str) -> String { qualify(host, &self.domain) }

    fn command_for(&self, target: &Target, command: &str) -> Command {
        match target {
            Target::Local => {
                let mut c = Command::new("sh");
                c.arg("-c").arg(command);
                c
            }
            Target::Remote(host) => {
                let mut c = Command::new("ssh");
                c.arg("-q")
                    .arg("-o").arg("BatchMode=yes")
                    .arg("-o").arg(format!("ConnectTimeout={}", self.connect_timeout_secs))
                    .arg(format!("{}@{}", self.user, self.host_name(host)))
                    .arg(command);
                c
            }
        }
    }
}

impl Executor for ShellExecutor {
    fn execute(&self, target: &Target, command: &str) -> anyhow::Result<CommandOutput> {
        log::trace!("exec {:?}: {}", target, command);
        let out = self.command_for(target, command)
            .output()
            .with_context(|| format!("failed to run `{}` on {:?}", command, target))?;
        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
            // killed by a signal
            code: out.status.code().unwrap_or(-1),
        })
    }
}

/// Single-quotes `s` for a POSIX shell, so it reaches the command as one word.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

pub fn qualify(host: &str, domain: &str) -> String {
    if domain.is_empty() || host.ends_with(domain) { host.to_string() } else { format!("{}.{}", host, domain) }
}
