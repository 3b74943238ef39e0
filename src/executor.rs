use std::fmt;
use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use anyhow::Context;
use serde::Serialize;
use crate::classifier::Classifier;
use crate::hosts;
use crate::record::ApplicationRecord;
use crate::rewriter::command_line;

/// Exit code recorded when a process could not be started or did not finish.
pub const LAUNCH_FAILED: i32 = -1;

const REMOTE_EXIT_MARKER: &str = "EXITCODE=";

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum ExecStatus {
    Exited,
    DryRun,
    TimedOut,
    LaunchFailed(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ExecOutcome {
    pub exit_code: i32,
    pub status: ExecStatus,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Target {
    Local,
    Remote(String),
}

impl Target {
    pub fn for_host(host: &str) -> Self { if hosts::is_local(host) { Target::Local } else { Target::Remote(host.trim().to_string()) } }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { match self { Target::Local => f.write_str("local host"), Target::Remote(h) => f.write_str(h) } }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LaunchResult {
    Exited(i32),
    TimedOut,
}

pub trait Launcher {
    fn launch(&self, executable: &str, arguments: &str, target: &Target, timeout: Option<Duration>) -> anyhow::Result<LaunchResult>;
}

/// Spawns real processes: directly for the local host, through PowerShell remoting otherwise.
pub struct ProcessLauncher;

impl Launcher for ProcessLauncher {
    fn launch(&self, executable: &str, arguments: &str, target: &Target, timeout: Option<Duration>) -> anyhow::Result<LaunchResult> {
        match target {
            Target::Local => {
                let mut child = local_command(executable, arguments).spawn().with_context(|| format!("launching {}", executable))?;
                Ok(match wait(&mut child, timeout)? {
                    Some(st) => LaunchResult::Exited(st.code().unwrap_or(LAUNCH_FAILED)),
                    None => LaunchResult::TimedOut,
                })
            }
            Target::Remote(host) => {
                let mut cmd = Command::new("powershell");
                cmd.args(["-NoProfile", "-NonInteractive", "-Command", &remote_script(host, executable, arguments)]);
                let Some(out) = run_captured(cmd, timeout).context("launching powershell for remote execution")? else { return Ok(LaunchResult::TimedOut) };
                match parse_remote_exit(&out.stdout) {
                    Some(code) => Ok(LaunchResult::Exited(code)),
                    None => anyhow::bail!("remote execution on {} returned no exit code (powershell exit {:?}): {}", host, out.status.code(), out.stderr.trim()),
                }
            }
        }
    }
}

struct Captured {
    status: ExitStatus,
    stdout: String,
    stderr: String,
}

fn drain<R: Read + Send + 'static>(mut r: R) -> JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Err(e) = r.read_to_end(&mut buf) { log::debug!("reading child output failed: {}", e); }
        buf
    })
}

/// Spawns with piped output that is read concurrently, so a chatty child cannot block on a full pipe.
/// `Ok(None)` on timeout.
fn run_captured(mut cmd: Command, timeout: Option<Duration>) -> anyhow::Result<Option<Captured>> {
    let mut child = cmd.stdout(Stdio::piped()).stderr(Stdio::piped()).spawn()?;
    let out = child.stdout.take().map(drain);
    let err = child.stderr.take().map(drain);
    let Some(status) = wait(&mut child, timeout)? else { return Ok(None) };
    let collect = |h: Option<JoinHandle<Vec<u8>>>| h.and_then(|h| h.join().ok()).map(|b| String::from_utf8_lossy(&b).into_owned()).unwrap_or_default();
    Ok(Some(Captured { status, stdout: collect(out), stderr: collect(err) }))
}

#[cfg(windows)]
fn local_command(executable: &str, arguments: &str) -> Command {
    use std::os::windows::process::CommandExt;
    let mut cmd = Command::new(executable);
    // passed verbatim
    if !arguments.trim().is_empty() { cmd.raw_arg(arguments); }
    cmd
}

#[cfg(not(windows))]
fn local_command(executable: &str, arguments: &str) -> Command {
    let mut cmd = Command::new(executable);
    cmd.args(split_args(arguments));
    cmd
}

/// Whitespace split that keeps double-quoted runs together and drops the quotes.
#[cfg(any(not(windows), test))]
fn split_args(s: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut cur = String::new();
    let mut in_quotes = false;
    let mut started = false;
    for ch in s.chars() {
        match ch {
            '"' => { in_quotes = !in_quotes; started = true; }
            c if c.is_whitespace() && !in_quotes => {
                if started { out.push(std::mem::take(&mut cur)); started = false; }
            }
            c => { cur.push(c); started = true; }
        }
    }
    if started { out.push(cur); }
    out
}

fn wait(child: &mut Child, timeout: Option<Duration>) -> anyhow::Result<Option<ExitStatus>> {
    let Some(limit) = timeout else { return Ok(Some(child.wait()?)) };
    let start = Instant::now();
    loop {
        if let Some(st) = child.try_wait()? { return Ok(Some(st)); }
        if start.elapsed() >= limit {
            if let Err(e) = child.kill() { log::debug!("kill after timeout failed: {}", e); }
            let _ = child.wait();
            return Ok(None);
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}

fn ps_quote(s: &str) -> String { format!("'{}'", s.replace('\'', "''")) }

fn remote_script(host: &str, executable: &str, arguments: &str) -> String {
    format!(
        "$ErrorActionPreference = 'Stop'; $c = Invoke-Command -ComputerName {} -ScriptBlock {{ param($e, $a) if ($a) {{ $p = Start-Process -FilePath $e -ArgumentList $a -Wait -PassThru }} else {{ $p = Start-Process -FilePath $e -Wait -PassThru }}; $p.ExitCode }} -ArgumentList {}, {}; Write-Output \"{}$c\"",
        ps_quote(host), ps_quote(executable), ps_quote(arguments), REMOTE_EXIT_MARKER
    )
}

fn parse_remote_exit(stdout: &str) -> Option<i32> {
    stdout.lines().rev().find_map(|l| l.trim().strip_prefix(REMOTE_EXIT_MARKER)).and_then(|v| v.trim().parse().ok())
}

pub struct Executor {
    launcher: Box<dyn Launcher>,
    dry_run: bool,
    timeout: Option<Duration>,
}

impl Executor {
    pub fn new(launcher: Box<dyn Launcher>, dry_run: bool, timeout: Option<Duration>) -> Self { Self { launcher, dry_run, timeout } }

    pub fn execute(&self, executable: &str, arguments: &str, target: &Target) -> ExecOutcome {
        let cmd = command_line(executable, arguments);
        if self.dry_run {
            if executable.trim().is_empty() { log::warn!("[dry-run] {:?} has no executable and would fail to launch", cmd); }
            log::info!("[dry-run] {} on {}", cmd, target);
            return ExecOutcome { exit_code: 0, status: ExecStatus::DryRun };
        }
        if executable.trim().is_empty() {
            log::warn!("Cannot run {:?}: no executable found", cmd);
            return ExecOutcome { exit_code: LAUNCH_FAILED, status: ExecStatus::LaunchFailed("no executable in command".to_string()) };
        }
        log::info!("Running {} on {}", cmd, target);
        match self.launcher.launch(executable, arguments, target, self.timeout) {
            Ok(LaunchResult::Exited(code)) => {
                if code == 0 { log::info!("{} exited with 0", executable); } else { log::warn!("{} exited with {}", executable, code); }
                ExecOutcome { exit_code: code, status: ExecStatus::Exited }
            }
            Ok(LaunchResult::TimedOut) => {
                log::warn!("{} on {} timed out and was killed", executable, target);
                ExecOutcome { exit_code: LAUNCH_FAILED, status: ExecStatus::TimedOut }
            }
            Err(e) => {
                log::warn!("Launch of {} on {} failed: {:#}", executable, target, e);
                ExecOutcome { exit_code: LAUNCH_FAILED, status: ExecStatus::LaunchFailed(format!("{:#}", e)) }
            }
        }
    }

    /// Runs an arbitrary uninstall command line as given; `classifier` only locates the executable.
    pub fn execute_raw(&self, raw: &str, classifier: &Classifier, target: &Target) -> ExecOutcome {
        let split = classifier.split(raw);
        self.execute(&split.executable, &split.arguments, target)
    }

    /// Sequential batch; each record receives its exit code.
    pub fn uninstall_records(&self, records: &mut [ApplicationRecord]) -> Vec<ExecOutcome> {
        let mut out = Vec::with_capacity(records.len());
        for r in records.iter_mut() {
            log::info!("Uninstalling {} {} on {}", r.name, r.version, r.host);
            let outcome = self.execute(&r.silent.executable, &r.silent.arguments, &Target::for_host(&r.host));
            r.exit_code = Some(outcome.exit_code);
            out.push(outcome);
        }
        out
    }
}
