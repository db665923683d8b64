//! Process spawning with a hard deadline and tree-wide kill.

use std::ffi::{OsStr, OsString};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Captured result of a tool invocation that ran to a normal exit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    /// Merged standard output and standard error.
    pub text: String,
    /// Process exit code.
    pub status: i32,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// A fully described tool invocation: program, arguments, working
/// directory, and any environment entries the child needs. Configuration
/// reaches the child only through this value, never through mutation of
/// the parent's environment.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<OsString>,
    envs: Vec<(String, String)>,
    current_dir: Option<PathBuf>,
}

impl ToolCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            current_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        for arg in args {
            self.args.push(arg.as_ref().to_os_string());
        }
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn arg_list(&self) -> &[OsString] {
        &self.args
    }

    fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }
        command
    }
}

/// Runs external tools under a hard deadline.
///
/// `None` is the no-result sentinel: the tool could not be spawned,
/// exceeded the timeout, or died on a signal. A normal exit with a
/// non-zero code still yields `Some`, since several checks need the
/// diagnostic text of a failing compile.
pub trait ToolRunner: Send + Sync {
    fn run(&self, command: &ToolCommand, timeout: Duration) -> Option<ToolOutput>;
}

/// Platform-appropriate runner.
pub fn default_runner() -> Box<dyn ToolRunner> {
    #[cfg(unix)]
    return Box::new(UnixRunner);
    #[cfg(windows)]
    return Box::new(WindowsRunner);
}

/// Unix runner. The child leads a new process group so a timeout kill
/// reaches every descendant, not just the immediate child.
#[cfg(unix)]
pub struct UnixRunner;

#[cfg(unix)]
impl ToolRunner for UnixRunner {
    fn run(&self, command: &ToolCommand, timeout: Duration) -> Option<ToolOutput> {
        use std::os::unix::process::CommandExt;

        let mut spawned = command.to_command();
        spawned.process_group(0);
        let child = match spawned.spawn() {
            Ok(child) => child,
            Err(err) => {
                warn!(program = %command.program().display(), %err, "failed to spawn tool");
                return None;
            }
        };
        wait_bounded(child, timeout, |child| {
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;

            let _ = killpg(Pid::from_raw(child.id() as i32), Signal::SIGKILL);
        })
    }
}

/// Windows runner. No process groups; `taskkill /T` walks the tree.
#[cfg(windows)]
pub struct WindowsRunner;

#[cfg(windows)]
impl ToolRunner for WindowsRunner {
    fn run(&self, command: &ToolCommand, timeout: Duration) -> Option<ToolOutput> {
        let child = match command.to_command().spawn() {
            Ok(child) => child,
            Err(err) => {
                warn!(program = %command.program().display(), %err, "failed to spawn tool");
                return None;
            }
        };
        wait_bounded(child, timeout, |child| {
            let _ = Command::new("taskkill")
                .args(["/F", "/T", "/PID", &child.id().to_string()])
                .output();
        })
    }
}

fn wait_bounded(
    mut child: Child,
    timeout: Duration,
    kill_tree: impl Fn(&mut Child),
) -> Option<ToolOutput> {
    let Some(stdout) = child.stdout.take() else {
        let _ = child.kill();
        let _ = child.wait();
        return None;
    };
    let Some(stderr) = child.stderr.take() else {
        let _ = child.kill();
        let _ = child.wait();
        return None;
    };
    // Drain both pipes from dedicated threads; a full pipe would otherwise
    // deadlock the child against our wait loop.
    let stdout = capture(stdout);
    let stderr = capture(stderr);

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {}
            Err(err) => {
                warn!(%err, "waiting on tool failed");
                kill_tree(&mut child);
                let _ = child.wait();
                return None;
            }
        }
        if Instant::now() >= deadline {
            debug!(timeout_secs = timeout.as_secs(), "tool timed out");
            kill_tree(&mut child);
            let _ = child.wait();
            let _ = stdout.join();
            let _ = stderr.join();
            return None;
        }
        thread::sleep(POLL_INTERVAL);
    };

    let mut text = stdout.join().unwrap_or_default();
    text.push_str(&stderr.join().unwrap_or_default());

    // Signal death carries no exit code; report it like a timeout.
    let code = status.code()?;
    Some(ToolOutput { text, status: code })
}

fn capture<R: Read + Send + 'static>(mut stream: R) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut bytes = Vec::new();
        let _ = stream.read_to_end(&mut bytes);
        String::from_utf8_lossy(&bytes).into_owned()
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> ToolCommand {
        ToolCommand::new("/bin/sh").args(["-c", script])
    }

    #[test]
    fn captures_output_and_status() {
        let output = UnixRunner
            .run(&sh("echo out; echo err >&2"), Duration::from_secs(10))
            .expect("shell should complete");
        assert!(output.success());
        assert!(output.text.contains("out"));
        assert!(output.text.contains("err"));
    }

    #[test]
    fn nonzero_exit_still_yields_output() {
        let output = UnixRunner
            .run(&sh("echo diag; exit 3"), Duration::from_secs(10))
            .expect("shell should complete");
        assert_eq!(output.status, 3);
        assert!(output.text.contains("diag"));
    }

    #[test]
    fn timeout_reports_no_result() {
        let start = Instant::now();
        let output = UnixRunner.run(&sh("sleep 30"), Duration::from_millis(200));
        assert!(output.is_none());
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn spawn_failure_reports_no_result() {
        let command = ToolCommand::new("/nonexistent/cltriage-tool");
        assert!(UnixRunner.run(&command, Duration::from_secs(1)).is_none());
    }

    #[test]
    fn explicit_env_reaches_child() {
        let command = sh("printf '%s' \"$CLTRIAGE_PROBE\"").env("CLTRIAGE_PROBE", "42");
        let output = UnixRunner
            .run(&command, Duration::from_secs(10))
            .expect("shell should complete");
        assert_eq!(output.text, "42");
    }

    #[test]
    fn current_dir_applies() {
        let command = sh("pwd").current_dir("/");
        let output = UnixRunner
            .run(&command, Duration::from_secs(10))
            .expect("shell should complete");
        assert_eq!(output.text.trim(), "/");
    }
}
