//! Running make inside the firmware mirror.
//!
//! Output from both pipes is relayed line by line as a quoted transcript:
//!
//! ```text
//! ┎─
//! ┃ Compiling: keyboards/hermit/0a1b2c3d/0a1b2c3d.c   [OK]
//! ┖─
//! ```

use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::signal::{CancelFlag, EXIT_CODE_CANCELLED};
use crate::target::BuildTarget;

/// Default program name.
pub const DEFAULT_MAKE: &str = "make";

const TRANSCRIPT_HEADER: &str = "┎─";
const TRANSCRIPT_PREFIX: &str = "┃ ";
const TRANSCRIPT_FOOTER: &str = "┖─";

/// How often the child is polled for exit or cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("failed to spawn `{program}` in {cwd}: {source}")]
    Spawn {
        program: String,
        cwd: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed waiting for `{program}`: {source}")]
    Wait {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to relay build output: {0}")]
    Relay(#[source] io::Error),
}

/// A make command ready to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MakeInvocation {
    pub program: String,
    /// First argument: the colon-joined target.
    pub target: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
}

impl MakeInvocation {
    pub fn new(program: impl Into<String>, target: &BuildTarget, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            target: target.target_string(),
            args: target.make_args.clone(),
            cwd: cwd.into(),
        }
    }

    /// Arguments after the program name.
    pub fn argv(&self) -> Vec<&str> {
        std::iter::once(self.target.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect()
    }

    /// Shell-quoted command line, for logs and dry runs.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.argv())
            .map(shell_quote)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn shell_quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=+,@%".contains(c));
    if plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// Writes a quoted transcript of a build's output.
#[derive(Debug)]
pub struct TranscriptRelay<W> {
    out: W,
}

impl<W: Write> TranscriptRelay<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn header(&mut self) -> io::Result<()> {
        writeln!(self.out, "{}", TRANSCRIPT_HEADER)?;
        self.out.flush()
    }

    pub fn line(&mut self, line: &str) -> io::Result<()> {
        writeln!(self.out, "{}{}", TRANSCRIPT_PREFIX, line)?;
        self.out.flush()
    }

    pub fn footer(&mut self) -> io::Result<()> {
        writeln!(self.out, "{}", TRANSCRIPT_FOOTER)?;
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

/// Result of a completed (or cancelled) build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BuildOutcome {
    pub exit_code: i32,
    pub cancelled: bool,
}

impl BuildOutcome {
    pub fn success(&self) -> bool {
        !self.cancelled && self.exit_code == 0
    }
}

/// Runs make invocations, honouring a cancel flag.
#[derive(Debug, Clone)]
pub struct BuildRunner {
    cancel: CancelFlag,
    poll_interval: Duration,
}

impl BuildRunner {
    pub fn new(cancel: CancelFlag) -> Self {
        Self {
            cancel,
            poll_interval: POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Run `invocation`, relaying output to stdout.
    pub fn run(&self, invocation: &MakeInvocation) -> Result<BuildOutcome, RunnerError> {
        let (outcome, _) = self.run_with_output(invocation, io::stdout())?;
        Ok(outcome)
    }

    /// Run `invocation`, relaying output to `out`, and hand `out` back.
    pub fn run_with_output<W: Write + Send>(
        &self,
        invocation: &MakeInvocation,
        out: W,
    ) -> Result<(BuildOutcome, W), RunnerError> {
        tracing::debug!("make command: `{}`", invocation.command_line());

        let mut child = Command::new(&invocation.program)
            .args(invocation.argv())
            .current_dir(&invocation.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| RunnerError::Spawn {
                program: invocation.program.clone(),
                cwd: invocation.cwd.clone(),
                source,
            })?;

        let relay = Mutex::new(TranscriptRelay::new(out));
        lock(&relay).header().map_err(RunnerError::Relay)?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let (waited, relayed) = thread::scope(|scope| {
            let readers: Vec<_> = [
                stdout.map(|s| Box::new(s) as Box<dyn Read + Send>),
                stderr.map(|s| Box::new(s) as Box<dyn Read + Send>),
            ]
            .into_iter()
            .flatten()
            .map(|stream| {
                let relay = &relay;
                scope.spawn(move || relay_lines(stream, relay))
            })
            .collect();

            let waited = self.wait_for(&mut child, &invocation.program);

            let mut relayed = Ok(());
            for reader in readers {
                match reader.join() {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => relayed = Err(e),
                    Err(_) => {
                        relayed = Err(io::Error::new(io::ErrorKind::Other, "output reader panicked"))
                    }
                }
            }
            (waited, relayed)
        });

        let (status, cancelled) = waited?;
        relayed.map_err(RunnerError::Relay)?;

        let mut relay = relay.into_inner().unwrap_or_else(|e| e.into_inner());
        relay.footer().map_err(RunnerError::Relay)?;

        let exit_code = if cancelled {
            EXIT_CODE_CANCELLED
        } else {
            status.code().unwrap_or(1)
        };
        tracing::debug!("make exited with code {} (cancelled: {})", exit_code, cancelled);

        Ok((BuildOutcome { exit_code, cancelled }, relay.into_inner()))
    }

    fn wait_for(&self, child: &mut Child, program: &str) -> Result<(ExitStatus, bool), RunnerError> {
        let wait_error = |source| RunnerError::Wait {
            program: program.to_string(),
            source,
        };
        loop {
            if self.cancel.is_cancelled() {
                tracing::info!("cancelling `{}`", program);
                // already exited is fine, wait() below reaps it either way
                let _ = child.kill();
                let status = child.wait().map_err(wait_error)?;
                return Ok((status, true));
            }
            match child.try_wait().map_err(wait_error)? {
                Some(status) => return Ok((status, false)),
                None => thread::sleep(self.poll_interval),
            }
        }
    }
}

fn lock<W>(relay: &Mutex<TranscriptRelay<W>>) -> std::sync::MutexGuard<'_, TranscriptRelay<W>> {
    relay.lock().unwrap_or_else(|e| e.into_inner())
}

fn relay_lines<W: Write>(stream: Box<dyn Read + Send>, relay: &Mutex<TranscriptRelay<W>>) -> io::Result<()> {
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            return Ok(());
        }
        let text = String::from_utf8_lossy(&buf);
        lock(relay).line(text.trim_end_matches(['\n', '\r']))?;
    }
}

/// Whether `program` can be found, either as a path or on `PATH`.
pub fn program_available(program: &str) -> bool {
    let path = Path::new(program);
    if path.components().count() > 1 {
        return path.is_file();
    }
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(program).is_file()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn sh(script: &str, cwd: &Path) -> MakeInvocation {
        MakeInvocation {
            program: "sh".to_string(),
            target: "-c".to_string(),
            args: vec![script.to_string()],
            cwd: cwd.to_path_buf(),
        }
    }

    fn transcript(out: Vec<u8>) -> Vec<String> {
        String::from_utf8(out)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_command_line_quoting() {
        let invocation = MakeInvocation {
            program: "make".to_string(),
            target: "hermit/0a1b2c3d:default:flash".to_string(),
            args: vec!["VERBOSE=true".to_string(), "CFLAGS=-O2 -g".to_string(), "it's".to_string()],
            cwd: PathBuf::from("/tmp"),
        };
        assert_eq!(
            invocation.command_line(),
            r#"make hermit/0a1b2c3d:default:flash VERBOSE=true 'CFLAGS=-O2 -g' 'it'\''s'"#
        );
    }

    #[test]
    fn test_new_from_target() {
        let target = BuildTarget {
            fragments: vec!["planck".to_string(), "default".to_string()],
            make_args: vec!["-j4".to_string()],
            warnings: Vec::new(),
        };
        let invocation = MakeInvocation::new("make", &target, "/mirror");
        assert_eq!(invocation.argv(), vec!["planck:default", "-j4"]);
        assert_eq!(invocation.cwd, PathBuf::from("/mirror"));
    }

    #[test]
    fn test_run_relays_output() {
        let temp_dir = tempfile::tempdir().unwrap();
        let runner = BuildRunner::new(CancelFlag::new()).with_poll_interval(Duration::from_millis(5));
        let (outcome, out) = runner
            .run_with_output(&sh("echo one; echo two; pwd", temp_dir.path()), Vec::new())
            .unwrap();

        assert!(outcome.success());
        let lines = transcript(out);
        assert_eq!(lines.first().map(String::as_str), Some("┎─"));
        assert_eq!(lines.last().map(String::as_str), Some("┖─"));
        assert_eq!(lines[1], "┃ one");
        assert_eq!(lines[2], "┃ two");
        let cwd = temp_dir.path().canonicalize().unwrap();
        assert_eq!(lines[3], format!("┃ {}", cwd.display()));
    }

    #[test]
    fn test_run_relays_stderr_and_exit_code() {
        let temp_dir = tempfile::tempdir().unwrap();
        let runner = BuildRunner::new(CancelFlag::new()).with_poll_interval(Duration::from_millis(5));
        let (outcome, out) = runner
            .run_with_output(&sh("echo oops >&2; exit 3", temp_dir.path()), Vec::new())
            .unwrap();

        assert_eq!(outcome, BuildOutcome { exit_code: 3, cancelled: false });
        assert!(!outcome.success());
        assert!(transcript(out).contains(&"┃ oops".to_string()));
    }

    #[test]
    fn test_cancel_kills_child() {
        let temp_dir = tempfile::tempdir().unwrap();
        let cancel = CancelFlag::new();
        cancel.cancel();
        let runner = BuildRunner::new(cancel).with_poll_interval(Duration::from_millis(5));

        let started = Instant::now();
        let (outcome, _) = runner
            .run_with_output(&sh("exec sleep 30", temp_dir.path()), Vec::new())
            .unwrap();

        assert!(outcome.cancelled);
        assert_eq!(outcome.exit_code, EXIT_CODE_CANCELLED);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_spawn_failure() {
        let temp_dir = tempfile::tempdir().unwrap();
        let invocation = MakeInvocation {
            program: "definitely-not-a-real-make-binary".to_string(),
            target: "x:y".to_string(),
            args: Vec::new(),
            cwd: temp_dir.path().to_path_buf(),
        };
        let result = BuildRunner::new(CancelFlag::new()).run_with_output(&invocation, Vec::new());
        assert!(matches!(result, Err(RunnerError::Spawn { .. })));
    }

    #[test]
    fn test_program_available() {
        assert!(program_available("sh"));
        assert!(!program_available("definitely-not-a-real-make-binary"));
    }
}
