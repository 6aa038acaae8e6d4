//! Running helper programs for `bin(...)`.
//!
//! Helpers follow a strict protocol: exit with status 0, write nothing to stderr and print exactly
//! one line to stdout. The wall clock is bounded: a helper that runs too long is killed, and output
//! still held open by its children at the deadline counts as a timeout.

use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use wait_timeout::ChildExt;

use crate::context::{ExternalRunner, ProcessOutput};
use crate::error::ProcessError;

/// How long a helper may run before it is killed.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// An [`ExternalRunner`] that spawns real processes.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    timeout: Duration,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl ProcessRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn timed_out(&self, program: String) -> ProcessError {
        ProcessError::Timeout {
            program,
            timeout: self.timeout,
        }
    }
}

impl ExternalRunner for ProcessRunner {
    fn run(&self, argv: &[String]) -> Result<ProcessOutput, ProcessError> {
        let Some((program, args)) = argv.split_first() else {
            return Err(ProcessError::Spawn {
                program: String::new(),
                message: "empty command line".to_string(),
            });
        };
        let shown = program_name(program);

        log::debug!("running {argv:?}");
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| ProcessError::Spawn {
                program: shown.clone(),
                message: err.to_string(),
            })?;

        // The deadline covers the helper and anything it leaves holding the pipes
        let deadline = Instant::now() + self.timeout;
        let (tx, rx) = mpsc::channel();
        if let Some(stdout) = child.stdout.take() {
            drain(Pipe::Stdout, stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            drain(Pipe::Stderr, stderr, tx.clone());
        }
        drop(tx);

        let status = match child.wait_timeout(deadline.saturating_duration_since(Instant::now())) {
            Ok(Some(status)) => status,
            Ok(None) => {
                let _ = child.kill();
                let _ = child.wait();
                log::warn!("'{shown}' timed out after {:?}, killed", self.timeout);
                return Err(self.timed_out(shown));
            }
            Err(err) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ProcessError::Spawn {
                    program: shown,
                    message: err.to_string(),
                });
            }
        };

        let mut output = ProcessOutput {
            code: status.code(),
            ..Default::default()
        };
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok((Pipe::Stdout, text)) => output.stdout = text,
                Ok((Pipe::Stderr, text)) => output.stderr = text,
                Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    log::warn!(
                        "'{shown}' exited but its output was still open after {:?}",
                        self.timeout
                    );
                    return Err(self.timed_out(shown));
                }
            }
        }
        Ok(output)
    }
}

/// Check a helper's output against the protocol and return its single line.
pub fn first_line(program: &str, output: ProcessOutput) -> Result<String, ProcessError> {
    let program = program_name(program);
    if output.code != Some(0) {
        let code = output
            .code
            .map(|code| code.to_string())
            .unwrap_or_else(|| "signal".to_string());
        log::warn!("'{program}' exited with {code}");
        return Err(ProcessError::ExitStatus { program, code });
    }
    if !output.stderr.is_empty() {
        return Err(ProcessError::Stderr {
            program,
            stderr: output.stderr.trim_end().to_string(),
        });
    }

    let mut lines = output.stdout.lines();
    let Some(first) = lines.next().filter(|line| !line.trim().is_empty()) else {
        return Err(ProcessError::EmptyOutput { program });
    };
    if lines.next().is_some() {
        return Err(ProcessError::MultipleLines { program });
    }
    Ok(first.to_string())
}

fn program_name(program: &str) -> String {
    Path::new(program)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.to_string())
}

#[derive(Debug, Clone, Copy)]
enum Pipe {
    Stdout,
    Stderr,
}

/// Read a pipe to the end on a detached thread and send the text back.
fn drain<R: Read + Send + 'static>(pipe: Pipe, mut stream: R, tx: Sender<(Pipe, String)>) {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        let _ = stream.read_to_end(&mut buffer);
        let _ = tx.send((pipe, String::from_utf8_lossy(&buffer).into_owned()));
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(code: i32, stdout: &str, stderr: &str) -> ProcessOutput {
        ProcessOutput {
            code: Some(code),
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        }
    }

    #[test]
    fn first_line_enforces_the_protocol() {
        assert_eq!(
            first_line("/bin/next", output(0, "2021-01-01\n", "")),
            Ok("2021-01-01".to_string())
        );
        assert_eq!(
            first_line("/bin/next", output(1, "2021-01-01\n", "")),
            Err(ProcessError::ExitStatus {
                program: "next".to_string(),
                code: "1".to_string()
            })
        );
        assert!(matches!(
            first_line("next", output(0, "2021-01-01\n", "warning\n")),
            Err(ProcessError::Stderr { .. })
        ));
        assert!(matches!(
            first_line("next", output(0, "2021-01-01\n2021-02-01\n", "")),
            Err(ProcessError::MultipleLines { .. })
        ));
        assert!(matches!(
            first_line("next", output(0, "", "")),
            Err(ProcessError::EmptyOutput { .. })
        ));
        assert!(matches!(
            first_line("next", output(0, "\n", "")),
            Err(ProcessError::EmptyOutput { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn runs_a_process_and_captures_output() {
        let runner = ProcessRunner::default();
        let argv = ["/bin/sh", "-c", "echo 2021-03-04; echo oops >&2; exit 3"]
            .map(str::to_string);
        let result = runner.run(&argv).expect("process runs");
        assert_eq!(result.code, Some(3));
        assert_eq!(result.stdout, "2021-03-04\n");
        assert_eq!(result.stderr, "oops\n");
    }

    #[cfg(unix)]
    #[test]
    fn kills_processes_that_run_too_long() {
        let runner = ProcessRunner::new(Duration::from_millis(200));
        let argv = ["/bin/sh", "-c", "exec sleep 5"].map(str::to_string);
        let started = std::time::Instant::now();
        let result = runner.run(&argv);
        assert!(started.elapsed() < Duration::from_secs(4));
        assert_eq!(
            result.unwrap_err().to_string(),
            "'sh' timed out after 200ms"
        );
    }

    #[cfg(unix)]
    #[test]
    fn background_children_cannot_outlive_the_deadline() {
        let runner = ProcessRunner::new(Duration::from_millis(500));
        let argv = ["/bin/sh", "-c", "echo 2021-01-01; sleep 6 &"].map(str::to_string);
        let started = std::time::Instant::now();
        let result = runner.run(&argv);
        assert!(
            started.elapsed() < Duration::from_secs(3),
            "run took {:?}",
            started.elapsed()
        );
        assert!(
            matches!(result, Err(ProcessError::Timeout { .. })),
            "unexpected result {result:?}"
        );
    }

    #[test]
    fn missing_programs_fail_to_spawn() {
        let runner = ProcessRunner::default();
        let argv = ["/definitely/not/here".to_string()];
        assert!(matches!(
            runner.run(&argv),
            Err(ProcessError::Spawn { .. })
        ));
    }
}
