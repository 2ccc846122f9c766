//! Chains of external processes joined stdout → stdin.
//!
//! A pipeline succeeds only if every stage started, exited with an accepted
//! status and wrote nothing to stderr, and the last stage's output was fully
//! copied to the destination. Faults from all stages are reported together.

use crate::utils::errors::{Result, RotatorError};
use futures_util::future::join_all;
use std::ffi::OsStr;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, Command};
use tracing::debug;

/// One process in a pipeline.
#[derive(Debug)]
pub struct Stage {
    label: String,
    command: Command,
    accepted_exit_codes: Vec<i32>,
}

impl Stage {
    pub fn new(program: &str) -> Self {
        Self {
            label: program.to_string(),
            command: Command::new(program),
            accepted_exit_codes: vec![0],
        }
    }

    pub fn arg<S: AsRef<OsStr>>(mut self, arg: S) -> Self {
        self.command.arg(arg);
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.command.args(args);
        self
    }

    pub fn env<K: AsRef<OsStr>, V: AsRef<OsStr>>(mut self, key: K, value: V) -> Self {
        self.command.env(key, value);
        self
    }

    pub fn current_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.command.current_dir(dir);
        self
    }

    /// Treat an additional exit code as success (e.g. tar's "file changed" code 1).
    pub fn accept_exit_code(mut self, code: i32) -> Self {
        self.accepted_exit_codes.push(code);
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    #[cfg(test)]
    pub(crate) fn args_for_test(&self) -> Vec<String> {
        self.command
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn current_dir_for_test(&self) -> Option<&Path> {
        self.command.as_std().get_current_dir()
    }
}

struct Running {
    label: String,
    accepted_exit_codes: Vec<i32>,
    child: Child,
}

impl Running {
    fn accepts(&self, status: ExitStatus) -> bool {
        status
            .code()
            .map(|code| self.accepted_exit_codes.contains(&code))
            .unwrap_or(false)
    }
}

/// Run `stages` as one pipeline, writing the last stage's stdout to `output`.
pub async fn run<W>(stages: Vec<Stage>, output: &mut W) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    if stages.is_empty() {
        return Err(RotatorError::Capture(
            "Must have at least one stage to pipe".to_string(),
        ));
    }

    let labels: Vec<&str> = stages.iter().map(|s| s.label()).collect();
    debug!(pipeline = %labels.join(" | "), "Starting pipeline");

    let last = stages.len() - 1;
    let mut running: Vec<Running> = Vec::with_capacity(stages.len());
    let mut upstream: Option<Stdio> = None;
    let mut final_stdout = None;
    let mut faults = Vec::new();

    // A stage that cannot be started or wired up ends spawning; stages
    // already running are still drained and reaped below.
    for (i, stage) in stages.into_iter().enumerate() {
        let Stage {
            label,
            mut command,
            accepted_exit_codes,
        } = stage;

        command
            .stdin(upstream.take().unwrap_or_else(Stdio::null))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                faults.push(format!("{}: failed to start: {}", label, e));
                break;
            }
        };

        // The command still holds the upstream pipe end.
        drop(command);

        let wired = match child.stdout.take() {
            Some(stdout) if i == last => {
                final_stdout = Some(stdout);
                Ok(())
            }
            Some(stdout) => match TryInto::<Stdio>::try_into(stdout) {
                Ok(stdio) => {
                    upstream = Some(stdio);
                    Ok(())
                }
                Err(e) => Err(format!("{}: cannot pipe stdout: {}", label, e)),
            },
            None => Err(format!("{}: stdout was not captured", label)),
        };

        running.push(Running {
            label,
            accepted_exit_codes,
            child,
        });

        if let Err(fault) = wired {
            faults.push(fault);
            break;
        }
    }

    // Unused if spawning stopped early; the last started stage sees a closed pipe.
    drop(upstream);

    let copy = async {
        if let Some(mut stdout) = final_stdout {
            tokio::io::copy(&mut stdout, output).await?;
            output.flush().await?;
        }
        Ok::<(), std::io::Error>(())
    };

    let stages = join_all(running.into_iter().map(|mut stage| async move {
        let mut stderr = Vec::new();
        let read = match stage.child.stderr.take() {
            Some(mut pipe) => pipe.read_to_end(&mut stderr).await.map(|_| ()),
            None => Ok(()),
        };
        let status = stage.child.wait().await;
        (stage, stderr, read, status)
    }));

    let (copied, finished) = tokio::join!(copy, stages);

    for (stage, stderr, read, status) in finished {
        let stderr = String::from_utf8_lossy(&stderr);
        let stderr = stderr.trim();
        if !stderr.is_empty() {
            faults.push(format!("{}: {}", stage.label, stderr));
        }
        if let Err(e) = read {
            faults.push(format!("{}: reading stderr failed: {}", stage.label, e));
        }
        match status {
            Ok(status) if stage.accepts(status) => {}
            Ok(status) => faults.push(format!("{}: exited with {}", stage.label, status)),
            Err(e) => faults.push(format!("{}: wait failed: {}", stage.label, e)),
        }
    }

    if let Err(e) = copied {
        faults.push(format!("writing output failed: {}", e));
    }

    if faults.is_empty() {
        Ok(())
    } else {
        Err(RotatorError::Capture(faults.join("\n")))
    }
}
