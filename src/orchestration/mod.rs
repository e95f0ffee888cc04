//! Orchestration module for container runtimes
//!
//! Provides the runtime abstraction the build engine drives:
//! - `ContainerRuntime` trait (create, start, commit, remove, inspect)
//! - `CliRuntime` backed by the docker or podman CLI

mod cli_runtime;
mod factory;
#[cfg(test)]
pub(crate) mod mock;
pub mod podman;
mod runtime;

pub use cli_runtime::CliRuntime;
pub use factory::{create_runtime, runtime_from_config, RuntimeKind};
pub use podman::{ContainerSpec, ImageConfigInspect, ImageInspect};
pub use runtime::ContainerRuntime;

use std::collections::VecDeque;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Max number of output lines to include in build error messages.
const BUILD_ERROR_TAIL_LINES: usize = 50;

/// Extract the useful tail of build output for error diagnostics.
///
/// Combines stdout and stderr, then returns the last `BUILD_ERROR_TAIL_LINES`
/// lines so error messages are actionable without being overwhelming.
pub(crate) fn build_error_output(stdout: &str, stderr: &str) -> String {
    let lines: Vec<&str> = stdout.lines().chain(stderr.lines()).collect();
    let total = lines.len();
    let tail: Vec<&str> = if total > BUILD_ERROR_TAIL_LINES {
        lines[total - BUILD_ERROR_TAIL_LINES..].to_vec()
    } else {
        lines
    };
    tail.join("\n")
}

fn push_tail(tail: &mut VecDeque<String>, line: String) {
    if tail.len() == BUILD_ERROR_TAIL_LINES {
        tail.pop_front();
    }
    tail.push_back(line);
}

/// Stream stdout+stderr from a child process, calling `on_output` for each line.
///
/// Returns the last `BUILD_ERROR_TAIL_LINES` lines for error reporting. Both
/// streams must be piped; otherwise nothing is read.
pub(crate) async fn stream_child_output(
    child: &mut tokio::process::Child,
    on_output: &(dyn Fn(String) + Send + Sync),
) -> Vec<String> {
    let (Some(stderr), Some(stdout)) = (child.stderr.take(), child.stdout.take()) else {
        return Vec::new();
    };

    let mut stderr_reader = BufReader::new(stderr).lines();
    let mut stdout_reader = BufReader::new(stdout).lines();

    let mut tail = VecDeque::with_capacity(BUILD_ERROR_TAIL_LINES);
    let mut stderr_done = false;
    let mut stdout_done = false;

    while !stderr_done || !stdout_done {
        tokio::select! {
            line = stderr_reader.next_line(), if !stderr_done => {
                match line {
                    Ok(Some(line)) => {
                        on_output(line.clone());
                        push_tail(&mut tail, line);
                    }
                    _ => stderr_done = true,
                }
            }
            line = stdout_reader.next_line(), if !stdout_done => {
                match line {
                    Ok(Some(line)) => {
                        on_output(line.clone());
                        push_tail(&mut tail, line);
                    }
                    _ => stdout_done = true,
                }
            }
        }
    }

    tail.into()
}
