//! External command execution.
//!
//! The agent shells out for exactly one thing: telling the running
//! CTDB daemon to re-read the nodes file after it changes on disk.
//! Command lines are built from an explicit [`CommandConfig`] threaded
//! through call sites, so two callers in one process can run with
//! different prefixes (container wrappers, test harnesses).

use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tracing::debug;

use keeper_proto::error::{KeeperError, KeeperResult};

/// Explicit configuration for building external command lines.
#[derive(Debug, Clone, Default)]
pub struct CommandConfig {
    /// Argv prefix prepended to every command (e.g. `nsenter` style
    /// container wrappers).
    pub prefix: Vec<String>,
    /// CTDB debug level, rendered as `--debuglevel=<level>` when set.
    pub debug_level: Option<String>,
}

impl CommandConfig {
    /// Argv that makes the running CTDB daemon re-read the nodes file.
    /// The daemon keeps a cached copy in memory; writing the file
    /// alone changes nothing until this runs.
    pub fn reload_nodes_argv(&self) -> Vec<String> {
        let mut argv = self.prefix.clone();
        argv.push("ctdb".to_string());
        if let Some(level) = &self.debug_level {
            argv.push(format!("--debuglevel={}", level));
        }
        argv.push("reloadnodes".to_string());
        argv
    }
}

/// Executes argv-style external commands, failing on nonzero exit.
pub trait CommandRunner {
    fn run(&self, argv: &[String]) -> KeeperResult<()>;
}

/// Runs commands via `std::process`, inheriting stdio.
#[derive(Debug, Default)]
pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    fn run(&self, argv: &[String]) -> KeeperResult<()> {
        let (program, args) = argv.split_first().ok_or(KeeperError::CommandFailed {
            command: String::new(),
            code: None,
        })?;
        debug!("running: {}", argv.join(" "));
        let status = Command::new(program).args(args).status()?;
        if !status.success() {
            return Err(KeeperError::CommandFailed {
                command: argv.join(" "),
                code: status.code(),
            });
        }
        Ok(())
    }
}

/// Records every argv instead of executing it. Useful for tests that
/// need to observe (or fail) the reload call without a live cluster.
#[derive(Debug, Default)]
pub struct RecordingRunner {
    calls: Mutex<Vec<Vec<String>>>,
    fail: AtomicBool,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `run` calls fail (still recorded).
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl CommandRunner for RecordingRunner {
    fn run(&self, argv: &[String]) -> KeeperResult<()> {
        self.calls.lock().unwrap().push(argv.to_vec());
        if self.fail.load(Ordering::SeqCst) {
            return Err(KeeperError::CommandFailed {
                command: argv.join(" "),
                code: Some(1),
            });
        }
        Ok(())
    }
}
