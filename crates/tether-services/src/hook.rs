//! Completion hooks: what the receiver does when the whole transfer is in.
//!
//! The downstream pipeline is someone else's program. Tether launches it
//! detached and never looks at its outcome.

use std::process::{Command, Stdio};
use std::sync::Arc;

pub trait CompletionHook: Send + Sync {
    fn on_complete(&self);
}

/// Spawn an external command as a detached child.
pub struct CommandHook {
    program: String,
    args: Vec<String>,
}

impl CommandHook {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Build from an argv list; None if it is empty.
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self::new(program.clone(), args.to_vec()))
    }
}

impl CompletionHook for CommandHook {
    fn on_complete(&self) {
        match Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .spawn()
        {
            Ok(mut child) => {
                let pid = child.id();
                tracing::info!(program = %self.program, pid, "downstream pipeline launched");
                // Reap in the background so the child never lingers as a zombie.
                std::thread::spawn(move || {
                    let _ = child.wait();
                });
            }
            Err(e) => {
                tracing::error!(program = %self.program, error = %e, "failed to launch downstream pipeline");
            }
        }
    }
}

/// Used when no pipeline is configured.
pub struct LogHook;

impl CompletionHook for LogHook {
    fn on_complete(&self) {
        tracing::info!("transfer complete, no downstream pipeline configured");
    }
}

pub fn hook_from_argv(argv: &[String]) -> Arc<dyn CompletionHook> {
    match CommandHook::from_argv(argv) {
        Some(hook) => Arc::new(hook),
        None => Arc::new(LogHook),
    }
}
