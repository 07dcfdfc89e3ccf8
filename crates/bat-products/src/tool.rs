//! Running HEASoft tasks as child processes.

use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{Error, Result};
use crate::history::ParameterSet;

/// Exit status and combined stdout/stderr text of a task run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutput {
    pub status: i32,
    pub output: String,
}

impl TaskOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Something that can run a named task with `name=value` parameters.
///
/// `workdir` becomes the child's working directory; the caller's own
/// current directory is never changed.
pub trait TaskRunner {
    fn run(&self, task: &str, params: &ParameterSet, workdir: Option<&Path>) -> Result<TaskOutput>;
}

/// Run `task` and turn a nonzero exit status into
/// [`Error::ExternalToolFailure`] carrying the task's own output.
pub fn run_checked(
    runner: &dyn TaskRunner,
    task: &str,
    params: &ParameterSet,
    workdir: Option<&Path>,
) -> Result<TaskOutput> {
    log::debug!("running {task} {}", params.to_args().join(" "));
    let out = runner.run(task, params, workdir)?;
    if !out.success() {
        return Err(Error::ExternalToolFailure {
            task: task.to_string(),
            message: out.output,
        });
    }
    Ok(out)
}

/// Runs tasks from a HEASoft installation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Heasoft {
    bin_dir: Option<PathBuf>,
}

impl Heasoft {
    /// Resolve task executables through `PATH`.
    pub fn new() -> Self {
        Heasoft { bin_dir: None }
    }

    /// Use `$HEADAS/bin` when `HEADAS` is set, else `PATH`.
    pub fn from_env() -> Self {
        match env::var_os("HEADAS") {
            Some(headas) => Heasoft::with_bin_dir(PathBuf::from(headas).join("bin")),
            None => Heasoft::new(),
        }
    }

    pub fn with_bin_dir(dir: impl Into<PathBuf>) -> Self {
        Heasoft {
            bin_dir: Some(dir.into()),
        }
    }

    fn program(&self, task: &str) -> PathBuf {
        match &self.bin_dir {
            Some(dir) => dir.join(task),
            None => PathBuf::from(task),
        }
    }
}

impl TaskRunner for Heasoft {
    fn run(&self, task: &str, params: &ParameterSet, workdir: Option<&Path>) -> Result<TaskOutput> {
        let mut cmd = Command::new(self.program(task));
        cmd.args(params.to_args());
        // Never prompt for missing parameters.
        cmd.env("HEADASNOQUERY", "");
        if let Some(dir) = workdir {
            cmd.current_dir(dir);
        }
        let out = cmd.output().map_err(|e| Error::ExternalToolFailure {
            task: task.to_string(),
            message: format!("could not start {}: {e}", self.program(task).display()),
        })?;
        let mut output = String::from_utf8_lossy(&out.stdout).into_owned();
        output.push_str(&String::from_utf8_lossy(&out.stderr));
        Ok(TaskOutput {
            status: out.status.code().unwrap_or(-1),
            output,
        })
    }
}
