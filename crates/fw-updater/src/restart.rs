// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Restarting into a freshly installed image

use crate::error::{Result, UpdaterError};
use async_trait::async_trait;
use std::path::PathBuf;

/// Reboots the device (or process) into the installed image.
///
/// Implementations normally never return; returning `Ok` means the restart
/// was requested but happens asynchronously.
#[async_trait]
pub trait Restarter: Send + Sync {
    async fn restart(&self) -> Result<()>;
}

/// Replaces the running process with `program` via `execv`.
///
/// On non-Unix targets the process exits with status 0 and relies on its
/// supervisor to start the new image.
#[derive(Debug, Clone)]
pub struct ExecRestarter {
    program: PathBuf,
    args: Vec<String>,
}

impl ExecRestarter {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Re-run `program` with the arguments this process was started with
    pub fn with_current_args(program: impl Into<PathBuf>) -> Self {
        Self::new(program, std::env::args().skip(1).collect())
    }

    #[cfg(unix)]
    fn argv(&self) -> Result<(std::ffi::CString, Vec<std::ffi::CString>)> {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        let to_cstring = |bytes: &[u8]| {
            CString::new(bytes)
                .map_err(|e| UpdaterError::Restart(format!("invalid argument: {e}")))
        };

        let program = to_cstring(self.program.as_os_str().as_bytes())?;
        let mut argv = Vec::with_capacity(self.args.len() + 1);
        argv.push(program.clone());
        for arg in &self.args {
            argv.push(to_cstring(arg.as_bytes())?);
        }
        Ok((program, argv))
    }
}

#[async_trait]
impl Restarter for ExecRestarter {
    #[cfg(unix)]
    async fn restart(&self) -> Result<()> {
        let (program, argv) = self.argv()?;
        tracing::info!("Restarting into {}", self.program.display());

        // Only returns on failure
        match nix::unistd::execv(&program, &argv) {
            Ok(never) => match never {},
            Err(errno) => Err(UpdaterError::Restart(format!(
                "execv {} failed: {errno}",
                self.program.display()
            ))),
        }
    }

    #[cfg(not(unix))]
    async fn restart(&self) -> Result<()> {
        tracing::info!(
            "Exiting so the supervisor starts {}",
            self.program.display()
        );
        std::process::exit(0)
    }
}
