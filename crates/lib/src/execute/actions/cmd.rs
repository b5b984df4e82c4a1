//! Command action implementation.
//!
//! Commands run on the host against a stage rootfs with a scrubbed,
//! reproducible environment. The rootfs is exposed as `$root`.

use std::collections::BTreeMap;
use std::path::Path;

use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::consts::{DEFAULT_SYSTEM_PATH, SOURCE_DATE_EPOCH};
use crate::execute::types::ExecuteError;

/// Execute a command against a stage rootfs.
///
/// The environment is cleared and rebuilt:
/// - `PATH` is the fixed default system path
/// - `HOME` is `/homeless-shelter`
/// - `TMPDIR`/`TMP`/`TEMP`/`TEMPDIR` point at `tmp_dir`
/// - `root` is the stage rootfs
/// - `LANG`/`LC_ALL` are `C` and `SOURCE_DATE_EPOCH` is fixed
/// - user-specified variables are merged last
///
/// `cwd` defaults to the rootfs. Returns the trimmed stdout on success.
pub async fn execute_cmd(
  cmd: &str,
  env: Option<&BTreeMap<String, String>>,
  cwd: Option<&Path>,
  rootfs: &Path,
  tmp_dir: &Path,
  shell: Option<&str>,
) -> Result<String, ExecuteError> {
  info!(cmd = %cmd, "executing command");

  tokio::fs::create_dir_all(tmp_dir).await?;

  let (shell_cmd, shell_args) = get_shell(shell);
  let working_dir = cwd.unwrap_or(rootfs);

  let mut command = Command::new(&shell_cmd);
  command
    .args(&shell_args)
    .arg(cmd)
    .current_dir(working_dir)
    .env_clear()
    .env("PATH", DEFAULT_SYSTEM_PATH.join(":"))
    .env("HOME", "/homeless-shelter")
    .env("TMPDIR", tmp_dir)
    .env("TMP", tmp_dir)
    .env("TEMP", tmp_dir)
    .env("TEMPDIR", tmp_dir)
    .env("root", rootfs)
    .env("LANG", "C")
    .env("LC_ALL", "C")
    .env("SOURCE_DATE_EPOCH", SOURCE_DATE_EPOCH);

  if let Some(user_env) = env {
    for (key, value) in user_env {
      command.env(key, value);
    }
  }

  debug!(shell = %shell_cmd, working_dir = ?working_dir, "spawning process");

  let output = command.output().await?;

  if !output.status.success() {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);

    if !stderr.is_empty() {
      warn!(stderr = %stderr.trim_end(), "command stderr");
    }
    if !stdout.is_empty() {
      debug!(stdout = %stdout, "command stdout");
    }

    return Err(ExecuteError::CmdFailed {
      cmd: cmd.to_string(),
      code: output.status.code(),
    });
  }

  let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();

  if !stdout.is_empty() {
    debug!(stdout = %stdout, "command output");
  }

  Ok(stdout)
}

/// Get the shell command and arguments for the current platform.
///
/// Defaults to `/bin/sh -c` rather than `$SHELL`, since interactive shells may
/// source profile files that change the environment.
fn get_shell(override_shell: Option<&str>) -> (String, Vec<String>) {
  if let Some(shell) = override_shell {
    let args = if shell.contains("powershell") || shell.contains("pwsh") {
      vec![
        "-NoProfile".to_string(),
        "-ExecutionPolicy".to_string(),
        "Bypass".to_string(),
        "-Command".to_string(),
      ]
    } else if shell.contains("cmd") {
      vec!["/C".to_string()]
    } else {
      vec!["-c".to_string()]
    };
    return (shell.to_string(), args);
  }

  #[cfg(unix)]
  {
    ("/bin/sh".to_string(), vec!["-c".to_string()])
  }

  #[cfg(windows)]
  {
    (
      "powershell.exe".to_string(),
      vec![
        "-NoProfile".to_string(),
        "-ExecutionPolicy".to_string(),
        "Bypass".to_string(),
        "-Command".to_string(),
      ],
    )
  }
}
