// ─── Launch Task ───
// Runs the resolved binary as a child with inherited stdio and mirrors its
// termination back onto the launcher process.

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use tokio::process::{Child, Command};
use tracing::{debug, info};

use crate::core::error::{LauncherError, LauncherResult};

/// How the child terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    Exited(i32),
    Signaled(i32),
}

impl ExitOutcome {
    pub fn from_status(status: ExitStatus) -> Self {
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return ExitOutcome::Signaled(signal);
            }
        }
        ExitOutcome::Exited(status.code().unwrap_or(1))
    }

    /// Shell-style numeric status (`128 + signal` for signals).
    pub fn exit_code(&self) -> i32 {
        match self {
            ExitOutcome::Exited(code) => *code,
            ExitOutcome::Signaled(signal) => 128 + signal,
        }
    }
}

impl fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitOutcome::Exited(code) => write!(f, "exit {code}"),
            ExitOutcome::Signaled(signal) => write!(f, "signal {signal}"),
        }
    }
}

/// A spawned child plus the signal relay that keeps it company.
pub struct RunningChild {
    binary: PathBuf,
    child: Child,
    forwarder: SignalForwarder,
}

impl RunningChild {
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Block until the child terminates, relaying signals meanwhile.
    pub async fn wait(mut self) -> LauncherResult<ExitOutcome> {
        let status = self
            .forwarder
            .wait(&mut self.child)
            .await
            .map_err(|source| LauncherError::Spawn {
                path: self.binary.clone(),
                source,
            })?;

        let outcome = ExitOutcome::from_status(status);
        info!("{:?} terminated with {}", self.binary, outcome);
        Ok(outcome)
    }
}

/// Spawn `binary` with exactly `args` and `env`, inheriting stdin, stdout
/// and stderr. Must be called from within a Tokio runtime.
pub fn spawn_child(
    binary: &Path,
    args: &[OsString],
    env: &[(OsString, OsString)],
) -> LauncherResult<RunningChild> {
    let spawn_error = |source| LauncherError::Spawn {
        path: binary.to_path_buf(),
        source,
    };
    let forwarder = SignalForwarder::install().map_err(spawn_error)?;

    let mut cmd = Command::new(binary);
    cmd.args(args)
        .env_clear()
        .envs(env.iter().map(|(k, v)| (k, v)))
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());

    debug!("Spawning {:?} with {} args", binary, args.len());
    let child = cmd.spawn().map_err(spawn_error)?;

    Ok(RunningChild {
        binary: binary.to_path_buf(),
        child,
        forwarder,
    })
}

/// Spawn and wait in one step.
pub async fn run_child(
    binary: &Path,
    args: &[OsString],
    env: &[(OsString, OsString)],
) -> LauncherResult<ExitOutcome> {
    spawn_child(binary, args, env)?.wait().await
}

/// Terminate the current process the same way the child did.
///
/// A signal-terminated child makes the launcher die from the same signal,
/// so shells and supervisors see identical termination semantics.
pub fn exit_like(outcome: ExitOutcome) -> ! {
    match outcome {
        ExitOutcome::Exited(code) => std::process::exit(code),
        ExitOutcome::Signaled(signal) => {
            #[cfg(unix)]
            reraise(signal);
            std::process::exit(128 + signal)
        }
    }
}

#[cfg(unix)]
fn reraise(signal: i32) {
    // SAFETY: restores the default disposition for `signal`, unblocks it,
    // and raises it on the calling thread. No Rust state is touched.
    unsafe {
        libc::signal(signal, libc::SIG_DFL);
        let mut set: libc::sigset_t = std::mem::zeroed();
        libc::sigemptyset(&mut set);
        libc::sigaddset(&mut set, signal);
        libc::pthread_sigmask(libc::SIG_UNBLOCK, &set, std::ptr::null_mut());
        libc::raise(signal);
    }
}

/// Keeps the launcher alive while the child runs and relays interrupt-style
/// signals to it.
#[cfg(unix)]
struct SignalForwarder {
    sigint: tokio::signal::unix::Signal,
    sigquit: tokio::signal::unix::Signal,
    sigterm: tokio::signal::unix::Signal,
    sighup: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl SignalForwarder {
    /// Handlers go in before the spawn so an early signal cannot kill the
    /// launcher and orphan the child.
    fn install() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        Ok(Self {
            sigint: signal(SignalKind::interrupt())?,
            sigquit: signal(SignalKind::quit())?,
            sigterm: signal(SignalKind::terminate())?,
            sighup: signal(SignalKind::hangup())?,
        })
    }

    async fn wait(&mut self, child: &mut Child) -> std::io::Result<ExitStatus> {
        let pid = child.id();
        loop {
            tokio::select! {
                status = child.wait() => return status,
                Some(()) = self.sigint.recv() => forward(pid, libc::SIGINT, true),
                Some(()) = self.sigquit.recv() => forward(pid, libc::SIGQUIT, true),
                Some(()) = self.sigterm.recv() => forward(pid, libc::SIGTERM, false),
                Some(()) = self.sighup.recv() => forward(pid, libc::SIGHUP, false),
            }
        }
    }
}

/// Relay `signal` to the child.
///
/// Keyboard signals from our controlling terminal already reach the whole
/// foreground process group, child included; relaying those would deliver
/// them twice.
///
/// The origin of a signal is not visible here, so while the launcher sits in
/// the terminal's foreground group an explicit `kill -INT` or `kill -QUIT`
/// aimed at the launcher alone is not relayed either. Send it to the child
/// or to the whole process group instead. SIGTERM and SIGHUP are always
/// relayed.
#[cfg(unix)]
fn forward(pid: Option<u32>, signal: i32, keyboard_signal: bool) {
    let Some(pid) = pid.and_then(|p| libc::pid_t::try_from(p).ok()) else {
        return;
    };
    if !should_relay(keyboard_signal, in_terminal_foreground()) {
        debug!("Signal {} delivered to child by the terminal", signal);
        return;
    }
    debug!("Forwarding signal {} to child {}", signal, pid);
    // SAFETY: plain kill(2) on the pid of a child we spawned and have not reaped.
    unsafe {
        libc::kill(pid, signal);
    }
}

#[cfg(unix)]
fn should_relay(keyboard_signal: bool, terminal_foreground: bool) -> bool {
    !(keyboard_signal && terminal_foreground)
}

#[cfg(unix)]
fn in_terminal_foreground() -> bool {
    // SAFETY: isatty/tcgetpgrp/getpgrp only query process state.
    unsafe {
        if libc::isatty(libc::STDIN_FILENO) != 1 {
            return false;
        }
        let foreground = libc::tcgetpgrp(libc::STDIN_FILENO);
        foreground != -1 && foreground == libc::getpgrp()
    }
}

/// On Windows the child shares our console and receives Ctrl-C itself; the
/// launcher only has to survive it.
#[cfg(not(unix))]
struct SignalForwarder;

#[cfg(not(unix))]
impl SignalForwarder {
    fn install() -> std::io::Result<Self> {
        Ok(Self)
    }

    async fn wait(&mut self, child: &mut Child) -> std::io::Result<ExitStatus> {
        loop {
            tokio::select! {
                status = child.wait() => return status,
                ctrl_c = tokio::signal::ctrl_c() => {
                    if ctrl_c.is_err() {
                        return child.wait().await;
                    }
                    debug!("Ctrl-C received; waiting for child");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_shell_convention() {
        assert_eq!(ExitOutcome::Exited(3).exit_code(), 3);
        assert_eq!(ExitOutcome::Signaled(15).exit_code(), 143);
    }

    #[cfg(unix)]
    #[test]
    fn keyboard_signals_are_left_to_the_terminal_in_foreground() {
        // Foreground: INT and QUIT come from the terminal, even a targeted kill.
        assert!(!should_relay(true, true));
        assert!(should_relay(false, true));
        // Background or no tty: everything is relayed.
        assert!(should_relay(true, false));
        assert!(should_relay(false, false));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn propagates_exit_code_and_arguments() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("args.txt");
        let script = dir.path().join("child.sh");
        std::fs::write(
            &script,
            format!(
                "#!/bin/sh\nprintf '%s|' \"$@\" > '{}'\nprintf '%s' \"$MARKER\" >> '{}'\nexit 7\n",
                out.display(),
                out.display()
            ),
        )
        .unwrap();
        crate::core::cache::files::ensure_executable(&script).unwrap();

        let args = vec![OsString::from("a b"), OsString::from("--flag")];
        let env = vec![
            (OsString::from("PATH"), OsString::from("/usr/bin:/bin")),
            (OsString::from("MARKER"), OsString::from("m1")),
        ];
        let outcome = run_child(&script, &args, &env).await.unwrap();

        assert_eq!(outcome, ExitOutcome::Exited(7));
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "a b|--flag|m1");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn reports_signal_termination() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("child.sh");
        std::fs::write(&script, "#!/bin/sh\nkill -TERM $$\nsleep 5\n").unwrap();
        crate::core::cache::files::ensure_executable(&script).unwrap();

        let outcome = run_child(&script, &[], &[]).await.unwrap();
        assert_eq!(outcome, ExitOutcome::Signaled(libc::SIGTERM));
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = run_child(&dir.path().join("nope"), &[], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, LauncherError::Spawn { .. }));
    }
}
