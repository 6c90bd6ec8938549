//! Process-spawn collaborator.
//!
//! Stages never touch `tokio::process` directly; they go through
//! [`ProcessSpawner`] so export and listing logic can run against scripted
//! processes in tests.

use std::{io, process::Stdio};

use futures::future::BoxFuture;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::Command,
};

/// A command to run: program, arguments and extra environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Program and arguments, for logs. Environment values are never shown.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

pub type ProcessStream = Box<dyn AsyncRead + Send + Unpin>;

/// A running process. Both output streams must be drained while waiting on
/// `exit`, otherwise a chatty process can block on a full pipe.
pub struct SpawnedProcess {
    pub stdout: ProcessStream,
    pub stderr: ProcessStream,
    /// Resolves to the exit code once the process is gone. Killed processes
    /// report `-1`.
    pub exit: BoxFuture<'static, io::Result<i32>>,
}

pub trait ProcessSpawner: Send + Sync {
    fn spawn(&self, command: &CommandSpec) -> io::Result<SpawnedProcess>;
}

/// Spawns real processes through tokio.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSpawner;

impl ProcessSpawner for TokioSpawner {
    fn spawn(&self, command: &CommandSpec) -> io::Result<SpawnedProcess> {
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .envs(command.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("child stdout was not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| io::Error::other("child stderr was not captured"))?;

        Ok(SpawnedProcess {
            stdout: Box::new(stdout),
            stderr: Box::new(stderr),
            exit: Box::pin(async move {
                let status = child.wait().await?;
                Ok(status.code().unwrap_or(-1))
            }),
        })
    }
}

/// Output of a process run to completion with both streams buffered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CapturedOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Run `command` and buffer its output. Only for commands with small output
/// (listings); dumps are streamed instead.
pub async fn capture(
    spawner: &dyn ProcessSpawner,
    command: &CommandSpec,
) -> io::Result<CapturedOutput> {
    let SpawnedProcess {
        mut stdout,
        mut stderr,
        exit,
    } = spawner.spawn(command)?;

    let mut out = Vec::new();
    let mut err = Vec::new();
    let (read_out, read_err, code) = tokio::join!(
        stdout.read_to_end(&mut out),
        stderr.read_to_end(&mut err),
        exit
    );
    read_out?;
    read_err?;

    Ok(CapturedOutput {
        code: code?,
        stdout: String::from_utf8_lossy(&out).into_owned(),
        stderr: String::from_utf8_lossy(&err).into_owned(),
    })
}


#[cfg(test)]
mod tests {
    use super::{
        test_support::{Script, ScriptedSpawner},
        *,
    };

    #[test]
    fn test_display_hides_env() {
        let command = CommandSpec::new("mysqldump")
            .args(["--host=db", "--databases", "shop"])
            .env("MYSQL_PWD", "secret");
        assert_eq!(command.display(), "mysqldump --host=db --databases shop");
        assert!(!command.display().contains("secret"));
    }

    #[tokio::test]
    async fn test_capture_scripted() {
        let spawner = ScriptedSpawner::default().on("mysql", Script::ok("a\nb\n"));
        let output = capture(&spawner, &CommandSpec::new("mysql")).await.unwrap();
        assert!(output.success());
        assert_eq!(output.stdout, "a\nb\n");
        assert_eq!(spawner.call_count(), 1);
    }

    #[tokio::test]
    async fn test_capture_missing_program() {
        let spawner = ScriptedSpawner::default().on("mysql", Script::missing_program());
        let err = capture(&spawner, &CommandSpec::new("mysql")).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_tokio_spawner_reports_exit_code_and_streams() {
        let command = CommandSpec::new("sh")
            .arg("-c")
            .arg("printf out; printf err >&2; exit 3");
        let output = capture(&TokioSpawner, &command).await.unwrap();
        assert_eq!(output.code, 3);
        assert_eq!(output.stdout, "out");
        assert_eq!(output.stderr, "err");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_tokio_spawner_passes_env() {
        let command = CommandSpec::new("sh")
            .arg("-c")
            .arg("printf \"$STOWAWAY_TEST_VAR\"")
            .env("STOWAWAY_TEST_VAR", "hello");
        let output = capture(&TokioSpawner, &command).await.unwrap();
        assert_eq!(output.stdout, "hello");
    }
}
