use std::{path::Path, process::Stdio, time::Duration};

use anyhow::{Context, Result, anyhow};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::{Child, ChildStdin, ChildStdout, Command},
    time::timeout,
};

const READ_TIMEOUT: Duration = Duration::from_secs(3);

#[tokio::test]
async fn cli_chat_end_to_end() -> Result<()> {
    let binary = assert_cmd::cargo::cargo_bin!("room-chat");

    let mut server = Process::spawn(&binary, &["server", "--listen", "127.0.0.1:0"], "info")?;
    let banner = server.next_line().await?;
    let addr = banner
        .split_whitespace()
        .last()
        .filter(|addr| addr.contains(':'))
        .with_context(|| format!("unexpected server banner: {banner}"))?
        .to_string();
    // Keep the log pipe from filling up while clients talk.
    let mut server_logs = server.stdout;
    let log_task = tokio::spawn(async move {
        let _ = tokio::io::copy(&mut server_logs, &mut tokio::io::sink()).await;
    });

    let mut alice = Process::spawn(&binary, &["client", "--server", &addr], "warn")?;
    alice.send("/nick alice").await?;
    alice.expect("all right, i will call you alice").await?;
    alice.send("/join lobby").await?;
    alice.expect("welcome to lobby").await?;

    let mut bob = Process::spawn(&binary, &["client", "--server", &addr], "warn")?;
    bob.send("/nick bob").await?;
    bob.expect("all right, i will call you bob").await?;
    bob.send("/join lobby").await?;
    bob.expect("welcome to lobby").await?;
    alice.expect("bob has joined the room").await?;

    bob.send("/msg lobby hello").await?;
    alice.expect("bob: hello").await?;

    bob.send("/quit").await?;
    bob.expect("sad to see you go :(").await?;
    bob.expect("*** server closed the connection").await?;
    alice.expect("bob has left the room!").await?;
    assert!(bob.child.wait().await?.success(), "bob client failed");

    alice.send("/quit").await?;
    alice.expect("sad to see you go :(").await?;
    alice.expect("*** server closed the connection").await?;
    assert!(alice.child.wait().await?.success(), "alice client failed");

    let _ = server.child.kill().await;
    let _ = server.child.wait().await;
    let _ = log_task.await;
    Ok(())
}

struct Process {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl Process {
    fn spawn(binary: &Path, args: &[&str], log_level: &str) -> Result<Self> {
        let mut child = Command::new(binary)
            .args(args)
            .env("RUST_LOG", log_level)
            .env("NO_COLOR", "1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn {args:?}"))?;

        let stdin = child.stdin.take().context("stdin missing after spawn")?;
        let stdout = child.stdout.take().context("stdout missing after spawn")?;
        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        })
    }

    async fn send(&mut self, line: &str) -> Result<()> {
        self.stdin
            .write_all(format!("{line}\n").as_bytes())
            .await
            .with_context(|| format!("failed to send line '{line}'"))?;
        self.stdin.flush().await?;
        Ok(())
    }

    async fn next_line(&mut self) -> Result<String> {
        let mut line = String::new();
        let bytes = timeout(READ_TIMEOUT, self.stdout.read_line(&mut line))
            .await
            .context("timed out waiting for line")??;
        if bytes == 0 {
            return Err(anyhow!("stream closed"));
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    async fn expect(&mut self, expected: &str) -> Result<()> {
        let line = self
            .next_line()
            .await
            .with_context(|| format!("waiting for '{expected}'"))?;
        if line != expected {
            return Err(anyhow!("expected '{expected}', got '{line}'"));
        }
        Ok(())
    }
}
