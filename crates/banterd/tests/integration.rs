use anyhow::{Context, Result};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::Duration;
use tempfile::tempdir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;

struct TestBot {
    child: Child,
    _dir: tempfile::TempDir,
}

impl Drop for TestBot {
    fn drop(&mut self) {
        let _ = self.child.kill();
    }
}

struct FakeServer {
    reader: tokio::io::Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl FakeServer {
    async fn send(&mut self, line: &str) -> Result<()> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\r\n").await?;
        Ok(())
    }

    async fn expect(&mut self, expected: &str) -> Result<()> {
        let line = self.next().await?;
        anyhow::ensure!(line == expected, "expected {expected:?}, got {line:?}");
        Ok(())
    }

    async fn next(&mut self) -> Result<String> {
        match tokio::time::timeout(Duration::from_secs(5), self.reader.next_line()).await {
            Ok(Ok(Some(line))) => Ok(line),
            Ok(Ok(None)) => anyhow::bail!("connection closed"),
            Ok(Err(err)) => Err(err.into()),
            Err(_) => anyhow::bail!("timeout waiting for bot line"),
        }
    }

    async fn expect_handshake(&mut self) -> Result<()> {
        self.expect("USER banter banter banter :banter").await?;
        self.expect("NICK banter").await?;
        self.expect("NICKSERV IDENTIFY pw").await?;
        self.expect("JOIN #test").await?;
        Ok(())
    }
}

fn config_for(port: u16) -> String {
    format!(
        r##"
admin = "boss!b@host"
command_key = "!"

[irc]
server = "127.0.0.1"
port = {port}
nick = "banter"
nickpass = "pw"
channels = ["#test"]

[rate_limit]
messages = 5
seconds = 10

[generation]
api_key = "test-key"
endpoint = "http://127.0.0.1:9/v1/completions"
timeout_secs = 2
"##
    )
}

async fn start_bot() -> Result<(TestBot, FakeServer)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();

    let dir = tempdir()?;
    let config_path = dir.path().join("banter.toml");
    std::fs::write(&config_path, config_for(port))?;

    let child = Command::new(env!("CARGO_BIN_EXE_banterd"))
        .arg("--config")
        .arg(&config_path)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .context("spawn banterd")?;
    let bot = TestBot { child, _dir: dir };

    let (stream, _) = tokio::time::timeout(Duration::from_secs(10), listener.accept())
        .await
        .context("bot never connected")??;
    let (reader, writer) = stream.into_split();
    let server = FakeServer {
        reader: BufReader::new(reader).lines(),
        writer,
    };
    Ok((bot, server))
}

async fn wait_exit(bot: &mut TestBot) -> Result<ExitStatus> {
    for _ in 0..50 {
        if let Some(status) = bot.child.try_wait()? {
            return Ok(status);
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    anyhow::bail!("bot did not exit");
}

#[tokio::test]
async fn handshake_ping_and_shutdown() -> Result<()> {
    let (mut bot, mut server) = start_bot().await?;
    server.expect_handshake().await?;

    server.send("PING :abc").await?;
    server.expect("PONG :abc").await?;

    server
        .send(":NickServ!N@services NOTICE banter :Password accepted")
        .await?;
    server.expect("JOIN #test").await?;

    server.send(":boss!b@host PRIVMSG #test :!shutdown").await?;
    let status = wait_exit(&mut bot).await?;
    assert!(status.success());
    Ok(())
}

#[tokio::test]
async fn admin_commands_and_silent_generation_failure() -> Result<()> {
    let (mut bot, mut server) = start_bot().await?;
    server.expect_handshake().await?;

    server.send(":boss!b@host PRIVMSG #test :!join #other").await?;
    server.expect("JOIN #other").await?;

    server.send(":boss!b@host PRIVMSG #test :!part").await?;
    server.expect("PART #test").await?;

    server.send(":boss!b@host PRIVMSG #test :!frobnicate").await?;
    server
        .expect("PRIVMSG #test :boss: unknown command frobnicate")
        .await?;

    // The backend is unreachable, so a mention produces no channel output.
    server.send(":alice!a@h PRIVMSG #test :banter are you there").await?;
    server.send(":boss!b@host PRIVMSG #test :!join #after").await?;
    server.expect("JOIN #after").await?;

    server.send(":boss!b@host PRIVMSG #test :!shutdown").await?;
    assert!(wait_exit(&mut bot).await?.success());
    Ok(())
}

#[tokio::test]
async fn non_admin_cannot_run_commands() -> Result<()> {
    let (mut bot, mut server) = start_bot().await?;
    server.expect_handshake().await?;

    server.send(":mallory!m@h PRIVMSG #test :!join #evil").await?;
    server.send(":mallory!m@h PRIVMSG #test :!shutdown").await?;
    server.send(":boss!b@host PRIVMSG #test :!join #ok").await?;
    server.expect("JOIN #ok").await?;

    server.send(":boss!b@host PRIVMSG #test :!shutdown").await?;
    assert!(wait_exit(&mut bot).await?.success());
    Ok(())
}

#[tokio::test]
async fn remote_close_ends_process() -> Result<()> {
    let (mut bot, mut server) = start_bot().await?;
    server.expect_handshake().await?;
    drop(server);

    assert!(wait_exit(&mut bot).await?.success());
    Ok(())
}

#[tokio::test]
async fn unreachable_server_is_fatal() -> Result<()> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    let port = listener.local_addr()?.port();
    drop(listener);

    let dir = tempdir()?;
    let config_path = dir.path().join("banter.toml");
    std::fs::write(&config_path, config_for(port))?;
    let child = Command::new(env!("CARGO_BIN_EXE_banterd"))
        .arg("--config")
        .arg(&config_path)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;
    let mut bot = TestBot { child, _dir: dir };

    assert!(!wait_exit(&mut bot).await?.success());
    Ok(())
}
