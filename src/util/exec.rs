// 执行外部命令 (带超时, 超时即杀进程)
// 大数据量走流式接口: stdout 边读边写入 sink, stdin 边读 source 边写入

use std::io::{self, Read, Write};
use std::process::{ExitStatus, Output, Stdio};
use std::time::Duration;

use encoding::label::encoding_from_whatwg_label;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::ExternalToolError;

const PIPE_BUF: usize = 64 * 1024;

fn spawn(program: &str, command: &mut Command) -> Result<Child, ExternalToolError> {
    debug!("running {}", program);
    command.kill_on_drop(true).spawn().map_err(|source| ExternalToolError::Spawn {
        program: program.to_string(),
        source,
    })
}

fn io_error(program: &str, source: io::Error) -> ExternalToolError {
    ExternalToolError::Io {
        program: program.to_string(),
        source,
    }
}

fn timed_out(program: &str, limit: Duration) -> ExternalToolError {
    ExternalToolError::Timeout {
        program: program.to_string(),
        secs: limit.as_secs(),
    }
}

// stderr 单独读取, 避免管道写满卡住子进程
fn collect_stderr(child: &mut Child) -> JoinHandle<Vec<u8>> {
    let stderr = child.stderr.take();
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = stderr {
            let _ = pipe.read_to_end(&mut buf).await;
        }
        buf
    })
}

fn check_status(program: &str, status: ExitStatus, stderr: &[u8]) -> Result<(), ExternalToolError> {
    if status.success() {
        return Ok(());
    }
    Err(ExternalToolError::Exit {
        program: program.to_string(),
        code: status.code(),
        stderr: decode_stderr(stderr).trim().to_string(),
    })
}

// 短命令, 返回完整输出
pub async fn run_with_timeout(
    program: &str,
    mut command: Command,
    limit: Duration,
) -> Result<Output, ExternalToolError> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let child = spawn(program, &mut command)?;

    let output = match tokio::time::timeout(limit, child.wait_with_output()).await {
        Ok(res) => res.map_err(|source| io_error(program, source))?,
        Err(_) => return Err(timed_out(program, limit)),
    };
    check_status(program, output.status, &output.stderr)?;
    Ok(output)
}

// stdout 边产生边写入 sink, 返回字节数
pub async fn stream_stdout<W>(
    program: &str,
    mut command: Command,
    sink: &mut W,
    limit: Duration,
) -> Result<u64, ExternalToolError>
where
    W: Write + Send,
{
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child = spawn(program, &mut command)?;
    let stderr = collect_stderr(&mut child);
    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| io_error(program, io::Error::other("stdout not captured")))?;

    let copy = async {
        let mut buf = vec![0u8; PIPE_BUF];
        let mut total = 0u64;
        loop {
            let n = stdout.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            sink.write_all(&buf[..n])?;
            total += n as u64;
        }
        let status = child.wait().await?;
        Ok::<_, io::Error>((status, total))
    };

    // 超时或出错返回时 child 被 drop, kill_on_drop 结束进程
    let (status, total) = match tokio::time::timeout(limit, copy).await {
        Ok(res) => res.map_err(|source| io_error(program, source))?,
        Err(_) => return Err(timed_out(program, limit)),
    };
    check_status(program, status, &stderr.await.unwrap_or_default())?;
    Ok(total)
}

// source 读到 EOF 为止写入 stdin
// source 出错时杀掉子进程而不是关闭 stdin, 截断的输入不会被当成完整的
pub async fn stream_stdin<R>(
    program: &str,
    mut command: Command,
    source: &mut R,
    limit: Duration,
) -> Result<(), ExternalToolError>
where
    R: Read + Send,
{
    command
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());
    let mut child = spawn(program, &mut command)?;
    let stderr = collect_stderr(&mut child);
    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| io_error(program, io::Error::other("stdin not captured")))?;

    let feed = async {
        let mut buf = vec![0u8; PIPE_BUF];
        let fed: io::Result<()> = loop {
            let n = match source.read(&mut buf) {
                Ok(0) => break Ok(()),
                Ok(n) => n,
                Err(e) => break Err(e),
            };
            if let Err(e) = stdin.write_all(&buf[..n]).await {
                break Err(e);
            }
        };
        if fed.is_err() {
            let _ = child.start_kill();
        }
        drop(stdin);
        (fed, child.wait().await)
    };

    let (fed, status) = match tokio::time::timeout(limit, feed).await {
        Ok(res) => res,
        Err(_) => return Err(timed_out(program, limit)),
    };
    let status = status.map_err(|source| io_error(program, source))?;

    match fed {
        // 子进程提前退出导致的断管以退出码为准
        Err(e) if e.kind() != io::ErrorKind::BrokenPipe => Err(io_error(program, e)),
        _ => check_status(program, status, &stderr.await.unwrap_or_default()),
    }
}

// 解码错误的输出
// 非utf8时按gbk解码 (windows中文控制台)
pub fn decode_stderr(data: &[u8]) -> String {
    if let Ok(text) = std::str::from_utf8(data) {
        return text.to_string();
    }
    let encoding = encoding_from_whatwg_label("gbk").unwrap_or(encoding::all::UTF_8);
    encoding
        .decode(data, encoding::DecoderTrap::Replace)
        .unwrap_or_else(|_| String::from_utf8_lossy(data).to_string())
}
