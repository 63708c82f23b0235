use anyhow::{Context, Result};
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::{
    io::{self, AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    select,
};
use tokio_tungstenite::{
    MaybeTlsStream,
    tungstenite::{self, Message as WsMessage},
};
use tracing::{info, warn};

use crate::{cli::ClientArgs, message::Message};

pub async fn run(args: ClientArgs) -> Result<()> {
    let url = args.url();
    let (stream, _) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .with_context(|| format!("failed to connect to {url}"))?;

    let local_ip = match stream.get_ref() {
        MaybeTlsStream::Plain(tcp) => tcp.local_addr().ok().map(|addr| addr.ip().to_string()),
        _ => None,
    };

    let mut stdin = BufReader::new(io::stdin());
    let mut stdout = io::stdout();
    let name = resolve_name(args.name, &mut stdin, &mut stdout, local_ip).await?;
    info!(name = name.as_deref().unwrap_or("-"), "connected to {url}");

    let (writer, reader) = stream.split();

    select! {
        result = receive_flow(reader, &mut stdout) => result?,
        result = send_flow(stdin, writer, name) => result?,
        ctrl_c = tokio::signal::ctrl_c() => handle_ctrl_c(ctrl_c),
    }

    Ok(())
}

/// Picks the name attached to outgoing messages.
///
/// A missing or blank `given` name is asked for once on `input`. A blank
/// answer (or end of input) falls back to `fallback`.
pub async fn resolve_name<R, W>(
    given: Option<String>,
    input: &mut R,
    out: &mut W,
    fallback: Option<String>,
) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    if let Some(name) = non_blank(given) {
        return Ok(Some(name));
    }

    write_line(out, "Enter name").await?;
    let mut answer = String::new();
    input
        .read_line(&mut answer)
        .await
        .context("failed to read name")?;

    Ok(non_blank(Some(answer)).or_else(|| non_blank(fallback)))
}

fn non_blank(name: Option<String>) -> Option<String> {
    name.map(|name| name.trim().to_owned())
        .filter(|name| !name.is_empty())
}

/// Renders every message from the server until the socket closes.
///
/// A read or decode error ends the session.
pub async fn receive_flow<S, W>(mut reader: S, out: &mut W) -> Result<()>
where
    S: Stream<Item = Result<WsMessage, tungstenite::Error>> + Unpin,
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = reader.next().await {
        let message = match frame.context("error receiving message")? {
            WsMessage::Text(text) => Message::decode(&text),
            WsMessage::Binary(bytes) => Message::decode_slice(&bytes),
            WsMessage::Close(_) => break,
            _ => continue,
        }
        .context("server sent an undecodable message")?;

        write_line(out, &message.render()).await?;
    }

    write_line(out, "*** server closed the connection").await?;
    Ok(())
}

/// Sends each non-blank input line as a timestamped message.
///
/// Returns on end of input; a write error ends the session.
pub async fn send_flow<R, K>(input: R, mut writer: K, name: Option<String>) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    K: Sink<WsMessage> + Unpin,
    K::Error: std::error::Error + Send + Sync + 'static,
{
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let message = Message::new(name.clone(), line);
        writer
            .send(WsMessage::Text(message.encode()?))
            .await
            .context("error sending message")?;
    }

    if let Err(error) = writer.close().await {
        warn!(%error, "failed to close connection cleanly");
    }
    Ok(())
}

fn handle_ctrl_c(result: io::Result<()>) {
    if let Err(error) = result {
        warn!(?error, "ctrl-c handler failed");
    }
}

async fn write_line<W>(out: &mut W, line: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    out.write_all(line.as_bytes()).await?;
    out.write_all(b"\n").await?;
    out.flush().await
}
