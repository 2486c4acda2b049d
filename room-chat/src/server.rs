use std::{future::Future, net::SocketAddr};

use anyhow::{Context, Result};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    select,
    task::JoinSet,
};
use tracing::{debug, info, warn};

use crate::{
    cli::ServerArgs,
    command::{Command, ParsedLine, parse_line},
    dispatcher::{CommandQueue, DEFAULT_QUEUE_CAPACITY, spawn_dispatcher},
    session::{OutboundReceiver, SessionHandle, SessionIds, outbound},
};

pub const DEFAULT_OUTBOUND_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy)]
pub struct ServerConfig {
    pub queue_capacity: usize,
    pub outbound_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
        }
    }
}

impl From<&ServerArgs> for ServerConfig {
    fn from(args: &ServerArgs) -> Self {
        Self {
            queue_capacity: args.queue_capacity,
            outbound_capacity: args.outbound_capacity,
        }
    }
}

pub struct Server {
    listener: TcpListener,
    config: ServerConfig,
    ids: SessionIds,
}

impl Server {
    pub fn new(listener: TcpListener, config: ServerConfig) -> Self {
        Self {
            listener,
            config,
            ids: SessionIds::new(),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server {
            listener,
            config,
            ids,
        } = self;
        let (queue, dispatcher) = spawn_dispatcher(config.queue_capacity);
        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!("server shutting down");
                    break;
                }
                accept_result = listener.accept() => match accept_result {
                    Ok((stream, peer)) => {
                        let (tx, rx) = outbound(config.outbound_capacity);
                        let handle = SessionHandle::new(ids.next(), tx);
                        info!(session = %handle.id, %peer, "client connected");
                        connections.spawn(handle_connection(stream, peer, handle, rx, queue.clone()));
                    }
                    Err(err) => warn!(error = ?err, "failed to accept connection"),
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        // Producers hold the only queue senders; once they are gone the
        // dispatcher applies whatever is left and stops.
        connections.shutdown().await;
        drop(queue);
        dispatcher.await.context("dispatcher task failed")?;

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    handle: SessionHandle,
    outbound: OutboundReceiver,
    queue: CommandQueue,
) {
    let (reader, writer) = stream.into_split();

    let outcome = select! {
        result = read_commands(BufReader::new(reader), &handle, &queue) => result,
        result = write_lines(writer, outbound) => result,
    };
    if let Err(err) = outcome {
        warn!(session = %handle.id, %peer, error = ?err, "client connection closed with error");
    }

    if queue.enqueue(Command::disconnect(handle.clone())).await.is_err() {
        debug!(session = %handle.id, "dispatcher gone before disconnect");
    }
    info!(session = %handle.id, %peer, "client disconnected");
}

/// Turns each inbound line into one command, in the order lines arrive.
async fn read_commands<R>(mut reader: R, handle: &SessionHandle, queue: &CommandQueue) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        // Undecodable bytes become U+FFFD rather than ending the session.
        let line = String::from_utf8_lossy(&buf);
        match parse_line(&line) {
            ParsedLine::Blank => {}
            ParsedLine::Unknown(verb) => {
                debug!(session = %handle.id, %verb, "ignoring unknown command");
            }
            ParsedLine::Command { kind, args } => {
                queue
                    .enqueue(Command::new(kind, handle.clone(), args))
                    .await?;
            }
        }
    }
    Ok(())
}

/// Writes queued lines until the session is closed, then hangs up.
///
/// An aborted session is dropped mid-write: its peer is not reading, so
/// neither the pending write nor a graceful shutdown would complete.
async fn write_lines<W>(mut writer: W, mut outbound: OutboundReceiver) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let aborted = outbound.abort_signal();
    let flushed = select! {
        result = flush_lines(&mut writer, &mut outbound) => result.map(|()| true),
        _ = aborted.wait() => Ok(false),
    }?;

    if flushed {
        writer.shutdown().await?;
    } else {
        debug!("outbound aborted, hanging up without flushing");
    }
    Ok(())
}

async fn flush_lines<W>(writer: &mut W, outbound: &mut OutboundReceiver) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = outbound.next().await {
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }
    Ok(())
}
