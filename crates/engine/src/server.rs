// HDB - Hardware Debugger
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! The debug socket server.
//!
//! Newline-delimited JSON over a persistent TCP socket. Inbound lines are
//! handed to the session's dispatch callback on the server thread; outbound
//! messages (responses and pushed hit events) fan out to every connected
//! client. The tokio runtime lives entirely on the server thread - the rest
//! of the debugger is synchronous.

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::JoinHandle;

use eyre::{Context, Result};
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};

/// Dispatch callback invoked with each inbound request line.
pub type OnMessage = Arc<dyn Fn(&str) + Send + Sync>;

/// Handle to the running server thread.
pub struct DebugServer {
    outbound: broadcast::Sender<String>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    port: u16,
}

impl DebugServer {
    /// Bind and start serving on a background thread. A bind failure is
    /// fatal and reported synchronously.
    pub fn start(port: u16, on_message: OnMessage) -> Result<Self> {
        let (outbound, _) = broadcast::channel(256);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (bind_tx, bind_rx) = std::sync::mpsc::channel::<Result<SocketAddr>>();

        let broadcaster = outbound.clone();
        let worker = std::thread::Builder::new()
            .name("hdb-server".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_io()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = bind_tx.send(Err(e).wrap_err("unable to build server runtime"));
                        return;
                    }
                };
                runtime.block_on(serve(port, broadcaster, on_message, shutdown_rx, bind_tx));
            })
            .wrap_err("unable to spawn server thread")?;

        let addr = bind_rx
            .recv()
            .wrap_err("server thread exited before binding")?
            .wrap_err_with(|| format!("unable to bind debug server on port {port}"))?;
        info!(addr = %addr, "debug server listening");

        Ok(Self {
            outbound,
            shutdown: Mutex::new(Some(shutdown_tx)),
            worker: Mutex::new(Some(worker)),
            port: addr.port(),
        })
    }

    /// The bound port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Send a message to every connected client. Messages sent while no
    /// client is connected are dropped.
    pub fn send(&self, message: String) {
        let _ = self.outbound.send(message);
    }

    /// A cloneable sink that forwards into the outbound broadcast.
    pub fn outbound_sink(&self) -> Box<dyn Fn(String) + Send + Sync> {
        let sender = self.outbound.clone();
        Box::new(move |message| {
            let _ = sender.send(message);
        })
    }

    /// Stop accepting, drop all connections, and join the server thread.
    ///
    /// `stop` may be issued from a handler running on the server thread
    /// itself (the client's `stop` command); joining would self-deadlock,
    /// so the thread is detached in that case.
    pub fn stop(&self) {
        if let Some(shutdown) = self.shutdown.lock().take() {
            let _ = shutdown.send(());
        }
        if let Some(worker) = self.worker.lock().take() {
            if worker.thread().id() != std::thread::current().id() {
                let _ = worker.join();
            }
        }
    }
}

impl Drop for DebugServer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn serve(
    port: u16,
    outbound: broadcast::Sender<String>,
    on_message: OnMessage,
    mut shutdown: oneshot::Receiver<()>,
    bind_tx: std::sync::mpsc::Sender<Result<SocketAddr>>,
) {
    let listener = match TcpListener::bind(("127.0.0.1", port)).await {
        Ok(listener) => listener,
        Err(e) => {
            let _ = bind_tx.send(Err(e.into()));
            return;
        }
    };
    let addr = match listener.local_addr() {
        Ok(addr) => addr,
        Err(e) => {
            let _ = bind_tx.send(Err(e.into()));
            return;
        }
    };
    let _ = bind_tx.send(Ok(addr));

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        debug!(peer = %peer, "client connected");
                        let outbound = outbound.subscribe();
                        let on_message = on_message.clone();
                        tokio::spawn(handle_client(stream, outbound, on_message));
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                }
            }
            _ = &mut shutdown => {
                info!("debug server shutting down");
                break;
            }
        }
    }
}

async fn handle_client(
    stream: TcpStream,
    mut outbound: broadcast::Receiver<String>,
    on_message: OnMessage,
) {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if !line.is_empty() {
                            on_message(line);
                        }
                    }
                    Ok(None) => {
                        debug!("client disconnected");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "client read failed");
                        break;
                    }
                }
            }
            message = outbound.recv() => {
                match message {
                    Ok(mut message) => {
                        message.push('\n');
                        if writer.write_all(message.as_bytes()).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "client fell behind; messages dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
}
