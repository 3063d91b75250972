//! RPC server: accepts local stream connections, reads framed requests and
//! feeds them to a fixed pool of workers.
//!
//! One reader task per connection admits a single frame at a time onto a
//! shared FIFO queue; workers pop, dispatch against the shared backend
//! context, and write the framed response through the connection's write
//! half. The reader does not take the next frame until the previous
//! response has been written, so responses on one connection go out in
//! request order while requests on distinct connections are served in
//! parallel. Connections stay open for sequential requests; protocol
//! violations and short reads close them without a response.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::actions;
use crate::errors::SimulatorError;
use crate::ipc::protocol;
use crate::registry::SharedContext;

/// Default worker pool size.
pub const DEFAULT_WORKERS: usize = 4;
/// Pending-request backlog shared by all connections.
const QUEUE_DEPTH: usize = 256;

struct ClientTask {
    request: Bytes,
    writer: Arc<Mutex<OwnedWriteHalf>>,
    /// Signalled once the response has been written (or the write was
    /// abandoned), releasing the connection's reader for the next frame.
    done: oneshot::Sender<()>,
}

struct RunningState {
    stop_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

pub struct IpcServer {
    socket_path: PathBuf,
    worker_count: usize,
    running: Option<RunningState>,
}

impl IpcServer {
    pub fn new(socket_path: impl Into<PathBuf>, worker_count: usize) -> Self {
        IpcServer {
            socket_path: socket_path.into(),
            worker_count: if worker_count > 0 {
                worker_count
            } else {
                DEFAULT_WORKERS
            },
            running: None,
        }
    }

    /// Bind the socket (removing any stale file first) and spawn the
    /// acceptor plus the worker pool.
    pub async fn start(&mut self, context: SharedContext) -> Result<(), SimulatorError> {
        if self.running.is_some() {
            return Ok(());
        }

        // Clean up any stale socket file from a previous run.
        let _ = std::fs::remove_file(&self.socket_path);
        let listener = UnixListener::bind(&self.socket_path)?;
        info!("IPC server listening on {}", self.socket_path.display());

        let (stop_tx, stop_rx) = watch::channel(false);
        let (task_tx, task_rx) = mpsc::channel::<ClientTask>(QUEUE_DEPTH);
        let task_rx = Arc::new(Mutex::new(task_rx));

        let mut tasks = Vec::with_capacity(self.worker_count + 1);
        for worker_id in 0..self.worker_count {
            let task_rx = task_rx.clone();
            let context = context.clone();
            tasks.push(tokio::spawn(worker_loop(worker_id, task_rx, context)));
        }
        tasks.push(tokio::spawn(accept_loop(listener, task_tx, stop_rx)));

        self.running = Some(RunningState { stop_tx, tasks });
        Ok(())
    }

    /// Stop the acceptor, drain the workers and unlink the socket file.
    /// Idempotent.
    pub async fn stop(&mut self) {
        let Some(state) = self.running.take() else {
            return;
        };
        let _ = state.stop_tx.send(true);
        for task in state.tasks {
            let _ = task.await;
        }
        let _ = std::fs::remove_file(&self.socket_path);
        info!("IPC server stopped, socket cleaned up");
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

async fn accept_loop(
    listener: UnixListener,
    task_tx: mpsc::Sender<ClientTask>,
    stop_rx: watch::Receiver<bool>,
) {
    let mut stop = stop_rx.clone();
    loop {
        tokio::select! {
            _ = stop.changed() => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _addr)) => {
                        tokio::spawn(handle_connection(stream, task_tx.clone(), stop_rx.clone()));
                    }
                    Err(e) => {
                        warn!("Failed to accept IPC connection: {}", e);
                    }
                }
            }
        }
    }
}

/// Feed one connection's frames to the worker pool, one frame in flight at
/// a time: the next frame is not taken off the socket buffer until the
/// previous response has been written back.
async fn handle_connection(
    stream: UnixStream,
    task_tx: mpsc::Sender<ClientTask>,
    mut stop: watch::Receiver<bool>,
) {
    debug!("New IPC connection established");

    let (mut read_half, write_half) = stream.into_split();
    let writer = Arc::new(Mutex::new(write_half));

    let mut buf = BytesMut::with_capacity(4096);
    let mut read_buf = [0u8; 4096];

    loop {
        // Pull exactly one frame, refilling from the socket as needed.
        let request = loop {
            match protocol::extract_frame(&mut buf) {
                Ok(Some(request)) => break request,
                Ok(None) => {}
                Err(e) => {
                    // Oversized frame: drop the connection without a
                    // response rather than allocate for it.
                    error!("IPC protocol error: {}", e);
                    return;
                }
            }

            let read = tokio::select! {
                _ = stop.changed() => return,
                read = read_half.read(&mut read_buf) => read,
            };
            match read {
                Ok(0) => {
                    debug!("IPC client disconnected");
                    return;
                }
                Ok(n) => buf.extend_from_slice(&read_buf[..n]),
                Err(e) => {
                    debug!("IPC read error: {}", e);
                    return;
                }
            }
        };

        let (done_tx, done_rx) = oneshot::channel();
        let task = ClientTask {
            request,
            writer: writer.clone(),
            done: done_tx,
        };
        if task_tx.send(task).await.is_err() {
            return;
        }

        // Wait for the response write before admitting the next frame.
        tokio::select! {
            _ = stop.changed() => return,
            _ = done_rx => {}
        }
    }
}

/// Pop tasks off the shared queue, dispatch, write the response back and
/// release the connection's reader.
async fn worker_loop(
    worker_id: usize,
    task_rx: Arc<Mutex<mpsc::Receiver<ClientTask>>>,
    context: SharedContext,
) {
    loop {
        let task = {
            let mut rx = task_rx.lock().await;
            rx.recv().await
        };
        let Some(task) = task else {
            debug!("IPC worker {} exiting", worker_id);
            return;
        };

        let response = actions::dispatch(&task.request, &context).await;
        let framed = protocol::encode_frame(&response);

        {
            let mut writer = task.writer.lock().await;
            if let Err(e) = writer.write_all(&framed).await {
                // Client may have gone away while we were processing.
                debug!("Failed to send IPC response: {}", e);
            }
        }
        let _ = task.done.send(());
    }
}
