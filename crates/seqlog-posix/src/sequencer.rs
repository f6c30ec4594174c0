//! The in-process batching sequencer: coalesces concurrent `add` calls into
//! batches bounded by size or age, then runs each batch through [`Engine`]
//! under the double lock (in-process [`tokio::sync::Mutex`] plus the
//! cross-process advisory file lock `Engine` acquires itself).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;

use seqlog_core::{Entry, Error, Result};

use crate::engine::Engine;

struct QueueItem {
    entry: Box<dyn Entry>,
    respond: oneshot::Sender<Result<u64>>,
}

/// Resolves to the absolute sequence number assigned to one `add` call, once
/// the batch containing it has been committed.
pub struct IndexFuture {
    rx: oneshot::Receiver<Result<u64>>,
}

impl Future for IndexFuture {
    type Output = Result<u64>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(Error::Cancelled)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Handle to the running batcher task. Cloning shares the same queue.
#[derive(Clone)]
pub struct Sequencer {
    tx: mpsc::Sender<QueueItem>,
}

impl Sequencer {
    /// Spawn the batcher task and return a handle to it.
    ///
    /// `channel_capacity` bounds the queue; once full, `add` blocks — this is
    /// the backpressure the caller feels under sustained overload.
    pub fn spawn(
        engine: Arc<Engine>,
        process_lock: Arc<Mutex<()>>,
        batch_max_size: usize,
        batch_max_age: Duration,
        channel_capacity: usize,
        cancel: CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::channel(channel_capacity.max(1));
        tokio::spawn(run(rx, engine, process_lock, batch_max_size, batch_max_age, cancel));
        Self { tx }
    }

    /// Queue `entry`, returning a future that resolves once it is committed.
    ///
    /// Blocks only if the queue is full; does not wait for the batch itself.
    pub async fn add(&self, entry: Box<dyn Entry>) -> IndexFuture {
        let (respond, rx) = oneshot::channel();
        if self.tx.send(QueueItem { entry, respond }).await.is_err() {
            // The batcher task is gone (shut down); the future will resolve
            // to `Cancelled` once polled, since `rx` is immediately closed.
        }
        IndexFuture { rx }
    }
}

async fn run(
    mut rx: mpsc::Receiver<QueueItem>,
    engine: Arc<Engine>,
    process_lock: Arc<Mutex<()>>,
    batch_max_size: usize,
    batch_max_age: Duration,
    cancel: CancellationToken,
) {
    loop {
        let mut buf = Vec::new();

        tokio::select! {
            () = cancel.cancelled() => break,
            item = rx.recv() => match item {
                Some(item) => buf.push(item),
                None => break,
            },
        }

        let deadline = tokio::time::sleep(batch_max_age);
        tokio::pin!(deadline);

        while buf.len() < batch_max_size {
            tokio::select! {
                () = cancel.cancelled() => break,
                () = &mut deadline => break,
                item = rx.recv() => match item {
                    Some(item) => buf.push(item),
                    None => break,
                },
            }
            if cancel.is_cancelled() {
                break;
            }
        }

        flush(&engine, &process_lock, buf).await;

        if cancel.is_cancelled() {
            break;
        }
    }

    // Drain and fail whatever is left in the channel after shutdown.
    rx.close();
    while let Ok(item) = rx.try_recv() {
        let _ = item.respond.send(Err(Error::Cancelled));
    }
}

async fn flush(engine: &Arc<Engine>, process_lock: &Arc<Mutex<()>>, batch: Vec<QueueItem>) {
    if batch.is_empty() {
        return;
    }
    let mut entries = Vec::with_capacity(batch.len());
    let mut responders = Vec::with_capacity(batch.len());
    for item in batch {
        entries.push(item.entry);
        responders.push(item.respond);
    }

    let _guard = process_lock.lock().await;
    let engine = Arc::clone(engine);
    let result = tokio::task::spawn_blocking(move || engine.sequence_entries(entries)).await;

    match result {
        Ok(Ok(range)) => {
            for (i, respond) in responders.into_iter().enumerate() {
                let _ = respond.send(Ok(range.start + i as u64));
            }
        }
        Ok(Err(e)) => {
            let msg = e.to_string();
            for respond in responders {
                let _ = respond.send(Err(Error::BatchFailed(msg.clone())));
            }
        }
        Err(_join_error) => {
            for respond in responders {
                let _ = respond.send(Err(Error::Cancelled));
            }
        }
    }
}
