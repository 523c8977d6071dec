use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Sender};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, Span};

use crate::protocol::Protocol;

pub type ProcessCallback<T> = Arc<dyn Fn(T) + Send + Sync>;

/// Callbacks by protocol. A protocol without a callback has no queue and no worker thread.
pub struct ProtocolRoutes<T> {
    callbacks: Vec<Option<ProcessCallback<T>>>,
}

impl <T> Default for ProtocolRoutes<T> {
    fn default() -> Self {
        ProtocolRoutes {
            callbacks: (0..Protocol::COUNT).map(|_| None).collect(),
        }
    }
}

impl <T> ProtocolRoutes<T> {
    pub fn route(mut self, protocol: Protocol, callback: impl Fn(T) + Send + Sync + 'static) -> Self {
        self.callbacks[protocol.index()] = Some(Arc::new(callback));
        self
    }
}

/// Dispatches work items to one worker thread per routed protocol. Items for the same protocol
///  are processed in FIFO order by that protocol's thread, there is no ordering across protocols.
///
/// NB: Workers block on their queue rather than polling it, trading a little wake-up latency for
///  not burning a core per protocol.
pub struct PacketProcessor<T: Send + 'static> {
    name: String,
    running: Arc<AtomicBool>,
    queues: RwLock<Vec<Option<Sender<T>>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl <T: Send + 'static> PacketProcessor<T> {
    pub fn new(name: impl Into<String>) -> PacketProcessor<T> {
        PacketProcessor {
            name: name.into(),
            running: Default::default(),
            queues: Default::default(),
            workers: Default::default(),
        }
    }

    /// Starts a worker thread for every routed protocol. Workers run inside `span`.
    pub fn start(&self, routes: ProtocolRoutes<T>, span: Span) -> anyhow::Result<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            anyhow::bail!("packet processor {} is already running", self.name);
        }

        let mut queues = self.queues.write();
        let mut workers = self.workers.lock();
        queues.clear();

        for (idx, callback) in routes.callbacks.into_iter().enumerate() {
            let Some(callback) = callback else {
                queues.push(None);
                continue;
            };

            let (send, recv) = unbounded::<T>();
            queues.push(Some(send));

            let running = self.running.clone();
            let span = span.clone();
            let handle = std::thread::Builder::new()
                .name(format!("{}-{}", self.name, idx))
                .spawn(move || {
                    let _entered = span.enter();
                    for item in recv.iter() {
                        if !running.load(Ordering::Acquire) {
                            break;
                        }
                        callback(item);
                    }
                    debug!("worker for protocol {} terminated", idx);
                });

            match handle {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    error!("failed to spawn worker thread for protocol {}: {}", idx, e);
                    drop(queues);
                    drop(workers);
                    self.stop();
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }

    /// Returns false if the protocol has no route (or the processor is stopped), in which case
    ///  the item is discarded.
    pub fn enqueue(&self, protocol: Protocol, item: T) -> bool {
        let queues = self.queues.read();
        match queues.get(protocol.index()) {
            Some(Some(queue)) => queue.send(item).is_ok(),
            _ => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stops all workers and waits for them to terminate. Items that are still queued are
    ///  discarded.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        // dropping the senders wakes up the workers
        self.queues.write().clear();

        let workers = std::mem::take(&mut *self.workers.lock());
        let current = std::thread::current().id();
        for worker in workers {
            if worker.thread().id() == current {
                // stopped from inside a callback - that thread terminates when the callback returns
                continue;
            }
            if worker.join().is_err() {
                error!("worker thread of {} panicked", self.name);
            }
        }
    }
}

impl <T: Send + 'static> Drop for PacketProcessor<T> {
    fn drop(&mut self) {
        if self.is_running() {
            self.stop();
        }
    }
}
