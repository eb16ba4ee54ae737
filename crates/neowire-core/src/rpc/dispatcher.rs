//! Request/response correlation.
//!
//! The dispatcher hands out request ids, writes request frames, and holds
//! replies until the caller that issued the request claims them. The listener
//! task is the only producer of replies and notifications; any number of
//! tasks may issue and claim concurrently.
//!
//! # Locking
//!
//! Replies and notifications sit behind two independent `std::sync::Mutex`es
//! that are never held together and never held across an `.await`. The write
//! half of the transport belongs to a writer task fed through a channel, so
//! frames are written whole and in id order even if the issuing future is
//! dropped part way through.

use super::message::Message;
use crate::cancel::CancellationToken;
use crate::catalog::MethodCatalog;
use crate::error::{Result, WireError};
use crate::transport::BoxedWriter;
use rmpv::Value;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot, Notify};
use tracing::{debug, warn};

/// Method id of the handshake call that returns the API description.
pub const BOOTSTRAP_METHOD_ID: u64 = 0;

/// A method given either by catalog name or by raw id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodRef<'a> {
    Id(u64),
    Name(&'a str),
}

impl From<u64> for MethodRef<'_> {
    fn from(id: u64) -> Self {
        MethodRef::Id(id)
    }
}

impl<'a> From<&'a str> for MethodRef<'a> {
    fn from(name: &'a str) -> Self {
        MethodRef::Name(name)
    }
}

impl<'a> From<&'a String> for MethodRef<'a> {
    fn from(name: &'a String) -> Self {
        MethodRef::Name(name.as_str())
    }
}

/// A response as seen by the claiming caller.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// The error slot was nil; this is the result slot.
    Success(Value),
    /// The error slot was set; this is the error value.
    Failure(Value),
}

impl Reply {
    /// Build a reply from the two response slots.
    pub fn from_parts(error: Option<Value>, result: Value) -> Self {
        match error {
            Some(error) if !error.is_nil() => Reply::Failure(error),
            _ => Reply::Success(result),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Reply::Failure(_))
    }

    /// Split into success and error channels.
    pub fn into_result(self) -> std::result::Result<Value, Value> {
        match self {
            Reply::Success(value) => Ok(value),
            Reply::Failure(error) => Err(error),
        }
    }

    /// Collapse to a single value, error or result, whichever was sent.
    pub fn into_value(self) -> Value {
        match self {
            Reply::Success(value) | Reply::Failure(value) => value,
        }
    }

    pub fn value(&self) -> &Value {
        match self {
            Reply::Success(value) | Reply::Failure(value) => value,
        }
    }
}

/// An unsolicited message from the peer.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub name: String,
    pub args: Value,
}

/// What happened to a response handed to [`Dispatcher::deposit_response`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepositOutcome {
    /// Passed straight to a task already waiting on the id.
    Delivered,
    /// Parked until someone claims it.
    Stored,
    /// No outstanding request had this id; the response was dropped.
    Unmatched,
}

#[derive(Debug, Default)]
struct PendingTable {
    /// Ids written to the peer and not yet answered.
    outstanding: HashSet<u64>,
    /// Answered and not yet claimed.
    replies: BTreeMap<u64, Reply>,
    /// Tasks parked on an id, oldest first.
    waiters: HashMap<u64, VecDeque<oneshot::Sender<Reply>>>,
    closed: bool,
}

#[derive(Debug, Default)]
struct NotificationQueue {
    items: VecDeque<Notification>,
}

/// An encoded frame waiting for the writer task.
struct WriteJob {
    frame: Vec<u8>,
    done: oneshot::Sender<std::io::Result<()>>,
}

enum Waiting<'a> {
    Ready(Reply),
    Parked(ParkedClaim<'a>),
}

/// A waiter registered on an id.
///
/// Dropping it before the reply arrives unregisters the waiter, and a reply
/// that slipped in meanwhile goes back to the table instead of being lost.
struct ParkedClaim<'a> {
    dispatcher: &'a Dispatcher,
    id: u64,
    rx: Option<oneshot::Receiver<Reply>>,
}

impl ParkedClaim<'_> {
    async fn recv(&mut self) -> Result<Reply> {
        let Some(rx) = self.rx.as_mut() else {
            return Err(WireError::ConnectionClosed);
        };
        let received = rx.await;
        self.rx = None;
        received.map_err(|_| WireError::ConnectionClosed)
    }

    /// Stop waiting. Returns a reply that raced in before the receiver closed.
    fn abandon(&mut self) -> Option<Reply> {
        let mut rx = self.rx.take()?;
        rx.close();
        let raced = rx.try_recv().ok();
        self.dispatcher.prune_waiters(self.id);
        raced
    }
}

impl Drop for ParkedClaim<'_> {
    fn drop(&mut self) {
        if let Some(reply) = self.abandon() {
            self.dispatcher.restore(self.id, reply);
        }
    }
}

/// Correlation engine shared by the listener and every caller.
pub struct Dispatcher {
    next_id: AtomicU64,
    writer: mpsc::UnboundedSender<WriteJob>,
    catalog: OnceLock<MethodCatalog>,
    pending: Mutex<PendingTable>,
    notifications: Mutex<NotificationQueue>,
    notification_signal: Notify,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .field("catalog_loaded", &self.catalog.get().is_some())
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Create a dispatcher that writes requests to `writer`.
    ///
    /// Spawns the writer task, so this must run inside a tokio runtime. The
    /// first issued request gets id 0.
    pub fn new(writer: BoxedWriter) -> Self {
        let (jobs, queue) = mpsc::unbounded_channel();
        tokio::spawn(write_loop(writer, queue));

        Self {
            next_id: AtomicU64::new(0),
            writer: jobs,
            catalog: OnceLock::new(),
            pending: Mutex::new(PendingTable::default()),
            notifications: Mutex::new(NotificationQueue::default()),
            notification_signal: Notify::new(),
        }
    }

    /// Install the method catalog. Only the first call has any effect.
    ///
    /// Returns `false` if a catalog was already installed.
    pub fn install_catalog(&self, catalog: MethodCatalog) -> bool {
        self.catalog.set(catalog).is_ok()
    }

    pub fn catalog(&self) -> Option<&MethodCatalog> {
        self.catalog.get()
    }

    /// Send a request and return its id without waiting for the reply.
    ///
    /// Names are resolved through the catalog; an unknown name fails before
    /// an id is allocated or anything is written.
    ///
    /// Cancel-safe: once the id is allocated the frame is queued for the
    /// writer task, which finishes writing it even if this future is dropped.
    /// The reply to such a request is stored and can still be claimed by id.
    pub async fn issue<'a>(&self, method: impl Into<MethodRef<'a>>, args: Vec<Value>) -> Result<u64> {
        let method_id = self.resolve(method.into())?;

        let (id, len, acked) = {
            let mut table = self.lock_pending();
            if table.closed {
                return Err(WireError::ConnectionClosed);
            }
            let id = self.next_id.load(Ordering::SeqCst);
            let frame = Message::request(id, method_id, args).encode()?;
            let len = frame.len();

            // Queued under the table lock so frames reach the wire in id order.
            let (ack, acked) = oneshot::channel();
            self.writer
                .send(WriteJob { frame, done: ack })
                .map_err(|_| WireError::ConnectionClosed)?;
            self.next_id.store(id + 1, Ordering::SeqCst);
            table.outstanding.insert(id);
            (id, len, acked)
        };

        match acked.await {
            Ok(Ok(())) => {
                debug!("Sent request {} (method {}, {} bytes)", id, method_id, len);
                Ok(id)
            }
            Ok(Err(e)) => {
                self.forget(id);
                Err(e.into())
            }
            Err(_) => {
                self.forget(id);
                Err(WireError::ConnectionClosed)
            }
        }
    }

    /// Wait for the reply to `id` with no deadline.
    ///
    /// Resolves with `ConnectionClosed` if the connection drops first.
    pub async fn claim(&self, id: u64) -> Result<Reply> {
        match self.park(id)? {
            Waiting::Ready(reply) => Ok(reply),
            Waiting::Parked(mut parked) => parked.recv().await,
        }
    }

    /// Wait for the reply to `id`, giving up after `timeout`.
    pub async fn claim_timeout(&self, id: u64, timeout: Duration) -> Result<Reply> {
        let mut parked = match self.park(id)? {
            Waiting::Ready(reply) => return Ok(reply),
            Waiting::Parked(parked) => parked,
        };

        let waited = tokio::time::timeout(timeout, parked.recv()).await;
        match waited {
            Ok(received) => received,
            Err(_) => parked.abandon().ok_or(WireError::Timeout(timeout)),
        }
    }

    /// Wait for the reply to `id` until it arrives or `token` is cancelled.
    pub async fn claim_cancellable(&self, id: u64, token: &CancellationToken) -> Result<Reply> {
        token.check()?;
        let mut parked = match self.park(id)? {
            Waiting::Ready(reply) => return Ok(reply),
            Waiting::Parked(parked) => parked,
        };

        tokio::select! {
            received = parked.recv() => return received,
            _ = token.cancelled() => {}
        }
        parked.abandon().ok_or(WireError::Cancelled)
    }

    /// Take the reply to `id` if it has already arrived.
    pub fn try_claim(&self, id: u64) -> Option<Reply> {
        self.lock_pending().replies.remove(&id)
    }

    /// Copy of all replies nobody has claimed yet, ordered by id.
    pub fn snapshot_pending(&self) -> Vec<(u64, Reply)> {
        self.lock_pending()
            .replies
            .iter()
            .map(|(id, reply)| (*id, reply.clone()))
            .collect()
    }

    /// Ids that were sent and have not been answered.
    pub fn outstanding(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.lock_pending().outstanding.iter().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Empty the notification queue, oldest first.
    pub fn drain_notifications(&self) -> Vec<Notification> {
        self.lock_notifications().items.drain(..).collect()
    }

    /// Wait until at least one notification is queued, then drain the queue.
    ///
    /// Fails with `ConnectionClosed` once the connection is gone and the
    /// queue is empty.
    pub async fn next_notifications(&self) -> Result<Vec<Notification>> {
        loop {
            let notified = self.notification_signal.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let drained = self.drain_notifications();
            if !drained.is_empty() {
                return Ok(drained);
            }
            if self.is_closed() {
                return Err(WireError::ConnectionClosed);
            }
            notified.await;
        }
    }

    /// Record a response read by the listener.
    pub fn deposit_response(&self, id: u64, error: Option<Value>, result: Value) -> DepositOutcome {
        let reply = Reply::from_parts(error, result);
        let mut table = self.lock_pending();

        if !table.outstanding.remove(&id) {
            return DepositOutcome::Unmatched;
        }
        Self::deliver(&mut table, id, reply)
    }

    /// Hand `reply` to the first live waiter on `id`, or store it.
    fn deliver(table: &mut PendingTable, id: u64, mut reply: Reply) -> DepositOutcome {
        if let Some(queue) = table.waiters.get_mut(&id) {
            while let Some(tx) = queue.pop_front() {
                match tx.send(reply) {
                    Ok(()) => {
                        if queue.is_empty() {
                            table.waiters.remove(&id);
                        }
                        return DepositOutcome::Delivered;
                    }
                    // That waiter gave up; try the next one.
                    Err(returned) => reply = returned,
                }
            }
            table.waiters.remove(&id);
        }

        table.replies.insert(id, reply);
        DepositOutcome::Stored
    }

    /// Queue a notification read by the listener.
    pub fn deposit_notification(&self, name: String, args: Value) {
        self.lock_notifications()
            .items
            .push_back(Notification { name, args });
        self.notification_signal.notify_waiters();
    }

    /// Mark the connection closed and release every parked claim.
    pub fn close(&self) {
        {
            let mut table = self.lock_pending();
            table.closed = true;
            // Dropping the senders wakes each receiver with an error.
            table.waiters.clear();
        }
        self.notification_signal.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.lock_pending().closed
    }

    fn resolve(&self, method: MethodRef<'_>) -> Result<u64> {
        match method {
            MethodRef::Id(id) => Ok(id),
            MethodRef::Name(name) => self
                .catalog
                .get()
                .and_then(|catalog| catalog.resolve(name))
                .ok_or_else(|| WireError::MethodNotFound {
                    name: name.to_string(),
                }),
        }
    }

    fn park(&self, id: u64) -> Result<Waiting<'_>> {
        let mut table = self.lock_pending();
        if let Some(reply) = table.replies.remove(&id) {
            return Ok(Waiting::Ready(reply));
        }
        if table.closed {
            return Err(WireError::ConnectionClosed);
        }
        let (tx, rx) = oneshot::channel();
        table.waiters.entry(id).or_default().push_back(tx);
        Ok(Waiting::Parked(ParkedClaim {
            dispatcher: self,
            id,
            rx: Some(rx),
        }))
    }

    /// Drop waiters on `id` whose receiving side has gone away.
    fn prune_waiters(&self, id: u64) {
        let mut table = self.lock_pending();
        if let Some(queue) = table.waiters.get_mut(&id) {
            queue.retain(|tx| !tx.is_closed());
            if queue.is_empty() {
                table.waiters.remove(&id);
            }
        }
    }

    /// Put back a reply whose claimer stopped waiting after it was delivered.
    fn restore(&self, id: u64, reply: Reply) {
        let mut table = self.lock_pending();
        Self::deliver(&mut table, id, reply);
    }

    fn forget(&self, id: u64) {
        self.lock_pending().outstanding.remove(&id);
    }

    fn lock_pending(&self) -> MutexGuard<'_, PendingTable> {
        // A panic while holding the lock cannot leave the table half-updated.
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_notifications(&self) -> MutexGuard<'_, NotificationQueue> {
        self.notifications
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Write queued frames in order until the channel closes or a write fails.
async fn write_loop(mut writer: BoxedWriter, mut jobs: mpsc::UnboundedReceiver<WriteJob>) {
    while let Some(job) = jobs.recv().await {
        let written = match writer.write_all(&job.frame).await {
            Ok(()) => writer.flush().await,
            Err(e) => Err(e),
        };

        let failed = written.is_err();
        if let Err(e) = &written {
            warn!("Write to peer failed: {}", e);
        }
        // The issuer may have stopped waiting; the frame went out regardless.
        let _ = job.done.send(written);
        if failed {
            break;
        }
    }
    debug!("Writer stopped");
}
