use std::{
    collections::VecDeque,
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::PathBuf,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Mutex,
    },
};

use forgelink_types::topic::QoS;
use log::{debug, error, warn};
use prost::Message as ProstMessage;

use crate::error::QueueError;

/// Which kind of topic a queued message was destined for; data
/// messages are the only thing that gets queued, births are
/// regenerated on reconnect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueuedTopic {
    Node(String),
    Device(String),
}

impl QueuedTopic {
    pub fn topic_str(&self) -> &str {
        match self {
            QueuedTopic::Node(t) => t,
            QueuedTopic::Device(t) => t,
        }
    }
}

/// A durable record of one unsent wire message.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedMessage {
    pub topic: QueuedTopic,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub enqueued_at: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
struct QueueRecord {
    #[prost(uint32, tag = "1")]
    kind: u32,
    #[prost(string, tag = "2")]
    topic: String,
    #[prost(bytes = "vec", tag = "3")]
    payload: Vec<u8>,
    #[prost(uint32, tag = "4")]
    qos: u32,
    #[prost(uint64, tag = "5")]
    enqueued_at: u64,
}

const KIND_NODE: u32 = 0;
const KIND_DEVICE: u32 = 1;

impl From<&QueuedMessage> for QueueRecord {
    fn from(msg: &QueuedMessage) -> Self {
        let (kind, topic) = match &msg.topic {
            QueuedTopic::Node(t) => (KIND_NODE, t.clone()),
            QueuedTopic::Device(t) => (KIND_DEVICE, t.clone()),
        };
        QueueRecord {
            kind,
            topic,
            payload: msg.payload.clone(),
            qos: match msg.qos {
                QoS::AtMostOnce => 0,
                QoS::AtLeastOnce => 1,
            },
            enqueued_at: msg.enqueued_at,
        }
    }
}

impl TryFrom<QueueRecord> for QueuedMessage {
    type Error = ();

    fn try_from(record: QueueRecord) -> Result<Self, Self::Error> {
        let topic = match record.kind {
            KIND_NODE => QueuedTopic::Node(record.topic),
            KIND_DEVICE => QueuedTopic::Device(record.topic),
            _ => return Err(()),
        };
        Ok(QueuedMessage {
            topic,
            payload: record.payload,
            qos: match record.qos {
                0 => QoS::AtMostOnce,
                _ => QoS::AtLeastOnce,
            },
            enqueued_at: record.enqueued_at,
        })
    }
}

struct Journal {
    file: File,
    path: PathBuf,
}

impl Journal {
    fn open(path: PathBuf) -> std::io::Result<(Self, Vec<QueuedMessage>)> {
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)?;

        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;

        let mut messages = Vec::new();
        let mut offset = 0usize;
        while bytes.len() - offset >= 4 {
            let len =
                u32::from_le_bytes([bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]])
                    as usize;
            let start = offset + 4;
            if start + len > bytes.len() {
                warn!("Store-and-forward journal has a truncated tail record - discarding it");
                break;
            }
            match QueueRecord::decode(&bytes[start..start + len]) {
                Ok(record) => match QueuedMessage::try_from(record) {
                    Ok(msg) => messages.push(msg),
                    Err(_) => warn!("Store-and-forward journal record was invalid - skipping"),
                },
                Err(e) => {
                    warn!("Store-and-forward journal record failed to decode ({e}) - discarding remainder");
                    break;
                }
            }
            offset = start + len;
        }

        Ok((Journal { file, path }, messages))
    }

    fn append(&mut self, msg: &QueuedMessage) -> std::io::Result<()> {
        let record = QueueRecord::from(msg);
        let bytes = record.encode_to_vec();
        self.file.write_all(&(bytes.len() as u32).to_le_bytes())?;
        self.file.write_all(&bytes)?;
        self.file.sync_data()
    }

    fn rewrite(&mut self, messages: &VecDeque<QueuedMessage>) -> std::io::Result<()> {
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        for msg in messages {
            let bytes = QueueRecord::from(msg).encode_to_vec();
            self.file.write_all(&(bytes.len() as u32).to_le_bytes())?;
            self.file.write_all(&bytes)?;
        }
        self.file.sync_data()
    }
}

struct QueueInner {
    messages: VecDeque<QueuedMessage>,
    journal: Option<Journal>,
    closed: bool,
}

impl QueueInner {
    /// Journal write failures demote the queue to memory-only rather
    /// than failing the enqueue.
    fn journal_append(&mut self, msg: &QueuedMessage) {
        if let Some(journal) = &mut self.journal {
            if let Err(e) = journal.append(msg) {
                error!(
                    "Store-and-forward journal write to {:?} failed ({e}) - continuing memory-only",
                    journal.path
                );
                self.journal = None;
            }
        }
    }

    fn journal_rewrite(&mut self) {
        if let Some(journal) = &mut self.journal {
            if let Err(e) = journal.rewrite(&self.messages) {
                error!(
                    "Store-and-forward journal rewrite of {:?} failed ({e}) - continuing memory-only",
                    journal.path
                );
                self.journal = None;
            }
        }
    }
}

/// Outcome of a [StoreForwardQueue::replay] pass.
#[derive(Debug, PartialEq, Eq)]
pub struct ReplayOutcome {
    pub replayed: usize,
    /// True when the transport failed mid-replay and the remaining
    /// messages were kept, in order, for the next attempt.
    pub halted: bool,
}

/// A bounded, durable FIFO of unsent wire messages.
///
/// Enqueueing at capacity drops the oldest entry (counted, never
/// surfaced to the producer); replay hands messages back strictly in
/// enqueue order. With a journal path configured the queue contents
/// survive a process restart: everything enqueued before a crash
/// replays before anything enqueued after it.
pub struct StoreForwardQueue {
    capacity: usize,
    inner: Mutex<QueueInner>,
    depth: AtomicUsize,
    dropped_oldest: AtomicU64,
}

impl StoreForwardQueue {
    pub fn new(capacity: usize, journal_path: Option<PathBuf>) -> Self {
        let capacity = capacity.max(1);
        let (journal, mut messages) = match journal_path {
            Some(path) => match Journal::open(path.clone()) {
                Ok((journal, messages)) => {
                    if !messages.is_empty() {
                        debug!(
                            "Store-and-forward journal {:?} restored {} messages",
                            path,
                            messages.len()
                        );
                    }
                    (Some(journal), messages)
                }
                Err(e) => {
                    error!("Unable to open store-and-forward journal {path:?} ({e}) - continuing memory-only");
                    (None, Vec::new())
                }
            },
            None => (None, Vec::new()),
        };

        // An over-capacity restore keeps the newest entries.
        if messages.len() > capacity {
            messages.drain(0..messages.len() - capacity);
        }

        let depth = messages.len();
        Self {
            capacity,
            inner: Mutex::new(QueueInner {
                messages: messages.into(),
                journal,
                closed: false,
            }),
            depth: AtomicUsize::new(depth),
            dropped_oldest: AtomicU64::new(0),
        }
    }

    /// Current queue depth. Safe to read from any task; the
    /// backpressure monitor polls this every tick.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    /// Number of messages evicted to make room for newer ones.
    pub fn dropped_oldest(&self) -> u64 {
        self.dropped_oldest.load(Ordering::Relaxed)
    }

    /// Stop accepting new messages. Replay of already queued messages
    /// is still permitted.
    pub fn close(&self) {
        self.inner.lock().unwrap().closed = true;
    }

    /// Queue a message for later replay. At capacity the oldest entry
    /// is evicted so the producer is never blocked.
    pub fn enqueue(&self, msg: QueuedMessage) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            return Err(QueueError::Closed);
        }
        if inner.messages.len() >= self.capacity {
            inner.messages.pop_front();
            self.dropped_oldest.fetch_add(1, Ordering::Relaxed);
            debug!("Store-and-forward queue full - dropped oldest message");
            inner.messages.push_back(msg);
            inner.journal_rewrite();
        } else {
            inner.journal_append(&msg);
            inner.messages.push_back(msg);
        }
        self.depth.store(inner.messages.len(), Ordering::Relaxed);
        Ok(())
    }

    fn pop_front(&self) -> Option<QueuedMessage> {
        let mut inner = self.inner.lock().unwrap();
        let msg = inner.messages.pop_front();
        self.depth.store(inner.messages.len(), Ordering::Relaxed);
        msg
    }

    fn push_front(&self, msg: QueuedMessage) {
        let mut inner = self.inner.lock().unwrap();
        inner.messages.push_front(msg);
        self.depth.store(inner.messages.len(), Ordering::Relaxed);
    }

    fn compact_journal(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.journal_rewrite();
    }

    /// Replay queued messages strictly in enqueue order.
    ///
    /// `send` returns the message back on failure; the message is then
    /// re-queued at the front and replay halts so order is preserved
    /// across the next reconnect.
    pub async fn replay<F, Fut>(&self, mut send: F) -> ReplayOutcome
    where
        F: FnMut(QueuedMessage) -> Fut,
        Fut: std::future::Future<Output = Result<(), QueuedMessage>>,
    {
        let mut replayed = 0;
        let halted = loop {
            let msg = match self.pop_front() {
                Some(msg) => msg,
                None => break false,
            };
            match send(msg).await {
                Ok(()) => replayed += 1,
                Err(msg) => {
                    self.push_front(msg);
                    break true;
                }
            }
        };
        self.compact_journal();
        ReplayOutcome { replayed, halted }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(n: u64) -> QueuedMessage {
        QueuedMessage {
            topic: QueuedTopic::Node(format!("fglv1.0/g/NDATA/n{n}")),
            payload: vec![n as u8],
            qos: QoS::AtLeastOnce,
            enqueued_at: n,
        }
    }

    fn unique_journal_path(tag: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!(
            "forgelink-queue-{tag}-{}.journal",
            std::process::id()
        ));
        _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn fifo_and_bounded_drop() {
        let queue = StoreForwardQueue::new(3, None);
        for n in 0..4 {
            queue.enqueue(msg(n)).unwrap();
        }
        // capacity 3: the oldest (0) was evicted, newest present
        assert_eq!(queue.depth(), 3);
        assert_eq!(queue.dropped_oldest(), 1);

        let mut replayed = Vec::new();
        let outcome = queue
            .replay(|m| {
                replayed.push(m.enqueued_at);
                async { Ok(()) }
            })
            .await;
        assert_eq!(outcome, ReplayOutcome { replayed: 3, halted: false });
        assert_eq!(replayed, vec![1, 2, 3]);
        assert_eq!(queue.depth(), 0);
    }

    #[tokio::test]
    async fn replay_halts_and_preserves_order_on_failure() {
        let queue = StoreForwardQueue::new(10, None);
        for n in 0..3 {
            queue.enqueue(msg(n)).unwrap();
        }

        // fail on the second message
        let mut sent = Vec::new();
        let outcome = queue
            .replay(|m| {
                let fail = m.enqueued_at == 1;
                if !fail {
                    sent.push(m.enqueued_at);
                }
                async move {
                    if fail {
                        Err(m)
                    } else {
                        Ok(())
                    }
                }
            })
            .await;
        assert_eq!(outcome, ReplayOutcome { replayed: 1, halted: true });
        assert_eq!(queue.depth(), 2);

        // next replay resumes from the failed message, order intact
        let mut resumed = Vec::new();
        queue
            .replay(|m| {
                resumed.push(m.enqueued_at);
                async { Ok(()) }
            })
            .await;
        assert_eq!(resumed, vec![1, 2]);
    }

    #[tokio::test]
    async fn closed_queue_rejects_enqueue() {
        let queue = StoreForwardQueue::new(2, None);
        queue.enqueue(msg(0)).unwrap();
        queue.close();
        assert_eq!(queue.enqueue(msg(1)), Err(QueueError::Closed));
        assert_eq!(queue.depth(), 1);
    }

    #[tokio::test]
    async fn journal_survives_restart() {
        let path = unique_journal_path("restart");

        {
            let queue = StoreForwardQueue::new(10, Some(path.clone()));
            for n in 0..3 {
                queue.enqueue(msg(n)).unwrap();
            }
        }

        let queue = StoreForwardQueue::new(10, Some(path.clone()));
        assert_eq!(queue.depth(), 3);
        queue.enqueue(msg(3)).unwrap();

        // pre-crash messages replay before post-restart enqueues
        let mut replayed = Vec::new();
        queue
            .replay(|m| {
                replayed.push(m.enqueued_at);
                async { Ok(()) }
            })
            .await;
        assert_eq!(replayed, vec![0, 1, 2, 3]);

        // a clean drain compacts the journal
        let queue = StoreForwardQueue::new(10, Some(path.clone()));
        assert_eq!(queue.depth(), 0);
        _ = std::fs::remove_file(&path);
    }
}
