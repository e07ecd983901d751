use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tokio::sync::{mpsc, oneshot};

use crate::model::Event;
use crate::observability;

const HEADER_LEN: u64 = 4;
const CRC_LEN: u64 = 4;

/// Frame one event as `[u32 le: len][bincode payload][u32 le: crc32(payload)]`.
/// Returns the frame's length in bytes.
fn write_frame(writer: &mut impl Write, event: &Event) -> io::Result<u64> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "event too large"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(HEADER_LEN + u64::from(len) + CRC_LEN)
}

/// Read one frame. `Ok(None)` on clean EOF, torn tail, bad CRC or undecodable payload.
fn read_frame(reader: &mut impl Read) -> io::Result<Option<(Event, u64)>> {
    let mut len_buf = [0u8; 4];
    if !read_or_eof(reader, &mut len_buf)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    let mut payload = vec![0u8; len];
    if !read_or_eof(reader, &mut payload)? {
        return Ok(None);
    }
    let mut crc_buf = [0u8; 4];
    if !read_or_eof(reader, &mut crc_buf)? {
        return Ok(None);
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    match bincode::deserialize::<Event>(&payload) {
        Ok(event) => Ok(Some((event, HEADER_LEN + len as u64 + CRC_LEN))),
        Err(_) => Ok(None),
    }
}

fn read_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Result of scanning a log file.
#[derive(Debug, Default)]
pub struct Replay {
    pub events: Vec<Event>,
    /// Byte length of the intact prefix. Anything past it is a torn or corrupt tail.
    pub valid_len: u64,
}

/// The open log file. Writes can be capped at a byte budget to simulate a full disk.
struct LogFile {
    file: File,
    write_budget: Option<usize>,
}

impl LogFile {
    fn new(file: File) -> Self {
        Self {
            file,
            write_budget: None,
        }
    }
}

impl Write for LogFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let allowed = match self.write_budget {
            Some(0) => return Err(io::Error::new(io::ErrorKind::StorageFull, "no space left for log")),
            Some(budget) => &buf[..buf.len().min(budget)],
            None => buf,
        };
        let written = self.file.write(allowed)?;
        if let Some(budget) = self.write_budget.as_mut() {
            *budget -= written;
        }
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// Append-only write-ahead log of committed events.
///
/// Opening truncates a torn or corrupt tail left by a crash, so new frames never
/// land behind garbage that replay would stop at. A batch that fails to commit
/// is cut back off the file for the same reason.
pub struct Wal {
    writer: BufWriter<LogFile>,
    path: PathBuf,
    /// File length through the last committed batch.
    committed_len: u64,
    /// Set when cutting a failed batch back off the file failed too.
    needs_rollback: bool,
    appends_since_compact: u64,
}

impl Wal {
    /// Scan the log at `path`. A missing file replays as empty.
    pub fn replay(path: &Path) -> io::Result<Replay> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Replay::default()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut replay = Replay::default();
        while let Some((event, frame_len)) = read_frame(&mut reader)? {
            replay.events.push(event);
            replay.valid_len += frame_len;
        }
        Ok(replay)
    }

    /// Open (or create) the log, cutting it back to `valid_len` bytes.
    pub fn open(path: &Path, valid_len: u64) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let len = file.metadata()?.len();
        if len > valid_len {
            tracing::warn!(path = %path.display(), valid_len, "truncating corrupt log tail");
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        Ok(Self {
            writer: BufWriter::new(LogFile::new(file)),
            path: path.to_path_buf(),
            committed_len: len.min(valid_len),
            needs_rollback: false,
            appends_since_compact: 0,
        })
    }

    /// Append `events` and fsync them as one unit. On failure the file is cut back
    /// to its last committed length, so none of the batch survives a restart and
    /// later batches never land behind a torn frame.
    pub fn commit(&mut self, events: &[Event]) -> io::Result<()> {
        if self.needs_rollback {
            self.rollback()?;
        }
        match self.write_batch(events) {
            Ok(bytes) => {
                self.committed_len += bytes;
                self.appends_since_compact += events.len() as u64;
                Ok(())
            }
            Err(e) => {
                if let Err(rollback) = self.rollback() {
                    tracing::error!(path = %self.path.display(), "log rollback failed: {rollback}");
                }
                Err(e)
            }
        }
    }

    fn write_batch(&mut self, events: &[Event]) -> io::Result<u64> {
        let mut bytes = 0;
        for event in events {
            bytes += write_frame(&mut self.writer, event)?;
        }
        self.writer.flush()?;
        self.writer.get_ref().file.sync_all()?;
        Ok(bytes)
    }

    /// Throw away whatever a failed batch left in the buffer or on disk.
    fn rollback(&mut self) -> io::Result<()> {
        self.needs_rollback = true;
        let file = OpenOptions::new().append(true).open(&self.path)?;
        let failed = std::mem::replace(&mut self.writer, BufWriter::new(LogFile::new(file)));
        // into_parts hands back unflushed bytes instead of writing them on drop.
        drop(failed.into_parts());
        let file = &self.writer.get_ref().file;
        file.set_len(self.committed_len)?;
        file.sync_all()?;
        self.needs_rollback = false;
        Ok(())
    }

    #[cfg(test)]
    fn fail_writes_after(&mut self, bytes: usize) {
        self.writer.get_mut().write_budget = Some(bytes);
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Replace the log with `events`: write a sibling temp file, fsync, rename over.
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        let mut len = 0;
        {
            let mut tmp = BufWriter::new(File::create(&tmp_path)?);
            for event in events {
                len += write_frame(&mut tmp, event)?;
            }
            tmp.flush()?;
            tmp.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new().append(true).open(&self.path)?;
        let previous = std::mem::replace(&mut self.writer, BufWriter::new(LogFile::new(file)));
        drop(previous.into_parts());
        self.committed_len = len;
        self.needs_rollback = false;
        self.appends_since_compact = 0;
        Ok(())
    }
}

// ── Group-commit writer task ─────────────────────────────────────

enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Cloneable handle to the background task that owns the `Wal`.
#[derive(Clone)]
pub struct WalWriter {
    tx: mpsc::Sender<WalCommand>,
}

impl WalWriter {
    /// Move `wal` onto a writer task. Must be called inside a tokio runtime.
    pub fn spawn(wal: Wal) -> Self {
        let (tx, rx) = mpsc::channel(4096);
        tokio::spawn(writer_loop(wal, rx));
        Self { tx }
    }

    /// Append and wait until the event's batch is fsynced.
    pub async fn append(&self, event: Event) -> io::Result<()> {
        let (response, rx) = oneshot::channel();
        self.tx
            .send(WalCommand::Append { event, response })
            .await
            .map_err(|_| io::Error::other("log writer shut down"))?;
        rx.await
            .map_err(|_| io::Error::other("log writer dropped response"))?
    }

    pub async fn compact(&self, events: Vec<Event>) -> io::Result<()> {
        let (response, rx) = oneshot::channel();
        self.tx
            .send(WalCommand::Compact { events, response })
            .await
            .map_err(|_| io::Error::other("log writer shut down"))?;
        rx.await
            .map_err(|_| io::Error::other("log writer dropped response"))?
    }

    pub async fn appends_since_compact(&self) -> u64 {
        let (response, rx) = oneshot::channel();
        if self
            .tx
            .send(WalCommand::AppendsSinceCompact { response })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

/// Block for the first append, drain whatever else is already queued, then fsync
/// the whole batch once and answer every waiter with the shared result.
async fn writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_control(&mut wal, cmd);
            continue;
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    deferred = Some(other);
                    break;
                }
            }
        }
        commit_batch(&mut wal, batch);
        if let Some(cmd) = deferred {
            handle_control(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();

    let (events, waiters): (Vec<_>, Vec<_>) = batch.into_iter().unzip();
    let result = wal.commit(&events);
    metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    if let Err(e) = &result {
        tracing::error!(path = %wal.path().display(), events = events.len(), "log commit failed: {e}");
    }
    for tx in waiters {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_control(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let _ = response.send(wal.compact(&events));
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by writer_loop"),
    }
}
