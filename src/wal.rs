use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};

use crate::model::Event;
use crate::observability;

const MAGIC: &[u8; 4] = b"SBKW";
const VERSION: u32 = 1;
const HEADER_LEN: usize = 8;

fn write_header(writer: &mut impl Write) -> io::Result<()> {
    writer.write_all(MAGIC)?;
    writer.write_all(&VERSION.to_le_bytes())
}

/// Encode a single event to [len][bincode][crc32] format.
fn encode_event(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = payload.len() as u32;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

/// Read exactly `buf.len()` bytes. `Ok(false)` on a short read at EOF.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Append-only event log.
///
/// File layout: `[b"SBKW"][u32 version]` then entries of
/// `[u32: len][bincode: Event][u32: crc32]`.
/// A torn or corrupt tail is dropped on replay; everything before it is kept.
///
/// After a failed flush the file is cut back to the last synced length
/// before anything else is written, so a batch reported as failed never
/// reaches disk.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
    synced_len: u64,
    synced_appends: u64,
    needs_rollback: bool,
}

impl Wal {
    /// Open (or create) the log at `path`, writing the header to a new file.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let fresh = file.metadata()?.len() == 0;
        let mut writer = BufWriter::new(file);
        if fresh {
            write_header(&mut writer)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        let synced_len = writer.get_ref().metadata()?.len();
        Ok(Self {
            writer,
            path: path.to_path_buf(),
            appends_since_compact: 0,
            synced_len,
            synced_appends: 0,
            needs_rollback: false,
        })
    }

    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.ensure_clean_tail()?;
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer one event. Nothing is durable until `flush_sync`.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        encode_event(&mut self.writer, event)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    /// Make everything buffered durable. On error the unsynced tail is
    /// discarded by `rollback`, which the next write runs first.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        if let Err(e) = self.sync_buffered() {
            self.needs_rollback = true;
            return Err(e);
        }
        self.synced_len = self.writer.get_ref().metadata()?.len();
        self.synced_appends = self.appends_since_compact;
        Ok(())
    }

    fn sync_buffered(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    /// Drop unsynced bytes, both buffered and on disk.
    fn rollback(&mut self) -> io::Result<()> {
        let file = OpenOptions::new().append(true).open(&self.path)?;
        let stale = std::mem::replace(&mut self.writer, BufWriter::new(file));
        // into_parts hands back the buffer without writing it.
        let _ = stale.into_parts();
        let file = self.writer.get_ref();
        file.set_len(self.synced_len)?;
        file.sync_all()?;
        self.appends_since_compact = self.synced_appends;
        self.needs_rollback = false;
        tracing::warn!(len = self.synced_len, "log truncated to last synced entry");
        Ok(())
    }

    /// Run a pending rollback before new bytes go out.
    pub fn ensure_clean_tail(&mut self) -> io::Result<()> {
        if self.needs_rollback {
            self.rollback()?;
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(path: &Path) -> PathBuf {
        path.with_extension("wal.tmp")
    }

    /// Write the snapshot events to a temp file next to `path` and fsync it.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let file = File::create(Self::tmp_path(path))?;
        let mut writer = BufWriter::new(file);
        write_header(&mut writer)?;
        for event in events {
            encode_event(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the temp file over the log and reopen for append.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        fs::rename(Self::tmp_path(&self.path), &self.path)?;
        let file = OpenOptions::new().append(true).open(&self.path)?;
        let stale = std::mem::replace(&mut self.writer, BufWriter::new(file));
        let _ = stale.into_parts();
        self.synced_len = self.writer.get_ref().metadata()?.len();
        self.appends_since_compact = 0;
        self.synced_appends = 0;
        self.needs_rollback = false;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Read every intact event from the log. A missing or empty file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();

        let mut header = [0u8; HEADER_LEN];
        if !read_full(&mut reader, &mut header)? {
            return Ok(events);
        }
        if &header[..4] != MAGIC {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} is not a slotbook log", path.display()),
            ));
        }
        let version = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        if version != VERSION {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unsupported log version {version}"),
            ));
        }

        loop {
            let mut len_buf = [0u8; 4];
            if !read_full(&mut reader, &mut len_buf)? {
                break;
            }
            let len = u32::from_le_bytes(len_buf) as usize;

            let mut payload = vec![0u8; len];
            if !read_full(&mut reader, &mut payload)? {
                tracing::warn!("discarding truncated log entry");
                break;
            }

            let mut crc_buf = [0u8; 4];
            if !read_full(&mut reader, &mut crc_buf)? {
                tracing::warn!("discarding truncated log entry");
                break;
            }
            if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
                tracing::warn!(entry = events.len(), "log checksum mismatch, stopping replay");
                break;
            }

            match bincode::deserialize::<Event>(&payload) {
                Ok(event) => events.push(event),
                Err(e) => {
                    tracing::warn!(entry = events.len(), "undecodable log entry: {e}");
                    break;
                }
            }
        }

        Ok(events)
    }
}

// ── Group-commit writer ──────────────────────────────────

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

type Pending = (Event, oneshot::Sender<io::Result<()>>);

/// Cloneable sender side of the writer task.
#[derive(Clone)]
pub struct WalHandle {
    tx: mpsc::Sender<WalCommand>,
}

fn writer_gone() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "log writer shut down")
}

impl WalHandle {
    /// Move `wal` onto a background task that batches appends into one fsync.
    pub fn spawn(wal: Wal) -> Self {
        let (tx, rx) = mpsc::channel(4096);
        tokio::spawn(writer_loop(wal, rx));
        Self { tx }
    }

    /// A handle whose writer has already stopped; every append fails.
    #[cfg(test)]
    pub fn disconnected() -> Self {
        let (tx, _) = mpsc::channel(1);
        Self { tx }
    }

    /// Resolves once the event is durable.
    pub async fn append(&self, event: Event) -> io::Result<()> {
        let (response, rx) = oneshot::channel();
        self.tx
            .send(WalCommand::Append { event, response })
            .await
            .map_err(|_| writer_gone())?;
        rx.await.map_err(|_| writer_gone())?
    }

    /// Replace the log with `events`.
    pub async fn compact(&self, events: Vec<Event>) -> io::Result<()> {
        let (response, rx) = oneshot::channel();
        self.tx
            .send(WalCommand::Compact { events, response })
            .await
            .map_err(|_| writer_gone())?;
        rx.await.map_err(|_| writer_gone())?
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

/// Owns the log. Takes the first append, drains whatever else is already
/// queued, fsyncs once and answers the whole batch.
async fn writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_other(&mut wal, cmd);
            continue;
        };
        let mut batch: Vec<Pending> = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        commit_batch(&mut wal, batch);
        if let Some(other) = deferred {
            handle_other(&mut wal, other);
        }
    }
    tracing::debug!("log writer stopped");
}

fn commit_batch(wal: &mut Wal, batch: Vec<Pending>) {
    metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = Instant::now();

    let result = wal.ensure_clean_tail().and_then(|()| {
        for (event, _) in &batch {
            if let Err(e) = wal.append_buffered(event) {
                wal.needs_rollback = true;
                return Err(e);
            }
        }
        wal.flush_sync()
    });

    metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!(batch = batch.len(), "log flush failed: {e}");
    }

    for (_, tx) in batch {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_other(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let count = events.len();
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            match &result {
                Ok(()) => tracing::info!(events = count, "log compacted"),
                Err(e) => tracing::error!("log compaction failed: {e}"),
            }
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            commit_batch(wal, vec![(event, response)]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Client, Provider};
    use ulid::Ulid;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("slotbook_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("{name}-{}.wal", Ulid::new()));
        let _ = fs::remove_file(&path);
        path
    }

    fn provider_event() -> Event {
        Event::ProviderCreated(Provider {
            id: Ulid::new(),
            name: Some("Dr. Lee".into()),
            timezone: "America/New_York".into(),
            created_at: 1,
        })
    }

    fn client_event() -> Event {
        Event::ClientCreated(Client {
            id: Ulid::new(),
            name: "Ada".into(),
            email: "ada@example.com".into(),
            phone: None,
            deleted_at: None,
            delete_reason: None,
            created_at: 1,
            updated_at: 1,
        })
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay");
        let events = vec![provider_event(), client_event()];
        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append(e).unwrap();
            }
        }
        assert_eq!(Wal::replay(&path).unwrap(), events);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn reopen_does_not_duplicate_header() {
        let path = tmp_path("reopen");
        let first = provider_event();
        let second = client_event();
        Wal::open(&path).unwrap().append(&first).unwrap();
        Wal::open(&path).unwrap().append(&second).unwrap();
        assert_eq!(Wal::replay(&path).unwrap(), vec![first, second]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_drops_torn_tail() {
        let path = tmp_path("torn");
        let event = provider_event();
        Wal::open(&path).unwrap().append(&event).unwrap();
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[9u8, 0, 0, 0, 1, 2]).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![event]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_stops_at_bad_checksum() {
        let path = tmp_path("bad_crc");
        let good = provider_event();
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&good).unwrap();
        }
        {
            let payload = bincode::serialize(&client_event()).unwrap();
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEAD_BEEFu32.to_le_bytes()).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![good]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_missing_and_empty_files() {
        let path = tmp_path("missing");
        assert!(Wal::replay(&path).unwrap().is_empty());
        File::create(&path).unwrap();
        assert!(Wal::replay(&path).unwrap().is_empty());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn foreign_file_is_rejected() {
        let path = tmp_path("foreign");
        fs::write(&path, b"PGDMP\x01\x02\x03\x04\x05").unwrap();
        let err = Wal::replay(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn compact_then_append() {
        let path = tmp_path("compact");
        let kept = provider_event();
        let mut wal = Wal::open(&path).unwrap();
        for _ in 0..20 {
            wal.append(&client_event()).unwrap();
        }
        let before = fs::metadata(&path).unwrap().len();
        wal.compact(std::slice::from_ref(&kept)).unwrap();
        assert_eq!(wal.appends_since_compact(), 0);
        let after = fs::metadata(&path).unwrap().len();
        assert!(after < before, "compacted log should shrink: {after} < {before}");

        let late = client_event();
        wal.append(&late).unwrap();
        drop(wal);
        assert_eq!(Wal::replay(&path).unwrap(), vec![kept, late]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn failed_flush_is_rolled_back() {
        let path = tmp_path("rollback");
        let kept = provider_event();
        let mut wal = Wal::open(&path).unwrap();
        wal.append(&kept).unwrap();

        // A flush that died part way: some bytes buffered, a torn record on disk.
        let lost = client_event();
        wal.append_buffered(&lost).unwrap();
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[40u8, 0, 0, 0, 7, 7, 7]).unwrap();
        }
        wal.needs_rollback = true;

        let late = client_event();
        wal.append(&late).unwrap();
        assert_eq!(wal.appends_since_compact(), 2);
        drop(wal);
        assert_eq!(Wal::replay(&path).unwrap(), vec![kept, late]);
        let _ = fs::remove_file(&path);
    }

    #[tokio::test]
    async fn disconnected_handle_refuses_appends() {
        let handle = WalHandle::disconnected();
        let err = handle.append(provider_event()).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert_eq!(handle.appends_since_compact().await, 0);
    }

    #[tokio::test]
    async fn handle_batches_concurrent_appends() {
        let path = tmp_path("handle");
        let handle = WalHandle::spawn(Wal::open(&path).unwrap());
        let mut tasks = Vec::new();
        for _ in 0..16 {
            let h = handle.clone();
            tasks.push(tokio::spawn(async move { h.append(client_event()).await }));
        }
        for t in tasks {
            tokio_test::assert_ok!(t.await.unwrap());
        }
        assert_eq!(handle.appends_since_compact().await, 16);
        assert_eq!(Wal::replay(&path).unwrap().len(), 16);

        handle.compact(vec![provider_event()]).await.unwrap();
        assert_eq!(handle.appends_since_compact().await, 0);
        assert_eq!(Wal::replay(&path).unwrap().len(), 1);
        let _ = fs::remove_file(&path);
    }
}
