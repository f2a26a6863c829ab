use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Largest payload a frame may carry. The biggest real event is a few KiB;
/// a longer length prefix on replay is a torn or corrupt tail.
const MAX_EVENT_LEN: usize = 1 << 20;

/// Encode a single event as one `[len][bincode][crc32]` frame.
fn encode_event(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if payload.len() > MAX_EVENT_LEN {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "event too large"));
    }
    let len = payload.len() as u32;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

/// Fill `buf`, or report `None` if the log ends first.
fn read_exact_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<Option<()>> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(Some(())),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e),
    }
}

/// Decode the next frame. `None` on a clean end, a torn tail, or corruption.
fn decode_event(reader: &mut impl Read) -> io::Result<Option<Event>> {
    let mut len_buf = [0u8; 4];
    if read_exact_or_eof(reader, &mut len_buf)?.is_none() {
        return Ok(None);
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_EVENT_LEN {
        return Ok(None);
    }
    let mut payload = vec![0u8; len];
    if read_exact_or_eof(reader, &mut payload)?.is_none() {
        return Ok(None);
    }
    let mut crc_buf = [0u8; 4];
    if read_exact_or_eof(reader, &mut crc_buf)?.is_none() {
        return Ok(None);
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    Ok(bincode::deserialize::<Event>(&payload).ok())
}

/// Append-only write-ahead log of booking events.
///
/// Format per entry: `[u32: len][bincode: Event][u32: crc32]`
/// - `len` is the byte length of the bincode payload (not including the CRC).
/// - A torn last entry (crash mid-write) fails the length or CRC check and is dropped.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    /// Open (or create) the WAL file at `path`.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    /// Append and fsync a single event. Production code batches through
    /// `append_buffered` + `flush_sync` instead.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer one event without flushing. Durable only after `flush_sync()`.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        encode_event(&mut self.writer, event)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    /// Flush the BufWriter and fsync the underlying file.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn compact_tmp_path(path: &Path) -> PathBuf {
        path.with_extension("wal.tmp")
    }

    /// Write a full replacement log next to `path` and fsync it.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(Self::compact_tmp_path(path))?);
        for event in events {
            encode_event(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the replacement over the live log and reopen it for appends.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        fs::rename(Self::compact_tmp_path(&self.path), &self.path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
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

    /// Read every intact event from the log at `path`.
    /// A missing file is an empty log; replay stops at the first bad frame.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();
        while let Some(event) = decode_event(&mut reader)? {
            events.push(event);
        }
        Ok(events)
    }
}
