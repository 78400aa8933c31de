//! Segment directory codec.
//!
//! A log lives in a directory of append-only segment files named with a
//! monotonic hex sequence. Each segment is a stream of records framed as a
//! 1-byte type tag, a varint payload length, and the payload. Crc records
//! carry the rolling CRC32 of every payload byte written to the file so far
//! and seal each append batch; the reader validates them while streaming.
//!
//! The codec neither reorders nor deduplicates entries; that is the merge
//! engine's job. A short read at the end of the last segment is treated as
//! end-of-log, any other decode failure is a corrupt log.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use crc32fast::Hasher;

use super::error::{Result, WalError};
use super::log::{Entry, EntryKind, HardState, NodeLog};

/// File name suffix for segment files.
pub const SEGMENT_SUFFIX: &str = ".wal";

/// Roll to a new segment once the current one grows past this size.
const SEGMENT_MAX_BYTES: u64 = 64 * 1024 * 1024;

/// Upper bound for a single record payload, used as a framing sanity check.
const MAX_PAYLOAD_BYTES: u64 = 1024 * 1024 * 1024;

/// Record type discriminants on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordType {
    Metadata = 1,
    HardState = 2,
    Entry = 3,
    Crc = 4,
}

impl RecordType {
    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(RecordType::Metadata),
            2 => Some(RecordType::HardState),
            3 => Some(RecordType::Entry),
            4 => Some(RecordType::Crc),
            _ => None,
        }
    }
}

/// One decoded record.
#[derive(Clone, Debug)]
pub struct Record {
    pub rtype: RecordType,
    pub payload: Vec<u8>,
}

/// Read floor handed to `open`; entries at or below `index` are skipped.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub index: u64,
    pub term: u64,
}

/// Handle over the segment files of one directory.
#[derive(Debug)]
pub struct Reader {
    dir: PathBuf,
    segments: Vec<PathBuf>,
    snapshot: Snapshot,
}

/// Open a segment directory for reading.
///
/// Fails with `NotFound` when the directory does not exist or holds no
/// segment files.
pub fn open(dir: impl AsRef<Path>, snapshot: Snapshot) -> Result<Reader> {
    let dir = dir.as_ref().to_path_buf();
    let segments = list_segments(&dir)?;
    if segments.is_empty() {
        return Err(WalError::NotFound(dir));
    }
    Ok(Reader {
        dir,
        segments,
        snapshot,
    })
}

fn list_segments(dir: &Path) -> Result<Vec<PathBuf>> {
    let read_dir = match fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return Err(WalError::NotFound(dir.to_path_buf()))
        }
        Err(err) => return Err(err.into()),
    };
    let mut segments = Vec::new();
    for dent in read_dir {
        let path = dent?.path();
        let is_segment = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.ends_with(SEGMENT_SUFFIX))
            .unwrap_or(false);
        if is_segment {
            segments.push(path);
        }
    }
    // Hex sequence names sort lexicographically in write order.
    segments.sort();
    Ok(segments)
}

impl Reader {
    /// Lazy stream over raw records across all segments, in file order.
    pub fn records(&self) -> RecordStream {
        RecordStream {
            segments: self.segments.clone().into_iter(),
            current: None,
        }
    }

    /// Coalesced view: last metadata, last hard-state, and all entries with
    /// index above the snapshot floor, in file order.
    pub fn read_all(&self) -> Result<(Vec<u8>, HardState, Vec<Entry>)> {
        let (metadata, state, entries, _) = self.scan(false)?;
        Ok((metadata, state, entries))
    }

    /// Like `read_all`, additionally reporting the indices absent from the
    /// raw stream.
    ///
    /// Gaps are observed against the expected strictly-increasing index
    /// walk, starting at `snapshot.index + 1`. When the persisted commit
    /// point lies beyond the last entry on disk, the tail up to the commit
    /// point is reported missing as well; a lost log suffix is only visible
    /// through the hard-state.
    pub fn read_all_with_missing(&self) -> Result<(Vec<u8>, HardState, Vec<Entry>, Vec<u64>)> {
        self.scan(true)
    }

    fn scan(&self, track_gaps: bool) -> Result<(Vec<u8>, HardState, Vec<Entry>, Vec<u64>)> {
        let mut metadata = Vec::new();
        let mut state = HardState::default();
        let mut entries = Vec::new();
        let mut missing = Vec::new();
        let mut expected = self.snapshot.index + 1;

        for record in self.records() {
            let record = record?;
            match record.rtype {
                RecordType::Entry => {
                    let entry = decode_entry(&record.payload)?;
                    if track_gaps {
                        while expected < entry.index {
                            missing.push(expected);
                            expected += 1;
                        }
                        expected = entry.index + 1;
                    }
                    if entry.index > self.snapshot.index {
                        entries.push(entry);
                    }
                }
                RecordType::HardState => state = decode_hard_state(&record.payload)?,
                RecordType::Metadata => metadata = record.payload,
                // Validated inside the stream.
                RecordType::Crc => {}
            }
        }

        if track_gaps {
            // A tail lost past the last entry leaves no gap in the stream;
            // the commit point is the only witness.
            while expected <= state.commit {
                missing.push(expected);
                expected += 1;
            }
        }

        Ok((metadata, state, entries, missing))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Iterator over raw records; validates rolling CRCs as it goes.
pub struct RecordStream {
    segments: std::vec::IntoIter<PathBuf>,
    current: Option<SegmentCursor>,
}

struct SegmentCursor {
    path: PathBuf,
    reader: BufReader<File>,
    hasher: Hasher,
}

impl Iterator for RecordStream {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.current.is_none() {
                let path = self.segments.next()?;
                let file = match File::open(&path) {
                    Ok(file) => file,
                    Err(err) => return Some(Err(err.into())),
                };
                self.current = Some(SegmentCursor {
                    path,
                    reader: BufReader::new(file),
                    hasher: Hasher::new(),
                });
            }

            let cursor = self.current.as_mut().expect("cursor was just installed");
            match cursor.read_record() {
                Ok(Some(record)) => return Some(Ok(record)),
                // End of this segment, move on to the next one.
                Ok(None) => {
                    self.current = None;
                    continue;
                }
                Err(err) => return Some(Err(err)),
            }
        }
    }
}

impl SegmentCursor {
    /// Decode one record, or `None` at (possibly short) end of stream.
    fn read_record(&mut self) -> Result<Option<Record>> {
        let mut tag = [0u8; 1];
        match self.reader.read_exact(&mut tag) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(err) => return Err(err.into()),
        }
        let rtype = RecordType::from_tag(tag[0]).ok_or_else(|| {
            WalError::CorruptLog(format!(
                "unknown record tag {} in {}",
                tag[0],
                self.path.display()
            ))
        })?;

        let len = match read_varint(&mut self.reader) {
            Ok(Some(len)) => len,
            // Torn tail; the stream ends here.
            Ok(None) => return Ok(None),
            Err(err) => return Err(err),
        };
        if len > MAX_PAYLOAD_BYTES {
            return Err(WalError::CorruptLog(format!(
                "record length {len} exceeds payload bound in {}",
                self.path.display()
            )));
        }

        let mut payload = vec![0u8; len as usize];
        match self.reader.read_exact(&mut payload) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(err) => return Err(err.into()),
        }

        if rtype == RecordType::Crc {
            if payload.len() != 4 {
                return Err(WalError::CorruptLog(format!(
                    "crc record with {}-byte payload in {}",
                    payload.len(),
                    self.path.display()
                )));
            }
            let stored = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
            let running = self.hasher.clone().finalize();
            if stored != running {
                return Err(WalError::CorruptLog(format!(
                    "crc mismatch in {} (stored {stored:#010x}, computed {running:#010x})",
                    self.path.display()
                )));
            }
        } else {
            self.hasher.update(&payload);
        }

        Ok(Some(Record { rtype, payload }))
    }
}

/// Appending writer over a segment directory.
#[derive(Debug)]
pub struct Writer {
    dir: PathBuf,
    file: File,
    seq: u64,
    written: u64,
    hasher: Hasher,
    metadata: Vec<u8>,
    metadata_written: bool,
}

/// Create a fresh log in `dir` carrying the given metadata blob.
///
/// The directory is created if absent and must not already contain segment
/// files.
pub fn create(dir: impl AsRef<Path>, metadata: Vec<u8>) -> Result<Writer> {
    let dir = dir.as_ref().to_path_buf();
    fs::create_dir_all(&dir)?;
    if !list_segments(&dir)?.is_empty() {
        return Err(WalError::WriteFailed(format!(
            "segment directory {} is not empty",
            dir.display()
        )));
    }

    let seq = 0;
    let file = open_segment(&dir, seq)?;
    let mut writer = Writer {
        dir,
        file,
        seq,
        written: 0,
        hasher: Hasher::new(),
        metadata,
        metadata_written: false,
    };
    writer.append_metadata()?;
    writer.seal()?;
    Ok(writer)
}

fn segment_path(dir: &Path, seq: u64) -> PathBuf {
    dir.join(format!("{seq:016x}{SEGMENT_SUFFIX}"))
}

fn open_segment(dir: &Path, seq: u64) -> Result<File> {
    let path = segment_path(dir, seq);
    Ok(OpenOptions::new()
        .create_new(true)
        .append(true)
        .open(path)?)
}

impl Writer {
    /// Append one hard-state record and the given entries, then seal the
    /// batch with a Crc record and sync.
    pub fn save(&mut self, state: &HardState, entries: &[Entry]) -> Result<()> {
        if !self.metadata_written {
            self.append_metadata()?;
        }
        self.append(RecordType::HardState, &encode_hard_state(state))?;
        for entry in entries {
            self.append(RecordType::Entry, &encode_entry(entry))?;
            self.maybe_roll()?;
        }
        self.seal()?;
        self.file.sync_all()?;
        Ok(())
    }

    fn append_metadata(&mut self) -> Result<()> {
        let metadata = std::mem::take(&mut self.metadata);
        self.append(RecordType::Metadata, &metadata)?;
        self.metadata = metadata;
        self.metadata_written = true;
        Ok(())
    }

    fn append(&mut self, rtype: RecordType, payload: &[u8]) -> Result<()> {
        let mut frame = Vec::with_capacity(1 + 10 + payload.len());
        frame.push(rtype as u8);
        write_varint(&mut frame, payload.len() as u64);
        frame.extend_from_slice(payload);
        self.file.write_all(&frame)?;
        self.written += frame.len() as u64;
        if rtype != RecordType::Crc {
            self.hasher.update(payload);
        }
        Ok(())
    }

    /// Seal the stream written so far with a Crc record.
    fn seal(&mut self) -> Result<()> {
        let sum = self.hasher.clone().finalize();
        self.append(RecordType::Crc, &sum.to_be_bytes())
    }

    /// Cut over to the next segment when the current one is full.
    fn maybe_roll(&mut self) -> Result<()> {
        if self.written < SEGMENT_MAX_BYTES {
            return Ok(());
        }
        self.seal()?;
        self.file.sync_all()?;
        self.seq += 1;
        self.file = open_segment(&self.dir, self.seq)?;
        self.written = 0;
        self.hasher = Hasher::new();
        Ok(())
    }
}

/// Read the coalesced log of a directory.
///
/// The node name is the directory's base name, matching how operators refer
/// to per-node WAL directories.
pub fn read_node_log(dir: impl AsRef<Path>, snapshot: Snapshot) -> Result<NodeLog> {
    let dir = dir.as_ref();
    let reader = open(dir, snapshot)?;
    let (metadata, state, entries) = reader.read_all()?;
    Ok(NodeLog {
        node_name: node_name(dir),
        metadata,
        state,
        entries,
    })
}

/// Read the coalesced log plus the raw-stream gap indices.
pub fn read_node_log_with_missing(
    dir: impl AsRef<Path>,
    snapshot: Snapshot,
) -> Result<(NodeLog, Vec<u64>)> {
    let dir = dir.as_ref();
    let reader = open(dir, snapshot)?;
    let (metadata, state, entries, missing) = reader.read_all_with_missing()?;
    Ok((
        NodeLog {
            node_name: node_name(dir),
            metadata,
            state,
            entries,
        },
        missing,
    ))
}

fn node_name(dir: &Path) -> String {
    dir.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Replace the log in `dir` with `log`, staging through a sibling directory.
///
/// The new log is fully written and synced under `<dir>.rewrite`, then the
/// directories are swapped by rename. A crash at any point leaves either
/// the old or the new log intact on disk.
pub fn rewrite(dir: impl AsRef<Path>, log: &NodeLog) -> Result<()> {
    let dir = dir.as_ref();
    let stage = sibling(dir, "rewrite");
    let retired = sibling(dir, "old");

    if stage.exists() {
        fs::remove_dir_all(&stage)
            .map_err(|err| WalError::WriteFailed(format!("clear stale staging dir: {err}")))?;
    }
    if retired.exists() {
        fs::remove_dir_all(&retired)
            .map_err(|err| WalError::WriteFailed(format!("clear stale retired dir: {err}")))?;
    }

    let mut writer = create(&stage, log.metadata.clone())
        .map_err(|err| WalError::WriteFailed(format!("stage rewrite: {err}")))?;
    writer
        .save(&log.state, &log.entries)
        .map_err(|err| WalError::WriteFailed(format!("stage rewrite: {err}")))?;
    drop(writer);

    if dir.exists() {
        fs::rename(dir, &retired)
            .map_err(|err| WalError::WriteFailed(format!("retire old segment dir: {err}")))?;
    }
    fs::rename(&stage, dir)
        .map_err(|err| WalError::WriteFailed(format!("activate rewritten segment dir: {err}")))?;
    if let Err(err) = fs::remove_dir_all(&retired) {
        if err.kind() != ErrorKind::NotFound {
            // The swap already succeeded; the leftover is only disk waste.
            tracing::warn!(dir = %retired.display(), error = %err, "failed to remove retired segment dir");
        }
    }
    Ok(())
}

fn sibling(dir: &Path, suffix: &str) -> PathBuf {
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dir.with_file_name(format!("{name}.{suffix}"))
}

fn write_varint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

/// Read a varint from the stream; `None` on clean or torn end of stream.
fn read_varint(reader: &mut impl Read) -> Result<Option<u64>> {
    let mut value = 0u64;
    let mut shift = 0u32;
    loop {
        let mut byte = [0u8; 1];
        match reader.read_exact(&mut byte) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(err) => return Err(err.into()),
        }
        if shift >= 64 {
            return Err(WalError::CorruptLog("varint overflows u64".to_string()));
        }
        value |= u64::from(byte[0] & 0x7f) << shift;
        if byte[0] & 0x80 == 0 {
            return Ok(Some(value));
        }
        shift += 7;
    }
}

fn decode_varint_at(buf: &[u8], offset: &mut usize) -> Result<u64> {
    let mut value = 0u64;
    let mut shift = 0u32;
    loop {
        let byte = *buf
            .get(*offset)
            .ok_or_else(|| WalError::CorruptLog("truncated varint in payload".to_string()))?;
        *offset += 1;
        if shift >= 64 {
            return Err(WalError::CorruptLog("varint overflows u64".to_string()));
        }
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
    }
}

fn encode_entry(entry: &Entry) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 * 10 + entry.data.len());
    write_varint(&mut out, entry.index);
    write_varint(&mut out, entry.term);
    write_varint(&mut out, entry.kind.as_u64());
    write_varint(&mut out, entry.data.len() as u64);
    out.extend_from_slice(&entry.data);
    out
}

fn decode_entry(buf: &[u8]) -> Result<Entry> {
    let mut offset = 0;
    let index = decode_varint_at(buf, &mut offset)?;
    let term = decode_varint_at(buf, &mut offset)?;
    let kind = decode_varint_at(buf, &mut offset)?;
    let kind = EntryKind::from_u64(kind)
        .ok_or_else(|| WalError::CorruptLog(format!("unknown entry kind {kind}")))?;
    let len = decode_varint_at(buf, &mut offset)? as usize;
    if offset + len > buf.len() {
        return Err(WalError::CorruptLog(format!(
            "entry payload short by {} bytes",
            offset + len - buf.len()
        )));
    }
    let data = buf[offset..offset + len].to_vec();
    Ok(Entry {
        index,
        term,
        kind,
        data,
    })
}

fn encode_hard_state(state: &HardState) -> Vec<u8> {
    let mut out = Vec::with_capacity(3 * 10);
    write_varint(&mut out, state.term);
    write_varint(&mut out, state.vote);
    write_varint(&mut out, state.commit);
    out
}

fn decode_hard_state(buf: &[u8]) -> Result<HardState> {
    let mut offset = 0;
    Ok(HardState {
        term: decode_varint_at(buf, &mut offset)?,
        vote: decode_varint_at(buf, &mut offset)?,
        commit: decode_varint_at(buf, &mut offset)?,
    })
}
