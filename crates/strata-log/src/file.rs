use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use strata_types::PartitionKey;
use tracing::{debug, warn};

use crate::error::{LogError, LogResult};
use crate::message::{LogEntry, LogMessage, Offset};
use crate::traits::{LogEntries, ReplicatedLog};

/// Flush/sync strategy for segment files.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncMode {
    /// `fsync` after every append (safest, highest latency).
    EveryWrite,
    /// Rely on OS page-cache buffering (fastest, least durable).
    #[default]
    OsDefault,
}

/// Configuration for [`FileLog`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileLogConfig {
    /// Directory holding one segment file per partition.
    pub dir: PathBuf,
    /// Sync/flush strategy.
    pub sync_mode: SyncMode,
}

impl Default for FileLogConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".strata/log"),
            sync_mode: SyncMode::default(),
        }
    }
}

/// Header size: 4 bytes length + 4 bytes CRC.
const HEADER_SIZE: usize = 8;

struct SegmentWriter {
    writer: BufWriter<File>,
    /// End of the last complete frame.
    offset: u64,
}

/// File-backed log with one append-only segment per partition.
///
/// On-disk frame format:
/// ```text
/// [4 bytes: payload length (little-endian u32)]
/// [4 bytes: CRC32 of payload (little-endian u32)]
/// [N bytes: payload (bincode-serialized LogMessage)]
/// ```
///
/// Offsets are byte positions within the segment. Frames that fail the CRC
/// check are skipped on read. A torn frame at the end of a segment (from a
/// crash mid-append) is cut off the next time the segment is opened for
/// writing.
pub struct FileLog {
    config: FileLogConfig,
    writers: Mutex<HashMap<PartitionKey, SegmentWriter>>,
}

impl FileLog {
    /// Open (or create) a log in the configured directory.
    pub fn open(config: FileLogConfig) -> LogResult<Self> {
        fs::create_dir_all(&config.dir)?;
        debug!(dir = %config.dir.display(), "file log opened");
        Ok(Self {
            config,
            writers: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &FileLogConfig {
        &self.config
    }

    /// Path of the segment file backing a partition.
    pub fn segment_path(&self, partition: &PartitionKey) -> PathBuf {
        let topic: String = partition
            .topic()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.config
            .dir
            .join(format!("{topic}-{}.log", partition.index()))
    }

    fn open_segment(&self, partition: &PartitionKey) -> LogResult<SegmentWriter> {
        let path = self.segment_path(partition);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;

        let file_len = file.metadata()?.len();
        let valid_len = scan_frames(&path, file_len)?;
        if valid_len < file_len {
            warn!(
                partition = %partition,
                valid_len,
                file_len,
                "torn frame at end of segment; truncating"
            );
            file.set_len(valid_len)?;
        }

        Ok(SegmentWriter {
            writer: BufWriter::new(file),
            offset: valid_len,
        })
    }

    /// Bytes of the segment that are safe to read.
    fn readable_len(&self, partition: &PartitionKey, path: &Path) -> LogResult<Option<u64>> {
        let writers = self.writers.lock().expect("lock poisoned");
        if let Some(w) = writers.get(partition) {
            return Ok(Some(w.offset));
        }
        match fs::metadata(path) {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl ReplicatedLog for FileLog {
    fn append(&self, partition: &PartitionKey, message: LogMessage) -> LogResult<Offset> {
        let frame = encode_frame(&message)?;

        let mut writers = self.writers.lock().expect("lock poisoned");
        let w = match writers.entry(partition.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(self.open_segment(partition)?),
        };

        let entry_offset = w.offset;
        w.writer.write_all(&frame)?;
        w.writer.flush()?;
        if self.config.sync_mode == SyncMode::EveryWrite {
            w.writer.get_ref().sync_all()?;
        }
        w.offset += frame.len() as u64;

        debug!(
            partition = %partition,
            offset = entry_offset,
            len = frame.len(),
            kind = message.kind(),
            "log append"
        );
        Ok(entry_offset)
    }

    fn read_from(&self, partition: &PartitionKey, from: Offset) -> LogResult<LogEntries<'_>> {
        let path = self.segment_path(partition);
        let Some(len) = self.readable_len(partition, &path)? else {
            return Ok(Box::new(std::iter::empty()));
        };
        let mut reader = BufReader::new(File::open(&path)?);
        reader.seek(SeekFrom::Start(from))?;
        Ok(Box::new(SegmentReader {
            reader,
            partition: partition.clone(),
            offset: from,
            len,
            done: false,
        }))
    }
}

impl std::fmt::Debug for FileLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileLog")
            .field("dir", &self.config.dir)
            .field("sync_mode", &self.config.sync_mode)
            .finish()
    }
}

fn encode_frame(message: &LogMessage) -> LogResult<Bytes> {
    let payload =
        bincode::serialize(message).map_err(|e| LogError::Serialization(e.to_string()))?;
    let length = u32::try_from(payload.len())
        .map_err(|_| LogError::Serialization(format!("message too large: {} bytes", payload.len())))?;

    let mut frame = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    frame.put_u32_le(length);
    frame.put_u32_le(crc32fast::hash(&payload));
    frame.put_slice(&payload);
    Ok(frame.freeze())
}

fn parse_header(header: &[u8; HEADER_SIZE]) -> (u32, u32) {
    let length = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    (length, crc)
}

/// Walk frame headers and return the end of the last complete frame.
fn scan_frames(path: &Path, file_len: u64) -> LogResult<u64> {
    let mut file = BufReader::new(File::open(path)?);
    let mut offset: u64 = 0;
    let mut header = [0u8; HEADER_SIZE];

    while offset + HEADER_SIZE as u64 <= file_len {
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut header)?;
        let (length, _) = parse_header(&header);
        let end = offset + HEADER_SIZE as u64 + u64::from(length);
        if length == 0 || end > file_len {
            break;
        }
        offset = end;
    }
    Ok(offset)
}

/// Lazy reader over the frames of one segment, stopping at `len`.
struct SegmentReader {
    reader: BufReader<File>,
    partition: PartitionKey,
    offset: u64,
    len: u64,
    done: bool,
}

impl SegmentReader {
    fn read_frame(&mut self) -> LogResult<Option<LogEntry>> {
        while !self.done && self.offset + HEADER_SIZE as u64 <= self.len {
            let mut header = [0u8; HEADER_SIZE];
            self.reader.read_exact(&mut header)?;
            let (length, expected_crc) = parse_header(&header);

            let next = self.offset + HEADER_SIZE as u64 + u64::from(length);
            if length == 0 || next > self.len {
                warn!(
                    partition = %self.partition,
                    offset = self.offset,
                    length,
                    "invalid frame length; stopping read"
                );
                self.done = true;
                break;
            }

            let mut payload = vec![0u8; length as usize];
            self.reader.read_exact(&mut payload)?;
            let offset = self.offset;
            self.offset = next;

            let actual_crc = crc32fast::hash(&payload);
            if actual_crc != expected_crc {
                warn!(
                    partition = %self.partition,
                    offset,
                    expected = expected_crc,
                    actual = actual_crc,
                    "CRC mismatch; skipping frame"
                );
                continue;
            }

            match bincode::deserialize::<LogMessage>(&payload) {
                Ok(message) => {
                    return Ok(Some(LogEntry {
                        offset,
                        next,
                        message,
                    }))
                }
                Err(e) => {
                    warn!(partition = %self.partition, offset, error = %e, "undecodable frame; skipping");
                }
            }
        }
        Ok(None)
    }
}

impl Iterator for SegmentReader {
    type Item = LogResult<LogEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.read_frame() {
            Ok(entry) => entry.map(Ok),
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
