use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::Deserializer;
use tracing::{debug, info, instrument};

use super::TupleEngine;
use crate::command::Tuple;
use crate::{Result, TupleError};

// the size threshold (in bytes) of stale data that will trigger a log compaction
const COMPACTION_THRESHOLD: u64 = 1024 * 1024;

/// A persistent [`TupleEngine`] that appends every mutation to a "command log".
///
/// Logs are kept in a working directory as numbered generation files (`1.log`, `2.log`...).
/// An in-memory index maps each key to the position of its latest SET command. Once the size
/// of stale commands exceeds the compaction threshold, the live commands are copied into a
/// fresh log and the older generations are deleted.
///
/// Cloning a `LogStore` yields another handle onto the same logs.
#[derive(Debug, Clone)]
pub struct LogStore {
    inner: Arc<Mutex<LogStoreInner>>,
}

#[derive(Debug)]
struct LogStoreInner {
    // path to the directory containing the command log files
    working_dir: PathBuf,

    // the log generation currently written to
    current_log_gen: u64,

    // maps generation numbers to a reader of that log file
    readers: HashMap<u64, BufReaderWithPos<File>>,

    // writer of the current command log
    writer: BufWriterWithPos<File>,

    // maps keys to the position of their latest SET command
    index: BTreeMap<i32, CommandPos>,

    // number of bytes of stale commands that a compaction would drop
    uncompacted: u64,

    compaction_threshold: u64,
}

/// These are the command types that are recorded in the command log(s)
#[derive(Serialize, Deserialize, Debug)]
enum Command {
    Set { key: i32, tuple: Tuple },
    Remove { key: i32 },
}

impl LogStore {
    /// opens a `LogStore` keeping its logs in `working_dir`, creating the directory if it
    /// does not exist and loading the index from any logs already present
    pub fn open(working_dir: impl Into<PathBuf>) -> Result<LogStore> {
        LogStore::with_threshold(working_dir, COMPACTION_THRESHOLD)
    }

    /// like [`LogStore::open`], compacting once `threshold` bytes of stale commands pile up
    #[instrument(skip(working_dir))]
    pub fn with_threshold(working_dir: impl Into<PathBuf>, threshold: u64) -> Result<LogStore> {
        let working_dir = working_dir.into();
        fs::create_dir_all(&working_dir)?;
        info!("opening log store in {:?}", &working_dir);

        let log_gens = log_gens(&working_dir)?;
        debug!(?log_gens);

        let mut readers = HashMap::new();
        let mut index = BTreeMap::new();
        let mut uncompacted = 0_u64;

        for &gen in &log_gens {
            let mut reader = BufReaderWithPos::new(File::open(log_path(&working_dir, gen))?)?;
            uncompacted += load(gen, &mut reader, &mut index)?;
            readers.insert(gen, reader);
        }
        debug!(uncompacted, keys = index.len());

        let current_log_gen = log_gens.last().copied().unwrap_or(0) + 1;
        let writer = new_log_file(&working_dir, current_log_gen, &mut readers)?;

        Ok(LogStore {
            inner: Arc::new(Mutex::new(LogStoreInner {
                working_dir,
                current_log_gen,
                readers,
                writer,
                index,
                uncompacted,
                compaction_threshold: threshold,
            })),
        })
    }

    /// copies the live commands into a new log and deletes the stale generations
    pub fn compact(&self) -> Result<()> {
        self.lock().compact()
    }

    fn lock(&self) -> MutexGuard<'_, LogStoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl LogStoreInner {
    fn append(&mut self, command: &Command) -> Result<Range<u64>> {
        let start = self.writer.pos;
        serde_json::to_writer(&mut self.writer, command)?;
        self.writer.flush()?;
        Ok(start..self.writer.pos)
    }

    fn write_tuple(&mut self, key: i32, tuple: Tuple) -> Result<()> {
        if tuple.value2.iter().any(|v| !v.is_finite()) {
            return Err(TupleError::InvalidArgument(
                "the log store only persists finite doubles".into(),
            ));
        }
        let range = self.append(&Command::Set { key, tuple })?;
        if let Some(old) = self
            .index
            .insert(key, (self.current_log_gen, range).into())
        {
            self.uncompacted += old.len;
        }
        if self.uncompacted > self.compaction_threshold {
            self.compact()?;
        }
        Ok(())
    }

    fn read_tuple(&mut self, key: i32) -> Result<Option<Tuple>> {
        let CommandPos { gen, pos, len } = match self.index.get(&key) {
            Some(cmd_pos) => *cmd_pos,
            None => return Ok(None),
        };
        let reader = self.readers.get_mut(&gen).ok_or_else(|| {
            TupleError::StringErr(format!("no reader for log generation {}", gen))
        })?;
        reader.seek(SeekFrom::Start(pos))?;
        match serde_json::from_reader(reader.take(len))? {
            Command::Set { tuple, .. } => Ok(Some(tuple)),
            Command::Remove { .. } => Err(TupleError::StringErr(format!(
                "invalid command in logs for key: {} gen: {} pos: {} len: {}",
                key, gen, pos, len
            ))),
        }
    }

    fn compact(&mut self) -> Result<()> {
        // current gen + 1 holds the compacted commands, current gen + 2 takes new writes
        let compaction_gen = self.current_log_gen + 1;
        self.current_log_gen += 2;
        self.writer = new_log_file(&self.working_dir, self.current_log_gen, &mut self.readers)?;
        let mut compaction_writer =
            new_log_file(&self.working_dir, compaction_gen, &mut self.readers)?;

        let mut new_pos = 0;
        for cmd_pos in self.index.values_mut() {
            let reader = self.readers.get_mut(&cmd_pos.gen).ok_or_else(|| {
                TupleError::StringErr(format!("no reader for log generation {}", cmd_pos.gen))
            })?;
            if reader.pos != cmd_pos.pos {
                reader.seek(SeekFrom::Start(cmd_pos.pos))?;
            }
            let mut entry_reader = reader.take(cmd_pos.len);
            let len = io::copy(&mut entry_reader, &mut compaction_writer)?;
            *cmd_pos = (compaction_gen, new_pos..new_pos + len).into();
            new_pos += len;
        }
        compaction_writer.flush()?;

        let stale_gens: Vec<u64> = self
            .readers
            .keys()
            .filter(|&&gen| gen < compaction_gen)
            .copied()
            .collect();
        for gen in stale_gens {
            self.readers.remove(&gen);
            fs::remove_file(log_path(&self.working_dir, gen))?;
        }
        debug!(compaction_gen, bytes = new_pos, "compacted command logs");
        self.uncompacted = 0;
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        let gens: Vec<u64> = self.readers.keys().copied().collect();
        self.readers.clear();
        for gen in gens {
            fs::remove_file(log_path(&self.working_dir, gen))?;
        }
        self.index.clear();
        self.uncompacted = 0;
        self.current_log_gen += 1;
        self.writer = new_log_file(&self.working_dir, self.current_log_gen, &mut self.readers)?;
        Ok(())
    }
}

impl TupleEngine for LogStore {
    fn init(&self) -> Result<()> {
        info!("discarding all command logs");
        self.lock().clear()
    }

    fn set(&self, key: i32, tuple: Tuple) -> Result<()> {
        tuple.validate()?;
        let mut store = self.lock();
        if store.index.contains_key(&key) {
            return Err(TupleError::KeyExists(key));
        }
        store.write_tuple(key, tuple)
    }

    fn get(&self, key: i32) -> Result<Option<Tuple>> {
        self.lock().read_tuple(key)
    }

    fn modify(&self, key: i32, tuple: Tuple) -> Result<()> {
        tuple.validate()?;
        let mut store = self.lock();
        if !store.index.contains_key(&key) {
            return Err(TupleError::KeyNotFound(key));
        }
        store.write_tuple(key, tuple)
    }

    fn delete(&self, key: i32) -> Result<()> {
        let mut store = self.lock();
        if !store.index.contains_key(&key) {
            return Err(TupleError::KeyNotFound(key));
        }
        let range = store.append(&Command::Remove { key })?;
        if let Some(old) = store.index.remove(&key) {
            // the remove command itself is stale as well
            store.uncompacted += old.len + (range.end - range.start);
        }
        Ok(())
    }

    fn exist(&self, key: i32) -> Result<bool> {
        Ok(self.lock().index.contains_key(&key))
    }
}

/// loads the commands of one log file into `index`, returning the number of stale bytes
fn load(
    gen: u64,
    reader: &mut BufReaderWithPos<File>,
    index: &mut BTreeMap<i32, CommandPos>,
) -> Result<u64> {
    let mut pos = reader.seek(SeekFrom::Start(0))?;
    let mut uncompacted = 0_u64;
    let mut stream = Deserializer::from_reader(reader).into_iter::<Command>();

    while let Some(command) = stream.next() {
        let end = stream.byte_offset() as u64;
        let len = end - pos;
        match command? {
            Command::Set { key, .. } => {
                if let Some(old) = index.insert(key, CommandPos { gen, pos, len }) {
                    uncompacted += old.len;
                }
            }
            Command::Remove { key } => {
                if let Some(old) = index.remove(&key) {
                    uncompacted += old.len;
                }
                uncompacted += len;
            }
        }
        pos = end;
    }
    Ok(uncompacted)
}

fn log_path(dir: &Path, gen: u64) -> PathBuf {
    dir.join(format!("{}.log", gen))
}

/// creates the log file for `gen`, registers a reader for it and returns its writer
fn new_log_file(
    dir: &Path,
    gen: u64,
    readers: &mut HashMap<u64, BufReaderWithPos<File>>,
) -> Result<BufWriterWithPos<File>> {
    let path = log_path(dir, gen);
    let writer = BufWriterWithPos::new(
        OpenOptions::new()
            .create(true)
            .write(true)
            .append(true)
            .open(&path)?,
    )?;
    readers.insert(gen, BufReaderWithPos::new(File::open(&path)?)?);
    Ok(writer)
}

/// returns the generation numbers of the `.log` files in `dir`, sorted in ascending order.
/// Files whose stem is not an integer are ignored.
fn log_gens(dir: &Path) -> Result<Vec<u64>> {
    let mut gens: Vec<u64> = fs::read_dir(dir)?
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && path.extension().map_or(false, |ext| ext == "log"))
        .filter_map(|path| {
            path.file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| stem.parse::<u64>().ok())
        })
        .collect();
    gens.sort_unstable();
    Ok(gens)
}

/// position of a command within a log file
#[derive(Debug, Copy, Clone)]
struct CommandPos {
    gen: u64,
    pos: u64,
    len: u64,
}

impl From<(u64, Range<u64>)> for CommandPos {
    fn from((gen, range): (u64, Range<u64>)) -> Self {
        CommandPos {
            gen,
            pos: range.start,
            len: range.end - range.start,
        }
    }
}

/// a BufReader that tracks its current seek position
#[derive(Debug)]
struct BufReaderWithPos<R: Read + Seek> {
    reader: BufReader<R>,
    pos: u64,
}

impl<R: Read + Seek> BufReaderWithPos<R> {
    fn new(mut inner: R) -> Result<Self> {
        let pos = inner.seek(SeekFrom::Current(0))?;
        Ok(BufReaderWithPos {
            reader: BufReader::new(inner),
            pos,
        })
    }
}

impl<R: Read + Seek> Read for BufReaderWithPos<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let len = self.reader.read(buf)?;
        self.pos += len as u64;
        Ok(len)
    }
}

impl<R: Read + Seek> Seek for BufReaderWithPos<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.pos = self.reader.seek(pos)?;
        Ok(self.pos)
    }
}

/// a BufWriter that tracks how many bytes went into the file
#[derive(Debug)]
struct BufWriterWithPos<W: Write + Seek> {
    writer: BufWriter<W>,
    pos: u64,
}

impl<W: Write + Seek> BufWriterWithPos<W> {
    fn new(mut inner: W) -> Result<Self> {
        // files are opened in append mode, start at the end
        let pos = inner.seek(SeekFrom::End(0))?;
        Ok(BufWriterWithPos {
            writer: BufWriter::new(inner),
            pos,
        })
    }
}

impl<W: Write + Seek> Write for BufWriterWithPos<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let len = self.writer.write(buf)?;
        self.pos += len as u64;
        Ok(len)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}
