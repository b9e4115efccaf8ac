use super::error::EngineError;
use super::process::ProcessHandle;
use crate::core::io::traits::{Decoded, RecordDecoder, TrajectoryError};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::{debug, trace};

/// Incremental decoder over a file that another process is still writing.
///
/// `offset` is the number of bytes consumed by complete records; `buffer` holds bytes read
/// past that point which do not yet form a complete record. The cursor only moves forward
/// by whole records, so a partially written record is decoded again once it is complete.
pub struct TrajectoryTail<D: RecordDecoder> {
    decoder: D,
    path: PathBuf,
    file: File,
    inode: Option<u64>,
    buffer: Vec<u8>,
    offset: u64,
    records: usize,
    pending_header: Option<(D::Header, usize)>,
}

impl<D: RecordDecoder> TrajectoryTail<D> {
    pub fn open(path: &Path, decoder: D) -> io::Result<Self> {
        let file = File::open(path)?;
        let inode = inode_of(&file.metadata()?);
        Ok(Self {
            decoder,
            path: path.to_path_buf(),
            file,
            inode,
            buffer: Vec::new(),
            offset: 0,
            records: 0,
            pending_header: None,
        })
    }

    /// Bytes consumed by complete records so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn records(&self) -> usize {
        self.records
    }

    pub fn inode(&self) -> Option<u64> {
        self.inode
    }

    /// Attempts to decode the next record from whatever is on disk right now.
    ///
    /// Returns `Ok(None)` when the record is not complete yet. If the file was replaced
    /// by a new one, the new file is opened at the same logical offset first.
    pub fn try_next(&mut self) -> Result<Option<D::Frame>, TrajectoryError> {
        self.fill()?;
        if let Some(frame) = self.decode_buffered()? {
            return Ok(Some(frame));
        }
        if self.reopen_if_replaced()? {
            self.fill()?;
            return self.decode_buffered();
        }
        Ok(None)
    }

    /// Decodes every complete record still on disk, discarding incomplete trailing bytes.
    pub fn drain(&mut self) -> Result<Vec<D::Frame>, TrajectoryError> {
        let mut frames = Vec::new();
        loop {
            match self.try_next()? {
                Some(frame) => frames.push(frame),
                None => break,
            }
        }
        if !self.buffer.is_empty() {
            debug!(
                path = %self.path.display(),
                offset = self.offset,
                discarded = self.buffer.len(),
                "Discarding incomplete trailing record"
            );
        }
        Ok(frames)
    }

    fn fill(&mut self) -> io::Result<usize> {
        self.file.read_to_end(&mut self.buffer)
    }

    fn decode_buffered(&mut self) -> Result<Option<D::Frame>, TrajectoryError> {
        let (header, header_len) = match self.pending_header.take() {
            Some(pending) => pending,
            None => match self.decoder.read_header(&self.buffer, self.offset)? {
                Decoded::Complete { value, consumed } => (value, consumed),
                Decoded::NeedMoreData => return Ok(None),
            },
        };

        let data_offset = self.offset + header_len as u64;
        match self
            .decoder
            .read_data(&self.buffer[header_len..], &header, data_offset)?
        {
            Decoded::Complete { value, consumed } => {
                let total = header_len + consumed;
                self.buffer.drain(..total);
                self.offset += total as u64;
                self.records += 1;
                trace!(offset = self.offset, records = self.records, "Decoded record");
                Ok(Some(value))
            }
            Decoded::NeedMoreData => {
                self.pending_header = Some((header, header_len));
                Ok(None)
            }
        }
    }

    fn reopen_if_replaced(&mut self) -> io::Result<bool> {
        let current = match std::fs::metadata(&self.path) {
            Ok(meta) => inode_of(&meta),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e),
        };
        if current.is_none() || current == self.inode {
            return Ok(false);
        }
        debug!(
            path = %self.path.display(),
            old_inode = ?self.inode,
            new_inode = ?current,
            offset = self.offset,
            "Trajectory file was replaced; reopening at the same offset"
        );
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(self.offset))?;
        self.inode = inode_of(&file.metadata()?);
        self.file = file;
        self.buffer.clear();
        self.pending_header = None;
        Ok(true)
    }
}

#[cfg(unix)]
fn inode_of(meta: &std::fs::Metadata) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    Some(meta.ino())
}

#[cfg(not(unix))]
fn inode_of(_meta: &std::fs::Metadata) -> Option<u64> {
    None
}

/// What to launch and which files to expect from it.
#[derive(Debug, Clone)]
pub struct RunSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    /// The binary trajectory to stream.
    pub trajectory: PathBuf,
    /// Further files that must exist before streaming starts.
    pub expected: Vec<PathBuf>,
    pub poll_interval: Duration,
    pub stop_timeout: Duration,
}

enum RunnerState<F> {
    Streaming,
    Draining(VecDeque<F>),
    Finished,
}

/// Runs an external program and yields the trajectory frames it writes, while it writes them.
///
/// The runner is a finite, single-pass sequence. The process is stopped and the file
/// closed when the sequence ends, on the first error, on [`StreamingRunner::stop`], and
/// when the runner is dropped early.
pub struct StreamingRunner<D: RecordDecoder> {
    process: ProcessHandle,
    tail: Option<TrajectoryTail<D>>,
    state: RunnerState<D::Frame>,
    poll_interval: Duration,
    stop_timeout: Duration,
    stopped: bool,
}

impl<D: RecordDecoder> StreamingRunner<D> {
    /// Starts the program and waits until all expected output files exist.
    ///
    /// # Errors
    ///
    /// [`EngineError::ProcessFailed`] if the program exits unsuccessfully before the files
    /// appear, [`EngineError::MissingOutput`] if it exits successfully without them.
    pub fn start(spec: &RunSpec, decoder: D) -> Result<Self, EngineError> {
        let mut process = ProcessHandle::start(&spec.program, &spec.args, &spec.cwd)?;
        let expected: Vec<&Path> = std::iter::once(spec.trajectory.as_path())
            .chain(spec.expected.iter().map(PathBuf::as_path))
            .collect();

        loop {
            let exited = process.poll()?;
            let missing = expected.iter().find(|p| !p.exists()).copied();
            match (missing, exited) {
                (None, _) => break,
                (Some(_), Some(status)) if !status.success() => {
                    return Err(process.failure(status));
                }
                (Some(path), Some(_)) => {
                    return Err(EngineError::MissingOutput {
                        path: path.to_path_buf(),
                    });
                }
                (Some(path), None) => {
                    trace!(path = %path.display(), "Waiting for output file");
                    thread::sleep(spec.poll_interval);
                }
            }
        }

        let tail = TrajectoryTail::open(&spec.trajectory, decoder)?;
        debug!(
            trajectory = %spec.trajectory.display(),
            inode = ?tail.inode(),
            "Streaming trajectory"
        );
        Ok(Self {
            process,
            tail: Some(tail),
            state: RunnerState::Streaming,
            poll_interval: spec.poll_interval,
            stop_timeout: spec.stop_timeout,
            stopped: false,
        })
    }

    /// Blocks until the next frame is available or the sequence has ended.
    pub fn next_frame(&mut self) -> Result<Option<D::Frame>, EngineError> {
        let result = self.advance();
        match &result {
            Ok(Some(_)) => {}
            Ok(None) | Err(_) => {
                self.state = RunnerState::Finished;
                self.stop()?;
            }
        }
        result
    }

    /// Bytes of the trajectory consumed by complete frames.
    pub fn offset(&self) -> u64 {
        self.tail.as_ref().map_or(0, TrajectoryTail::offset)
    }

    pub fn records_read(&self) -> usize {
        self.tail.as_ref().map_or(0, TrajectoryTail::records)
    }

    /// Closes the trajectory and stops the program. Idempotent.
    pub fn stop(&mut self) -> Result<(), EngineError> {
        self.tail = None;
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;
        self.state = RunnerState::Finished;
        self.process.stop(self.stop_timeout)?;
        Ok(())
    }

    fn advance(&mut self) -> Result<Option<D::Frame>, EngineError> {
        loop {
            match &mut self.state {
                RunnerState::Finished => return Ok(None),
                RunnerState::Draining(queue) => return Ok(queue.pop_front()),
                RunnerState::Streaming => {}
            }
            let Some(tail) = self.tail.as_mut() else {
                return Ok(None);
            };

            if self.process.check()?.is_some() {
                let frames = tail.drain()?;
                debug!(remaining = frames.len(), "Program exited; draining trajectory");
                self.state = RunnerState::Draining(frames.into());
                continue;
            }

            if let Some(frame) = tail.try_next()? {
                return Ok(Some(frame));
            }
            thread::sleep(self.poll_interval);
        }
    }
}

impl<D: RecordDecoder> Iterator for StreamingRunner<D> {
    type Item = Result<D::Frame, EngineError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_frame().transpose()
    }
}

impl<D: RecordDecoder> Drop for StreamingRunner<D> {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            debug!("Error while stopping streaming runner: {}", e);
        }
    }
}
