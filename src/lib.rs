//! A simple independent parallel file I/O engine for rank-addressed block records.
//!
//! This library lets many cooperating processes (or threads) write fixed-size,
//! non-overlapping records into one shared file at offsets computed purely from each
//! participant's rank. Because distinct ranks never target overlapping byte ranges,
//! the engine needs no locks, barriers, or coordination messages for correctness.
//!
//! # Features
//!
//! - **Rank Addressing**: Deterministic, collision-free byte layout derived from rank alone
//! - **Positioned I/O**: Every read and write carries its own offset; no shared cursor
//! - **Record Codec**: Fixed-width little-endian encoding of dense scalar arrays
//! - **Participation Policy**: An injectable predicate decides which ranks perform I/O
//! - **Process Launching**: Spawn and wait on a group of participant processes
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use simple_pario::{
//!     AccessMode, IndependentIoSession, ParticipantGroup, RecordShape,
//! };
//!
//! // Rank 2 of a group of 4, each rank owning ten i64 values.
//! let group = ParticipantGroup::new(2, 4).unwrap();
//! let shape = RecordShape::of::<i64>(10).unwrap();
//!
//! let session = IndependentIoSession::open(
//!     group,
//!     "./datafile.independent",
//!     AccessMode::WriteOnly,
//!     true,
//!     shape,
//! )
//! .unwrap();
//!
//! // Write this rank's record at its own computed offset.
//! let buffer = vec![group.rank() as i64; 10];
//! session.write_record(&buffer, |_rank| true).unwrap();
//! session.close().unwrap();
//! ```
//!
//! # Architecture
//!
//! The on-disk layout is exactly `group_size` consecutive fixed-width records: rank `r`
//! owns bytes `[r * record_size, (r + 1) * record_size)`. There is no header, footer,
//! or metadata, so any tool that knows the group size and record shape can parse the
//! file without this engine.
//!
//! Independent I/O guarantees nothing about ordering or visibility *between* ranks.
//! A reader that depends on another rank's write must synchronize externally (for
//! example, by waiting on the writer's process) before reading. Likewise, if two
//! participants are ever given overlapping ranges (a caller bug such as mismatched
//! record shapes across ranks), the engine provides no protection against the
//! resulting race. Disjointness is a distributed precondition, not a local check.
//!
//! # Error Handling
//!
//! All operations return a `Result` type with detailed error variants through
//! [`PariError`]. A failure in one participant never affects, undoes, or blocks the
//! others: a group-wide write may end up partially applied, and detecting that is the
//! caller's responsibility (for example, by gathering every rank's [`IoOutcome`]).

use bytemuck::Pod;
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use thiserror::Error;

const RANK_ENV: &str = "PARIO_RANK";
const SIZE_ENV: &str = "PARIO_SIZE";

#[derive(Error, Debug)]
pub enum PariError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Failed to open {path:?}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{op} at offset {offset} failed{}: {source}", rank_suffix(.rank))]
    Io {
        op: &'static str,
        rank: Option<i32>,
        offset: i64,
        source: std::io::Error,
    },
    #[error("Out of space at offset {offset}{}", rank_suffix(.rank))]
    OutOfSpace { rank: Option<i32>, offset: i64 },
    #[error("Invalid offset: {0}")]
    InvalidOffset(i64),
    #[error("Truncated data: need {expected} bytes, got {actual}")]
    TruncatedData { expected: usize, actual: usize },
    #[error("Process error: {0}")]
    Process(String),
}

fn rank_suffix(rank: &Option<i32>) -> String {
    match rank {
        Some(rank) => format!(" (rank {rank})"),
        None => String::new(),
    }
}

impl PariError {
    /// Attribute a medium-level failure to the rank whose range it hit.
    fn with_rank(self, rank: i32) -> Self {
        match self {
            PariError::Io {
                op,
                offset,
                source,
                ..
            } => PariError::Io {
                op,
                rank: Some(rank),
                offset,
                source,
            },
            PariError::OutOfSpace { offset, .. } => PariError::OutOfSpace {
                rank: Some(rank),
                offset,
            },
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, PariError>;

/// Identity of one participant within a cooperating group.
///
/// A `ParticipantGroup` is pure naming: the group's size and this participant's rank
/// in `[0, size)`. It is assigned by whatever launched the participants; this engine
/// only observes it. Rank 0 is conventionally the root.
///
/// # Examples
///
/// ```rust
/// use simple_pario::ParticipantGroup;
///
/// let group = ParticipantGroup::new(1, 4).unwrap();
/// assert_eq!(group.rank(), 1);
/// assert_eq!(group.size(), 4);
///
/// // Rank must stay below size.
/// assert!(ParticipantGroup::new(4, 4).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParticipantGroup {
    rank: i32,
    size: i32,
}

impl ParticipantGroup {
    /// Create a group identity, validating `0 <= rank < size`.
    pub fn new(rank: i32, size: i32) -> Result<Self> {
        if size <= 0 {
            return Err(PariError::InvalidArgument(format!(
                "group size must be positive, got {size}"
            )));
        }
        if rank < 0 || rank >= size {
            return Err(PariError::InvalidArgument(format!(
                "rank {rank} out of range for group of {size}"
            )));
        }
        Ok(Self { rank, size })
    }

    /// Whether this process was spawned by a [`Launcher`].
    pub fn is_spawned() -> bool {
        std::env::var_os(RANK_ENV).is_some()
    }

    /// Read the identity a [`Launcher`] assigned to this process.
    pub fn from_env() -> Result<Self> {
        let rank = parse_env(RANK_ENV)?;
        let size = parse_env(SIZE_ENV)?;
        Self::new(rank, size)
    }

    /// Get the rank (unique identifier) of this participant.
    pub fn rank(&self) -> i32 {
        self.rank
    }

    /// Get the total number of participants in the group.
    pub fn size(&self) -> i32 {
        self.size
    }
}

fn parse_env(name: &str) -> Result<i32> {
    let raw = std::env::var(name)
        .map_err(|_| PariError::InvalidArgument(format!("{name} is not set")))?;
    raw.parse()
        .map_err(|_| PariError::InvalidArgument(format!("{name} is not a valid rank: {raw}")))
}

/// Spawns and waits on the other members of a participant group.
///
/// The root process re-executes the current binary once per additional rank, passing
/// each child its identity through environment variables. A spawned child detects this
/// with [`ParticipantGroup::is_spawned`] and recovers its identity with
/// [`ParticipantGroup::from_env`].
///
/// # Examples
///
/// ```rust,no_run
/// use simple_pario::{Launcher, ParticipantGroup};
///
/// let group = if ParticipantGroup::is_spawned() {
///     ParticipantGroup::from_env().unwrap()
/// } else {
///     let (group, launcher) = Launcher::spawn_group(4).unwrap();
///     // ... rank 0 does its work here ...
///     launcher.wait().unwrap();
///     group
/// };
/// println!("participant {} of {}", group.rank(), group.size());
/// ```
pub struct Launcher {
    children: Vec<std::process::Child>,
}

impl Launcher {
    /// Spawn `size - 1` copies of the current binary as ranks `1..size` and become
    /// rank 0. Children inherit stdout/stderr.
    pub fn spawn_group(size: i32) -> Result<(ParticipantGroup, Launcher)> {
        let exe = std::env::current_exe()
            .map_err(|e| PariError::Process(format!("cannot resolve current executable: {e}")))?;
        Self::spawn_group_with(&exe, size)
    }

    fn spawn_group_with(program: &Path, size: i32) -> Result<(ParticipantGroup, Launcher)> {
        let group = ParticipantGroup::new(0, size)?;

        debug!("Spawning {} participants", size - 1);
        let mut children = Vec::with_capacity(size as usize - 1);
        for rank in 1..size {
            let child = Command::new(program)
                .env(RANK_ENV, rank.to_string())
                .env(SIZE_ENV, size.to_string())
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit())
                .spawn()
                .map_err(|e| PariError::Process(format!("failed to spawn rank {rank}: {e}")))?;
            children.push(child);
        }

        Ok((group, Launcher { children }))
    }

    /// Block until every spawned participant has exited. Fails on the first rank
    /// that exited unsuccessfully; later children are still waited on first.
    pub fn wait(mut self) -> Result<()> {
        let mut first_failure = None;
        for (idx, child) in self.children.iter_mut().enumerate() {
            let rank = idx as i32 + 1;
            let status = child
                .wait()
                .map_err(|e| PariError::Process(format!("failed to wait on rank {rank}: {e}")))?;
            debug!("Rank {} exited with {}", rank, status);
            if !status.success() && first_failure.is_none() {
                first_failure = Some(PariError::Process(format!(
                    "rank {rank} exited with {status}"
                )));
            }
        }
        match first_failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// A contiguous span of bytes in the shared file. Derived from identity, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub offset: i64,
    pub size: i64,
}

impl ByteRange {
    /// Exclusive end offset of the range.
    pub fn end(&self) -> i64 {
        self.offset + self.size
    }
}

/// Compute the byte range owned by `rank` in a group of `group_size`, where every
/// participant writes a record of `record_size_bytes`.
///
/// Ranges tile the file contiguously from byte 0: rank `r` owns
/// `[r * record_size_bytes, (r + 1) * record_size_bytes)`, so ranges for distinct
/// ranks are always disjoint. Pure function, no I/O.
///
/// # Examples
///
/// ```rust
/// use simple_pario::record_range;
///
/// let range = record_range(2, 4, 80).unwrap();
/// assert_eq!(range.offset, 160);
/// assert_eq!(range.size, 80);
/// ```
pub fn record_range(rank: i32, group_size: i32, record_size_bytes: i64) -> Result<ByteRange> {
    // Same identity invariant as ParticipantGroup::new.
    ParticipantGroup::new(rank, group_size)?;
    if record_size_bytes <= 0 {
        return Err(PariError::InvalidArgument(format!(
            "record size must be positive, got {record_size_bytes}"
        )));
    }
    let offset = (rank as i64).checked_mul(record_size_bytes).ok_or_else(|| {
        PariError::InvalidArgument(format!(
            "offset overflow for rank {rank} with record size {record_size_bytes}"
        ))
    })?;
    Ok(ByteRange {
        offset,
        size: record_size_bytes,
    })
}

/// The scalar kind stored in a record, with its fixed on-disk width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElementType {
    I32,
    I64,
    U32,
    U64,
    F32,
    F64,
}

impl ElementType {
    /// On-disk width of one element in bytes.
    pub fn width(&self) -> usize {
        match self {
            ElementType::I32 | ElementType::U32 | ElementType::F32 => 4,
            ElementType::I64 | ElementType::U64 | ElementType::F64 => 8,
        }
    }
}

/// A scalar that can live in a record: plain old data with a declared
/// [`ElementType`] and little-endian byte conversion.
pub trait Scalar: Pod {
    const ELEMENT: ElementType;

    fn put_le(&self, out: &mut [u8]);
    fn get_le(bytes: &[u8]) -> Self;
}

macro_rules! impl_scalar {
    ($ty:ty, $element:expr) => {
        impl Scalar for $ty {
            const ELEMENT: ElementType = $element;

            fn put_le(&self, out: &mut [u8]) {
                out.copy_from_slice(&self.to_le_bytes());
            }

            fn get_le(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$ty>()];
                raw.copy_from_slice(bytes);
                Self::from_le_bytes(raw)
            }
        }
    };
}

impl_scalar!(i32, ElementType::I32);
impl_scalar!(i64, ElementType::I64);
impl_scalar!(u32, ElementType::U32);
impl_scalar!(u64, ElementType::U64);
impl_scalar!(f32, ElementType::F32);
impl_scalar!(f64, ElementType::F64);

/// The fixed shape every record in a session must have: a dense array of one scalar
/// kind. Every participant in a group must use the identical shape, or their byte
/// ranges will not line up; see the crate-level notes on disjointness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordShape {
    pub element: ElementType,
    pub len: usize,
}

impl RecordShape {
    /// Create a shape, validating that the element count is positive.
    pub fn new(element: ElementType, len: usize) -> Result<Self> {
        if len == 0 {
            return Err(PariError::InvalidArgument(
                "record length must be positive".into(),
            ));
        }
        Ok(Self { element, len })
    }

    /// Shape of `len` elements of the Rust scalar type `T`.
    pub fn of<T: Scalar>(len: usize) -> Result<Self> {
        Self::new(T::ELEMENT, len)
    }

    /// Total on-disk size of one record in bytes.
    pub fn size_bytes(&self) -> usize {
        self.element.width() * self.len
    }
}

/// Serialize a dense scalar array to its on-disk layout: fixed-width little-endian
/// elements, no length prefix, no padding.
pub fn encode<T: Scalar>(values: &[T]) -> Vec<u8> {
    let width = T::ELEMENT.width();
    let mut out = vec![0u8; values.len() * width];
    for (value, chunk) in values.iter().zip(out.chunks_exact_mut(width)) {
        value.put_le(chunk);
    }
    out
}

/// Deserialize `len` elements of `T` from their on-disk layout.
///
/// Fails with [`PariError::TruncatedData`] if `bytes` holds fewer than
/// `len * width` bytes; trailing bytes beyond the expected size are ignored.
pub fn decode<T: Scalar>(bytes: &[u8], len: usize) -> Result<Vec<T>> {
    let width = T::ELEMENT.width();
    let expected = len * width;
    if bytes.len() < expected {
        return Err(PariError::TruncatedData {
            expected,
            actual: bytes.len(),
        });
    }
    Ok(bytes[..expected].chunks_exact(width).map(T::get_le).collect())
}

/// How a [`FileHandle`] may touch the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

/// Result of one positioned operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IoStatus {
    /// Every requested byte was transferred.
    Success,
    /// A read stopped short at end-of-file.
    Partial,
    /// The participation policy excluded this rank; no I/O was performed.
    Skipped,
}

/// Per-operation accounting: how many bytes moved and how the operation ended.
/// Serializable so each rank can report its outcome to a coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoOutcome {
    pub bytes_transferred: u64,
    pub status: IoStatus,
}

impl IoOutcome {
    pub fn success(bytes_transferred: u64) -> Self {
        Self {
            bytes_transferred,
            status: IoStatus::Success,
        }
    }

    pub fn partial(bytes_transferred: u64) -> Self {
        Self {
            bytes_transferred,
            status: IoStatus::Partial,
        }
    }

    pub fn skipped() -> Self {
        Self {
            bytes_transferred: 0,
            status: IoStatus::Skipped,
        }
    }
}

/// Owns one open file and exposes positioned reads and writes against it.
///
/// Every operation carries its own byte offset; no shared cursor exists or is
/// mutated, which is what permits concurrent use of one handle from many threads
/// (operations take `&self`) and of many handles on one path from many processes.
///
/// The handle must be closed explicitly with [`FileHandle::close`], which syncs file
/// contents to the medium before releasing the descriptor. Dropping an unclosed
/// handle releases the descriptor but cannot report sync failures.
///
/// # Examples
///
/// ```rust,no_run
/// use simple_pario::{AccessMode, FileHandle};
///
/// let mut handle = FileHandle::open("./data.bin", AccessMode::ReadWrite, true).unwrap();
/// handle.write_at(64, b"record").unwrap();
/// let (bytes, outcome) = handle.read_at(64, 6).unwrap();
/// assert_eq!(&bytes, b"record");
/// assert_eq!(outcome.bytes_transferred, 6);
/// handle.close().unwrap();
/// ```
#[derive(Debug)]
pub struct FileHandle {
    file: Option<std::fs::File>,
    path: PathBuf,
}

impl FileHandle {
    /// Open (and optionally create) the file at `path`.
    ///
    /// Fails with [`PariError::Open`] if the path is inaccessible, permissions are
    /// denied, or the flags conflict: creation requires write capability, so
    /// `create_if_missing` with [`AccessMode::ReadOnly`] is rejected.
    pub fn open(
        path: impl AsRef<Path>,
        mode: AccessMode,
        create_if_missing: bool,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if create_if_missing && mode == AccessMode::ReadOnly {
            return Err(PariError::Open {
                path,
                source: std::io::Error::new(
                    ErrorKind::InvalidInput,
                    "create_if_missing requires write access",
                ),
            });
        }

        let mut options = OpenOptions::new();
        match mode {
            AccessMode::ReadOnly => options.read(true),
            AccessMode::WriteOnly => options.write(true),
            AccessMode::ReadWrite => options.read(true).write(true),
        };
        if create_if_missing {
            options.create(true);
        }

        let file = options.open(&path).map_err(|source| PariError::Open {
            path: path.clone(),
            source,
        })?;

        debug!("Opened {:?} with mode {:?}", path, mode);
        Ok(Self {
            file: Some(file),
            path,
        })
    }

    /// Path this handle was opened on.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file(&self) -> Result<&std::fs::File> {
        self.file
            .as_ref()
            .ok_or_else(|| PariError::InvalidArgument("file handle is closed".into()))
    }

    /// Write exactly `bytes.len()` bytes starting at `offset`.
    ///
    /// Independent of any other handle state; short writes from the medium are
    /// resumed until the full buffer is on its way or an error occurs.
    pub fn write_at(&self, offset: i64, bytes: &[u8]) -> Result<IoOutcome> {
        if offset < 0 {
            return Err(PariError::InvalidOffset(offset));
        }
        let file = self.file()?;

        let mut written = 0usize;
        while written < bytes.len() {
            let pos = offset as u64 + written as u64;
            match file.write_at(&bytes[written..], pos) {
                Ok(0) => {
                    return Err(PariError::Io {
                        op: "write",
                        rank: None,
                        offset,
                        source: ErrorKind::WriteZero.into(),
                    })
                }
                Ok(n) => written += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::StorageFull => {
                    return Err(PariError::OutOfSpace { rank: None, offset })
                }
                Err(source) => {
                    return Err(PariError::Io {
                        op: "write",
                        rank: None,
                        offset,
                        source,
                    })
                }
            }
        }

        debug!(
            "Wrote {} bytes at offset {} to {:?}",
            written, offset, self.path
        );
        Ok(IoOutcome::success(written as u64))
    }

    /// Read up to `length` bytes starting at `offset`.
    ///
    /// Returns fewer bytes only at end-of-file, reflected as [`IoStatus::Partial`].
    pub fn read_at(&self, offset: i64, length: usize) -> Result<(Vec<u8>, IoOutcome)> {
        if offset < 0 {
            return Err(PariError::InvalidOffset(offset));
        }
        let file = self.file()?;

        let mut buf = vec![0u8; length];
        let mut filled = 0usize;
        while filled < length {
            let pos = offset as u64 + filled as u64;
            match file.read_at(&mut buf[filled..], pos) {
                Ok(0) => break, // end-of-file
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(source) => {
                    return Err(PariError::Io {
                        op: "read",
                        rank: None,
                        offset,
                        source,
                    })
                }
            }
        }
        buf.truncate(filled);

        debug!(
            "Read {} of {} bytes at offset {} from {:?}",
            filled, length, offset, self.path
        );
        let outcome = if filled == length {
            IoOutcome::success(filled as u64)
        } else {
            IoOutcome::partial(filled as u64)
        };
        Ok((buf, outcome))
    }

    /// Sync file contents to the medium and release the descriptor.
    ///
    /// Idempotent: a second call is a no-op that returns success. Safe to call after
    /// a failed operation. The descriptor is released even if the sync fails.
    pub fn close(&mut self) -> Result<()> {
        if let Some(file) = self.file.take() {
            file.sync_all().map_err(|source| PariError::Io {
                op: "sync",
                rank: None,
                offset: 0,
                source,
            })?;
            debug!("Closed {:?}", self.path);
        }
        Ok(())
    }
}

impl Drop for FileHandle {
    fn drop(&mut self) {
        // Last-resort descriptor release; sync failures cannot be reported here.
        let _ = self.close();
    }
}

/// One participant's view of an independent I/O session over a shared file.
///
/// Every participant opens its own session on the same path with the identical
/// [`RecordShape`]; the session computes the participant's byte range from its rank
/// and issues exactly one positioned operation per record. Concurrent sessions across
/// ranks need no mutual synchronization: correctness rests entirely on disjoint
/// ranges plus positioned I/O.
///
/// The session says nothing about when another rank's write becomes visible. A
/// reader depending on other ranks must synchronize externally (for example, via
/// [`Launcher::wait`]) before reading.
///
/// # Examples
///
/// ```rust,no_run
/// use simple_pario::{AccessMode, IndependentIoSession, ParticipantGroup, RecordShape};
///
/// let group = ParticipantGroup::new(0, 4).unwrap();
/// let shape = RecordShape::of::<i64>(10).unwrap();
/// let session = IndependentIoSession::open(
///     group, "./data.bin", AccessMode::WriteOnly, true, shape,
/// ).unwrap();
///
/// // Only rank 0 writes; other ranks get a skipped outcome.
/// let buffer = vec![0i64; 10];
/// let outcome = session.write_record(&buffer, |rank| rank == 0).unwrap();
/// session.close().unwrap();
/// ```
pub struct IndependentIoSession {
    group: ParticipantGroup,
    handle: FileHandle,
    shape: RecordShape,
}

impl IndependentIoSession {
    /// Open the shared file for this participant. The session exclusively owns the
    /// handle until [`IndependentIoSession::close`].
    pub fn open(
        group: ParticipantGroup,
        path: impl AsRef<Path>,
        mode: AccessMode,
        create_if_missing: bool,
        shape: RecordShape,
    ) -> Result<Self> {
        let handle = FileHandle::open(path, mode, create_if_missing)?;
        debug!(
            "Rank {} of {} opened session on {:?}",
            group.rank(),
            group.size(),
            handle.path()
        );
        Ok(Self {
            group,
            handle,
            shape,
        })
    }

    pub fn group(&self) -> &ParticipantGroup {
        &self.group
    }

    pub fn shape(&self) -> RecordShape {
        self.shape
    }

    /// The byte range this participant's rank owns.
    pub fn my_range(&self) -> Result<ByteRange> {
        record_range(
            self.group.rank(),
            self.group.size(),
            self.shape.size_bytes() as i64,
        )
    }

    fn check_element<T: Scalar>(&self) -> Result<()> {
        if T::ELEMENT != self.shape.element {
            return Err(PariError::InvalidArgument(format!(
                "element type {:?} does not match session shape {:?}",
                T::ELEMENT,
                self.shape.element
            )));
        }
        Ok(())
    }

    /// Write this rank's record at its computed offset, if the policy includes it.
    ///
    /// The buffer must match the session's record shape exactly; the check happens
    /// before any bytes are written. A rank excluded by `should_participate`
    /// performs no I/O and gets [`IoStatus::Skipped`].
    pub fn write_record<T: Scalar>(
        &self,
        values: &[T],
        should_participate: impl Fn(i32) -> bool,
    ) -> Result<IoOutcome> {
        self.check_element::<T>()?;
        if values.len() != self.shape.len {
            return Err(PariError::InvalidArgument(format!(
                "buffer of {} elements does not match record length {}",
                values.len(),
                self.shape.len
            )));
        }

        let rank = self.group.rank();
        if !should_participate(rank) {
            debug!("Rank {} not participating in write", rank);
            return Ok(IoOutcome::skipped());
        }

        let range = self.my_range()?;
        debug!(
            "Rank {} writing {} bytes at offset {}",
            rank, range.size, range.offset
        );
        let bytes = encode(values);
        self.handle
            .write_at(range.offset, &bytes)
            .map_err(|e| e.with_rank(rank))
    }

    /// Read back this rank's record from its computed offset, if the policy
    /// includes it.
    ///
    /// A short read (the file does not cover this rank's full range) fails with
    /// [`PariError::TruncatedData`]. An excluded rank gets an empty buffer and
    /// [`IoStatus::Skipped`].
    pub fn read_record<T: Scalar>(
        &self,
        should_participate: impl Fn(i32) -> bool,
    ) -> Result<(Vec<T>, IoOutcome)> {
        self.check_element::<T>()?;

        let rank = self.group.rank();
        if !should_participate(rank) {
            debug!("Rank {} not participating in read", rank);
            return Ok((Vec::new(), IoOutcome::skipped()));
        }

        let range = self.my_range()?;
        debug!(
            "Rank {} reading {} bytes at offset {}",
            rank, range.size, range.offset
        );
        let (bytes, outcome) = self
            .handle
            .read_at(range.offset, range.size as usize)
            .map_err(|e| e.with_rank(rank))?;
        let values = decode(&bytes, self.shape.len)?;
        Ok((values, outcome))
    }

    /// Sync and release the underlying file. Consumes the session.
    pub fn close(mut self) -> Result<()> {
        debug!("Rank {} closing session", self.group.rank());
        self.handle.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranges_tile_the_file_without_gaps_or_overlap() {
        for group_size in [1, 2, 4, 7, 32] {
            let record_size = 80;
            let ranges: Vec<ByteRange> = (0..group_size)
                .map(|r| record_range(r, group_size, record_size).unwrap())
                .collect();

            // Contiguous tiling from byte 0.
            assert_eq!(ranges[0].offset, 0);
            for pair in ranges.windows(2) {
                assert_eq!(pair[0].end(), pair[1].offset);
            }
            assert_eq!(
                ranges.last().unwrap().end(),
                group_size as i64 * record_size
            );
        }
    }

    #[test]
    fn range_rejects_bad_identity_and_size() {
        assert!(matches!(
            record_range(-1, 4, 80),
            Err(PariError::InvalidArgument(_))
        ));
        assert!(matches!(
            record_range(4, 4, 80),
            Err(PariError::InvalidArgument(_))
        ));
        assert!(matches!(
            record_range(0, 0, 80),
            Err(PariError::InvalidArgument(_))
        ));
        assert!(matches!(
            record_range(0, 4, 0),
            Err(PariError::InvalidArgument(_))
        ));
    }

    #[test]
    fn group_validates_rank_bounds() {
        assert!(ParticipantGroup::new(0, 1).is_ok());
        assert!(ParticipantGroup::new(3, 4).is_ok());
        assert!(ParticipantGroup::new(4, 4).is_err());
        assert!(ParticipantGroup::new(-1, 4).is_err());
        assert!(ParticipantGroup::new(0, 0).is_err());
    }

    #[test]
    fn codec_round_trips_each_element_type() {
        let ints: Vec<i64> = vec![i64::MIN, -1, 0, 1, i64::MAX];
        assert_eq!(decode::<i64>(&encode(&ints), ints.len()).unwrap(), ints);

        let floats: Vec<f64> = vec![-1.5, 0.0, 3.25, f64::MAX];
        assert_eq!(
            decode::<f64>(&encode(&floats), floats.len()).unwrap(),
            floats
        );

        let small: Vec<u32> = vec![0, 7, u32::MAX];
        assert_eq!(decode::<u32>(&encode(&small), small.len()).unwrap(), small);
    }

    #[test]
    fn codec_layout_is_little_endian_and_unframed() {
        let bytes = encode(&[0x0102_0304i32, 5]);
        assert_eq!(bytes, [0x04, 0x03, 0x02, 0x01, 0x05, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn decode_rejects_short_input() {
        let bytes = encode(&[1i64, 2, 3]);
        let err = decode::<i64>(&bytes[..20], 3).unwrap_err();
        assert!(matches!(
            err,
            PariError::TruncatedData {
                expected: 24,
                actual: 20
            }
        ));
    }

    #[test]
    fn decode_ignores_trailing_bytes() {
        let mut bytes = encode(&[9i32, 8]);
        bytes.extend_from_slice(&[0xff; 3]);
        assert_eq!(decode::<i32>(&bytes, 2).unwrap(), vec![9, 8]);
    }

    #[test]
    fn shape_tracks_element_width() {
        let shape = RecordShape::of::<i64>(10).unwrap();
        assert_eq!(shape.size_bytes(), 80);
        let shape = RecordShape::of::<f32>(3).unwrap();
        assert_eq!(shape.size_bytes(), 12);
        assert!(RecordShape::of::<i64>(0).is_err());
    }

    #[test]
    fn io_error_is_tagged_with_the_offending_rank() {
        let err = PariError::Io {
            op: "write",
            rank: None,
            offset: 160,
            source: ErrorKind::BrokenPipe.into(),
        }
        .with_rank(2);
        assert!(matches!(
            err,
            PariError::Io {
                rank: Some(2),
                offset: 160,
                ..
            }
        ));

        // Non-medium errors keep their shape.
        let err = PariError::InvalidOffset(-1).with_rank(2);
        assert!(matches!(err, PariError::InvalidOffset(-1)));
    }

    #[test]
    fn launcher_waits_cleanly_on_successful_participants() {
        let (group, launcher) = Launcher::spawn_group_with(Path::new("/bin/true"), 3).unwrap();
        assert_eq!(group.rank(), 0);
        assert_eq!(group.size(), 3);
        launcher.wait().unwrap();
    }

    #[test]
    fn launcher_reports_the_first_failing_rank() {
        let (_group, launcher) = Launcher::spawn_group_with(Path::new("/bin/false"), 3).unwrap();
        let err = launcher.wait().unwrap_err();
        // Both children fail; the reported failure names the lowest rank.
        assert!(matches!(
            &err,
            PariError::Process(msg) if msg.contains("rank 1")
        ));
    }

    #[test]
    fn medium_errors_name_a_rank_only_once_attributed() {
        let err = PariError::Io {
            op: "write",
            rank: None,
            offset: 8,
            source: ErrorKind::BrokenPipe.into(),
        };
        // A bare FileHandle has no rank to report.
        assert!(!err.to_string().contains("rank"));
        assert!(err.with_rank(3).to_string().contains("(rank 3)"));

        let err = PariError::OutOfSpace {
            rank: None,
            offset: 16,
        };
        assert!(!err.to_string().contains("rank"));
        assert!(err.with_rank(1).to_string().contains("(rank 1)"));
    }
}
