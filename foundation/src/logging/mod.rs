//! Structured log pipeline.
//!
//! Each call to [`Logger::save`] composes one fixed-layout binary record
//! (see [`record`]) and hands it to a pluggable [`LogStorage`]. Records are
//! gated twice before composition: against the global level and against the
//! per-tag level table. Tags follow the `file!()` convention, one tag per
//! module, and are compared by content.
//!
//! Records are binary frames, not text; [`stringify`] renders a stored
//! frame for humans.
//!
//! # Usage
//!
//! ```
//! use ember_foundation::ringbuf::RingBuf;
//! use ember_foundation::logging::{Logger, RingStorage, Severity};
//! use ember_foundation::log_warn;
//!
//! let storage = RingStorage::new(RingBuf::new([0u8; 512]).unwrap());
//! let logger: Logger<_> = Logger::new(storage);
//! log_warn!(logger, "battery at {}%", 7);
//! assert_eq!(logger.count(), 1);
//! ```
//!
//! The pipeline holds one lock around record composition and the storage
//! call; `save` is safe from any thread but not from interrupt context when
//! the storage may suspend.

mod record;
mod storage;

pub use record::{
    compute_magic, LogRecord, RecordError, Severity, HEADER_LEN, MAX_RECORD_LEN, MESSAGE_MAXLEN,
};
pub use storage::{LogStorage, RingStorage};

use core::fmt::{self, Write as _};

use spin::Mutex;

/// Callsite identity captured by [`logctx!`](crate::logctx).
///
/// `pc` is the address of a per-callsite static (a stable stand-in for the
/// program counter, which stable Rust cannot read); `lr` is 0 when no return
/// address is available.
#[derive(Debug, Clone, Copy)]
pub struct LogContext {
    pub tag: &'static str,
    pub pc: usize,
    pub lr: usize,
}

#[derive(Clone, Copy)]
struct TagLevel {
    tag: &'static str,
    level: Severity,
}

struct LoggerState<S, const TAGS: usize> {
    storage: S,
    global_level: Severity,
    clock: Option<fn() -> u64>,
    tags: [Option<TagLevel>; TAGS],
}

impl<S, const TAGS: usize> LoggerState<S, TAGS> {
    fn tag_level(&self, tag: &str) -> Severity {
        self.tags
            .iter()
            .flatten()
            .find(|t| t.tag == tag)
            .map_or(Severity::Verbose, |t| t.level)
    }
}

/// Severity-gated binary log pipeline over a [`LogStorage`].
///
/// `TAGS` bounds the per-tag level table.
pub struct Logger<S, const TAGS: usize = 8> {
    state: Mutex<LoggerState<S, TAGS>>,
}

impl<S: LogStorage, const TAGS: usize> Logger<S, TAGS> {
    /// Create a pipeline writing into `storage`.
    ///
    /// The global level starts at [`Severity::Debug`]; `Verbose` records are
    /// dropped until lowered explicitly. Timestamps are 0 until a clock is
    /// installed with [`set_clock`](Self::set_clock).
    pub fn new(storage: S) -> Self {
        Self {
            state: Mutex::new(LoggerState {
                storage,
                global_level: Severity::Debug,
                clock: None,
                tags: [None; TAGS],
            }),
        }
    }

    /// Install the epoch-seconds source stamped into records.
    pub fn set_clock(&self, clock: fn() -> u64) {
        self.state.lock().clock = Some(clock);
    }

    /// Compose and store one record.
    ///
    /// The record is written only when `severity` passes both the global
    /// level and the level registered for `ctx.tag`. Returns the encoded
    /// size stored, or 0 when gated out or the storage rejected the record.
    pub fn save(&self, severity: Severity, ctx: &LogContext, args: fmt::Arguments<'_>) -> usize {
        let mut state = self.state.lock();

        if severity < state.global_level || severity < state.tag_level(ctx.tag) {
            return 0;
        }

        let mut message = [0u8; MESSAGE_MAXLEN];
        let mut writer = SliceWriter::new(&mut message);
        let _ = writer.write_fmt(args);
        let message_len = writer.written();

        let record = LogRecord {
            timestamp: state.clock.map_or(0, |clock| clock()),
            pc: ctx.pc as u64,
            lr: ctx.lr as u64,
            severity,
            message: &message[..message_len],
        };

        let mut frame = [0u8; MAX_RECORD_LEN];
        let encoded = record.encode(&mut frame);
        state.storage.write(&frame[..encoded])
    }

    /// Copy the oldest stored record into `buf` without removing it.
    pub fn peek(&self, buf: &mut [u8]) -> usize {
        self.state.lock().storage.peek(buf)
    }

    /// Copy the oldest stored record into `buf` and remove it.
    pub fn read(&self, buf: &mut [u8]) -> usize {
        self.state.lock().storage.read(buf)
    }

    /// Remove the oldest stored record of the given size.
    pub fn consume(&self, size: usize) -> usize {
        self.state.lock().storage.consume(size)
    }

    /// Number of stored records.
    pub fn count(&self) -> usize {
        self.state.lock().storage.count()
    }

    /// Set the global minimum severity.
    pub fn set_level_global(&self, level: Severity) {
        self.state.lock().global_level = level;
    }

    pub fn get_level_global(&self) -> Severity {
        self.state.lock().global_level
    }

    /// Set the minimum severity for one tag.
    ///
    /// Returns false when the tag table is full.
    pub fn set_level(&self, tag: &'static str, level: Severity) -> bool {
        let mut state = self.state.lock();

        if let Some(entry) = state.tags.iter_mut().flatten().find(|t| t.tag == tag) {
            entry.level = level;
            return true;
        }
        if let Some(slot) = state.tags.iter_mut().find(|slot| slot.is_none()) {
            *slot = Some(TagLevel { tag, level });
            return true;
        }
        false
    }

    /// Minimum severity for `tag`; [`Severity::Verbose`] when unregistered.
    pub fn get_level(&self, tag: &str) -> Severity {
        self.state.lock().tag_level(tag)
    }

    /// Number of registered tag levels.
    pub fn tag_count(&self) -> usize {
        self.state.lock().tags.iter().flatten().count()
    }

    /// Visit every registered (tag, level) pair.
    pub fn iterate_tags(&self, mut visit: impl FnMut(&'static str, Severity)) {
        let state = self.state.lock();
        for entry in state.tags.iter().flatten() {
            visit(entry.tag, entry.level);
        }
    }
}

/// Render a stored record into `out` for humans.
///
/// Format: `timestamp: [SEVERITY] <0xpc,0xlr> message`. The output is
/// truncated to `out`; non-UTF-8 message bytes render as a placeholder.
pub fn stringify<'a>(out: &'a mut [u8], raw: &[u8]) -> Result<&'a str, RecordError> {
    let record = LogRecord::parse(raw)?;

    let mut writer = SliceWriter::new(&mut *out);
    let _ = write!(
        writer,
        "{}: [{}] <0x{:x},0x{:x}> ",
        record.timestamp,
        record.severity.as_str(),
        record.pc,
        record.lr
    );
    let _ = writer.write_str(core::str::from_utf8(record.message).unwrap_or("<non-utf8>"));
    let written = writer.written();

    // The writer only ever appends valid UTF-8, truncated at a char
    // boundary.
    Ok(core::str::from_utf8(&out[..written]).unwrap_or(""))
}

/// `fmt::Write` adapter over a byte slice; silently truncates at the end of
/// the slice, never splitting a UTF-8 sequence.
struct SliceWriter<'a> {
    buf: &'a mut [u8],
    used: usize,
}

impl<'a> SliceWriter<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, used: 0 }
    }

    fn written(&self) -> usize {
        self.used
    }
}

impl fmt::Write for SliceWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let space = self.buf.len() - self.used;
        let mut take = s.len().min(space);
        // Back off to a char boundary when truncating.
        while take > 0 && !s.is_char_boundary(take) {
            take -= 1;
        }
        self.buf[self.used..self.used + take].copy_from_slice(&s.as_bytes()[..take]);
        self.used += take;
        Ok(())
    }
}

/// Capture the current callsite as a [`LogContext`].
///
/// Each expansion materialises its own static, whose address serves as a
/// stable program-counter stand-in for the record's `pc` field.
#[macro_export]
macro_rules! logctx {
    () => {{
        static CALLSITE: u8 = 0;
        $crate::logging::LogContext {
            tag: file!(),
            pc: core::ptr::addr_of!(CALLSITE) as usize,
            lr: 0,
        }
    }};
}

/// Save one record through `$logger` at an explicit severity.
#[macro_export]
macro_rules! log_save {
    ($logger:expr, $severity:expr, $($arg:tt)*) => {
        $logger.save($severity, &$crate::logctx!(), core::format_args!($($arg)*))
    };
}

/// Per-severity wrappers around [`log_save!`](crate::log_save).
#[macro_export]
macro_rules! log_verbose {
    ($logger:expr, $($arg:tt)*) => {
        $crate::log_save!($logger, $crate::logging::Severity::Verbose, $($arg)*)
    };
}

#[macro_export]
macro_rules! log_debug {
    ($logger:expr, $($arg:tt)*) => {
        $crate::log_save!($logger, $crate::logging::Severity::Debug, $($arg)*)
    };
}

#[macro_export]
macro_rules! log_info {
    ($logger:expr, $($arg:tt)*) => {
        $crate::log_save!($logger, $crate::logging::Severity::Info, $($arg)*)
    };
}

#[macro_export]
macro_rules! log_notice {
    ($logger:expr, $($arg:tt)*) => {
        $crate::log_save!($logger, $crate::logging::Severity::Notice, $($arg)*)
    };
}

#[macro_export]
macro_rules! log_warn {
    ($logger:expr, $($arg:tt)*) => {
        $crate::log_save!($logger, $crate::logging::Severity::Warn, $($arg)*)
    };
}

#[macro_export]
macro_rules! log_error {
    ($logger:expr, $($arg:tt)*) => {
        $crate::log_save!($logger, $crate::logging::Severity::Error, $($arg)*)
    };
}

#[macro_export]
macro_rules! log_alert {
    ($logger:expr, $($arg:tt)*) => {
        $crate::log_save!($logger, $crate::logging::Severity::Alert, $($arg)*)
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ringbuf::RingBuf;

    fn logger() -> Logger<RingStorage<[u8; 1024]>> {
        Logger::new(RingStorage::new(RingBuf::new([0u8; 1024]).unwrap()))
    }

    fn ctx() -> LogContext {
        LogContext {
            tag: "test",
            pc: 0x1000,
            lr: 0x2000,
        }
    }

    #[test]
    fn save_respects_global_level() {
        let log = logger();

        // Default global level is Debug: Verbose is gated out.
        assert_eq!(log.save(Severity::Verbose, &ctx(), format_args!("v")), 0);
        assert!(log.save(Severity::Info, &ctx(), format_args!("i")) > 0);
        assert_eq!(log.count(), 1);

        log.set_level_global(Severity::Error);
        assert_eq!(log.save(Severity::Warn, &ctx(), format_args!("w")), 0);
        assert!(log.save(Severity::Alert, &ctx(), format_args!("a")) > 0);
    }

    #[test]
    fn save_respects_tag_level() {
        let log = logger();
        assert!(log.set_level("noisy", Severity::Error));

        let noisy = LogContext {
            tag: "noisy",
            ..ctx()
        };
        assert_eq!(log.save(Severity::Info, &noisy, format_args!("x")), 0);
        assert!(log.save(Severity::Error, &noisy, format_args!("x")) > 0);

        // Other tags are unaffected.
        assert!(log.save(Severity::Info, &ctx(), format_args!("x")) > 0);
    }

    #[test]
    fn stored_record_parses_back() {
        let log = logger();
        log.set_clock(|| 42);
        let n = log.save(Severity::Notice, &ctx(), format_args!("value={}", 7));
        assert!(n > 0);

        let mut buf = [0u8; MAX_RECORD_LEN];
        let read = log.read(&mut buf);
        assert_eq!(read, n);

        let record = LogRecord::parse(&buf[..read]).unwrap();
        assert_eq!(record.timestamp, 42);
        assert_eq!(record.severity, Severity::Notice);
        assert_eq!(record.message, b"value=7");
        assert_eq!(log.count(), 0);
    }

    #[test]
    fn peek_then_consume_matches_read() {
        let log = logger();
        let n = log.save(Severity::Info, &ctx(), format_args!("hello"));

        let mut buf = [0u8; MAX_RECORD_LEN];
        assert_eq!(log.peek(&mut buf), n);
        assert_eq!(log.count(), 1);
        assert_eq!(log.consume(n), n);
        assert_eq!(log.count(), 0);
    }

    #[test]
    fn long_messages_truncate_to_maxlen() {
        let log = logger();
        let long = "x".repeat(300);
        let n = log.save(Severity::Info, &ctx(), format_args!("{}", long));
        assert_eq!(n, MAX_RECORD_LEN);
    }

    #[test]
    fn tag_table_is_bounded() {
        let log: Logger<_, 2> =
            Logger::new(RingStorage::new(RingBuf::new([0u8; 256]).unwrap()));
        assert!(log.set_level("a", Severity::Info));
        assert!(log.set_level("b", Severity::Warn));
        assert!(!log.set_level("c", Severity::Error));

        // Updating an existing tag still works when full.
        assert!(log.set_level("a", Severity::Alert));
        assert_eq!(log.get_level("a"), Severity::Alert);
        assert_eq!(log.tag_count(), 2);
    }

    #[test]
    fn iterate_tags_visits_all() {
        let log = logger();
        log.set_level("one", Severity::Info);
        log.set_level("two", Severity::Warn);

        let mut seen = 0;
        log.iterate_tags(|tag, level| {
            seen += 1;
            match tag {
                "one" => assert_eq!(level, Severity::Info),
                "two" => assert_eq!(level, Severity::Warn),
                other => panic!("unexpected tag {other}"),
            }
        });
        assert_eq!(seen, 2);
        assert_eq!(log.tag_count(), 2);
    }

    #[test]
    fn stringify_renders_record() {
        let log = logger();
        log.set_clock(|| 99);
        log.save(Severity::Warn, &ctx(), format_args!("boom"));

        let mut raw = [0u8; MAX_RECORD_LEN];
        let n = log.read(&mut raw);

        let mut text = [0u8; 160];
        let rendered = stringify(&mut text, &raw[..n]).unwrap();
        assert_eq!(rendered, "99: [WARN] <0x1000,0x2000> boom");
    }

    #[test]
    fn macros_capture_callsite() {
        let log = logger();
        let n = log_info!(log, "answer={}", 42);
        assert!(n > 0);

        let mut raw = [0u8; MAX_RECORD_LEN];
        let read = log.read(&mut raw);
        let record = LogRecord::parse(&raw[..read]).unwrap();
        assert_ne!(record.pc, 0);
        assert_eq!(record.lr, 0);
        assert_eq!(record.message, b"answer=42");
    }
}
