use chronicle::efficient_clock::get_timestamp;
use chronicle::ring_buffer::Progress;
use chronicle::{
    log, register_string, Chronicle, DiscardMetadata, Error, Field, Loggable, Metadata, StringBlock,
};
use std::mem::size_of;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

const W: usize = size_of::<usize>();

/// Framed size past the leading progress byte of a record holding one
/// `n`-byte inline string: size, timestamp, id, count, tag, length, bytes,
/// trailing size, next progress.
fn framed_string_record(n: usize) -> usize {
    4 + 8 + 2 + 1 + 1 + W + n + 4 + 1
}

struct CollectingHandler {
    snapshots: Arc<Mutex<Vec<Metadata>>>,
}

impl CollectingHandler {
    fn new() -> (Self, Arc<Mutex<Vec<Metadata>>>) {
        let snapshots = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                snapshots: Arc::clone(&snapshots),
            },
            snapshots,
        )
    }
}

impl chronicle::MetadataHandler for CollectingHandler {
    fn handle_metadata(&self, metadata: &Metadata, _strings: &[StringBlock]) -> chronicle::Result<()> {
        self.snapshots.lock().unwrap().push(metadata.clone());
        Ok(())
    }
}

#[test]
fn test_record_byte_layout() {
    let chronicle = Chronicle::in_memory(64, DiscardMetadata).unwrap();
    let logger = chronicle.logger("layout").unwrap();

    let before = get_timestamp();
    assert!(logger.write_fields(&[&42i32, &true]));
    let after = get_timestamp();

    let bytes = chronicle.snapshot();
    assert_eq!(bytes[0], Progress::Used as u8);
    // timestamp + id + count + 2 tags + i32 + bool
    assert_eq!(&bytes[1..5], &18u32.to_le_bytes());

    let timestamp = u64::from_le_bytes(bytes[5..13].try_into().unwrap());
    assert!(timestamp >= before && timestamp <= after);
    assert_eq!(&bytes[13..15], &1u16.to_le_bytes());
    assert_eq!(&bytes[15..18], &[2, b'4', b'b']);
    assert_eq!(&bytes[18..22], &42i32.to_le_bytes());
    assert_eq!(bytes[22], 1);
    assert_eq!(&bytes[23..27], &27u32.to_le_bytes());
    assert_eq!(bytes[27], Progress::Unused as u8);
}

#[test]
fn test_disabled_logger_writes_nothing() {
    let chronicle = Chronicle::in_memory(256, DiscardMetadata).unwrap();
    let mut logger = chronicle.logger("quiet").unwrap();
    logger.set_enabled(false);

    let mut evaluated = false;
    for i in 0..100 {
        log!(logger, "value {} {}", i, {
            evaluated = true;
            "never"
        });
        assert!(!logger.write_fields(&[&i]));
    }

    assert!(!evaluated, "Arguments of a disabled logger are not evaluated");
    assert!(chronicle.snapshot().iter().all(|&b| b == 0));
}

#[test]
fn test_tiny_buffer_does_not_crash() {
    let chronicle = Chronicle::in_memory(1, DiscardMetadata).unwrap();
    let logger = chronicle.logger("tiny").unwrap();
    for _ in 0..10 {
        assert!(!log!(logger, "{}", "does not fit"));
    }
    assert_eq!(chronicle.snapshot(), vec![0]);
}

#[test]
fn test_oversize_record_leaves_buffer_unchanged() {
    let chronicle = Chronicle::in_memory(128, DiscardMetadata).unwrap();
    let logger = chronicle.logger("big").unwrap();
    assert!(log!(logger, "{}", "small"));
    let before = chronicle.snapshot();

    let huge = "x".repeat(500);
    assert!(!log!(logger, "{}", huge));
    assert_eq!(chronicle.snapshot(), before);
}

fn write_twice(capacity: usize, text: &str) -> Vec<u8> {
    let chronicle = Chronicle::in_memory(capacity, DiscardMetadata).unwrap();
    let logger = chronicle.logger("trailer").unwrap();
    log!(logger, "{}", text);
    log!(logger, "{}", text);
    chronicle.snapshot()
}

#[test]
fn test_exact_fit_leaves_no_trailer() {
    let capacity = 1 + framed_string_record(0);
    let bytes = write_twice(capacity, "");
    assert_eq!(bytes[capacity - 1], 0);
}

#[test]
fn test_one_spare_byte_holds_trailer() {
    let capacity = 1 + framed_string_record(0) + 1;
    let bytes = write_twice(capacity, "");
    assert_eq!(bytes[capacity - 1], 1);
}

#[test]
fn test_one_spare_byte_consumed_by_larger_record() {
    let capacity = 1 + framed_string_record(1);
    let bytes = write_twice(capacity, "a");
    assert_eq!(bytes[capacity - 1], 0);
}

#[test]
fn test_single_byte_trailer_distance() {
    let text = "b".repeat(30);
    let capacity = framed_string_record(30) + 30 + 1;
    let bytes = write_twice(capacity, &text);
    assert_eq!(bytes[capacity - 1], 30);
}

#[test]
fn test_multi_byte_trailer_distance() {
    let text = "c".repeat(1000);
    let capacity = framed_string_record(1000) + 1000 + 1;
    let bytes = write_twice(capacity, &text);

    // 1000 as ULEB128, least significant group last
    assert_eq!(bytes[capacity - 1], (1000 & 0x7f) as u8 | 0x80);
    assert_eq!(bytes[capacity - 2], (1000 >> 7) as u8);
}

#[test]
fn test_loggers_appear_in_metadata() {
    let (handler, snapshots) = CollectingHandler::new();
    let chronicle = Chronicle::in_memory(1024, handler).unwrap();

    let first = chronicle.logger("first").unwrap();
    let second = chronicle.logger("second").unwrap();
    assert_eq!((first.id(), second.id()), (1, 2));

    let snapshots = snapshots.lock().unwrap();
    assert_eq!(snapshots.len(), 3, "Initial snapshot plus one per logger");
    assert!(snapshots[0].loggers.is_empty());
    assert_eq!(snapshots[2].loggers, vec!["first", "second"]);
}

#[test]
fn test_new_literals_trigger_snapshot() {
    let (handler, snapshots) = CollectingHandler::new();
    let chronicle = Chronicle::in_memory(1024, handler).unwrap();
    let logger = chronicle.logger("strings").unwrap();
    let published = snapshots.lock().unwrap().len();

    assert!(log!(logger, "a literal only this test uses: {}", 1u8));

    let snapshots = snapshots.lock().unwrap();
    assert!(snapshots.len() > published);

    let address = register_string("a literal only this test uses: ");
    let latest = snapshots.last().unwrap();
    assert!(latest
        .strings
        .iter()
        .any(|d| d.start <= address && address < d.start + d.size));
}

#[test]
fn test_failing_handler_does_not_fail_logging() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let handler = move |_: &Metadata, _: &[StringBlock]| -> chronicle::Result<()> {
        // Accept the initial snapshot and the logger registration only.
        if counter.fetch_add(1, Ordering::SeqCst) >= 2 {
            return Err(Error::Handler("storage unavailable".to_string()));
        }
        Ok(())
    };
    let chronicle = Chronicle::in_memory(1024, handler).unwrap();
    let logger = chronicle.logger("ok").unwrap();

    assert!(log!(logger, "handler errors during refresh are only traced {}", 0u8));
    assert!(calls.load(Ordering::SeqCst) > 2);
    assert!(chronicle.refresh_metadata().is_err());
}

#[test]
fn test_manual_record() {
    let chronicle = Chronicle::in_memory(128, DiscardMetadata).unwrap();
    let logger = chronicle.logger("manual").unwrap();

    let mut record = logger.prepare(1 + 1 + 8).unwrap();
    let payload = record.payload_mut();
    payload[0] = 1;
    payload[1] = 8u64.log_tag().as_byte();
    8u64.log_into(&mut payload[2..]);
    record.complete();

    let entries: Vec<_> = chronicle.epilog().unwrap().entries().collect();
    assert_eq!(entries.len(), 1);
    let entry = entries[0].as_ref().unwrap();
    assert_eq!(entry.logger, "manual");
    assert_eq!(entry.fields, vec![Field::UInt(8)]);
}

#[test]
fn test_concurrent_loggers() {
    const THREADS: usize = 4;
    const PER_THREAD: u32 = 200;

    let chronicle = Chronicle::in_memory(1 << 20, DiscardMetadata).unwrap();
    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let logger = chronicle.logger(format!("worker-{}", t)).unwrap();
            thread::spawn(move || {
                for i in 0..PER_THREAD {
                    assert!(log!(logger, "step {}", i));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let epilog = chronicle.epilog().unwrap();
    let entries: Vec<_> = epilog.entries().map(Result::unwrap).collect();
    assert_eq!(entries.len(), THREADS * PER_THREAD as usize);

    for t in 0..THREADS {
        let name = format!("worker-{}", t);
        let steps: Vec<_> = entries
            .iter()
            .filter(|e| e.logger == name)
            .map(|e| e.fields[1].clone())
            .collect();
        let expected: Vec<_> = (0..PER_THREAD).map(|i| Field::UInt(u64::from(i))).collect();
        assert_eq!(steps, expected, "Each logger's records stay in order");
    }
}
