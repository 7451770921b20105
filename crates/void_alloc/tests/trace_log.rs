//! Log output of the tracing system allocator
//!
//! Installs a capturing logger (one per test binary) and checks that every
//! traced call is reported at the caller's source location, with the size
//! and pointer on success and a `warn` record on failure.

use std::sync::Mutex;

use log::{Level, LevelFilter, Log, Metadata, Record};
use void_alloc::prelude::*;
use void_alloc::PageBuffer;

struct CaptureLogger {
    records: Mutex<Vec<(Level, String)>>,
}

impl Log for CaptureLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        self.records
            .lock()
            .unwrap()
            .push((record.level(), record.args().to_string()));
    }

    fn flush(&self) {}
}

static LOGGER: CaptureLogger = CaptureLogger {
    records: Mutex::new(Vec::new()),
};

fn take_records() -> Vec<(Level, String)> {
    std::mem::take(&mut *LOGGER.records.lock().unwrap())
}

#[test]
fn test_traced_calls_report_caller_site() {
    log::set_logger(&LOGGER).expect("logger installed once");
    log::set_max_level(LevelFilter::Trace);

    let stats = AllocatorStats::new();
    let system = Traced::new(SystemAllocator::with_stats(&stats));

    // Direct heap allocation.
    let ptr = system.alloc(24).unwrap();
    let records = take_records();
    assert_eq!(records.len(), 1);
    let (level, text) = &records[0];
    assert_eq!(*level, Level::Debug);
    assert!(text.contains(file!()), "{text}");
    assert!(text.contains("alloc 24 bytes"), "{text}");
    assert!(text.contains(&format!("{:p}", ptr.as_ptr())), "{text}");
    unsafe { system.free(ptr, 24) };
    take_records();

    // Failures are reported at warn with the error.
    assert_eq!(system.alloc(0), Err(AllocError::ZeroSize));
    let records = take_records();
    assert_eq!(records.len(), 1);
    let (level, text) = &records[0];
    assert_eq!(*level, Level::Warn);
    assert!(text.contains(file!()), "{text}");
    assert!(text.contains("alloc 0 bytes failed: Zero-sized allocation"), "{text}");

    // Page buffers are logged where they are requested.
    let buffer = PageBuffer::with_len(&system, 10).unwrap();
    let records = take_records();
    assert_eq!(records.len(), 1);
    assert!(records[0].1.contains(file!()), "{}", records[0].1);
    assert!(records[0].1.contains("page_alloc"), "{}", records[0].1);
    drop(buffer);
    take_records();

    // So are the arenas reserved at startup.
    let config = MemoryConfig::default()
        .with_stack_capacity(4096)
        .with_blocks(8, 16);
    let memory = EngineMemory::reserve(config, &system).unwrap();
    let page_records: Vec<_> = take_records()
        .into_iter()
        .filter(|(_, text)| text.contains("page_alloc"))
        .collect();
    assert_eq!(page_records.len(), 2);
    for (_, text) in &page_records {
        assert!(text.contains(file!()), "{text}");
    }
    drop(memory);
    assert_eq!(stats.page_usage(), 0);
}
