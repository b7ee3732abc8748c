use std::fmt::Write as _;
use std::sync::RwLock;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;

/// Counter tables for one instrumented source file.
///
/// The three arrays run in parallel over the file's blocks. `pos` packs
/// three words per block: start line, end line, and both columns in one
/// word (low 16 bits start, high 16 bits end).
pub struct FileCover {
    pub file: &'static str,
    pub counts: &'static [AtomicU32],
    pub pos: &'static [u32],
    pub stmts: &'static [u16],
}

/// The set of counter tables registered by an instrumented build.
///
/// The instrumented code bumps `counts` slots directly; every read here
/// goes through an atomic load, so a multi-threaded target never needs to
/// pause for a profile dump.
#[derive(Default)]
pub struct CounterSet {
    files: RwLock<Vec<FileCover>>,
}

static GLOBAL: CounterSet = CounterSet {
    files: RwLock::new(Vec::new()),
};

/// The process-wide counter set the agent endpoint serves.
pub fn global_counters() -> &'static CounterSet {
    &GLOBAL
}

/// Registers one file's counter tables with the process-wide set.
pub fn register_file(
    file: &'static str,
    counts: &'static [AtomicU32],
    pos: &'static [u32],
    stmts: &'static [u16],
) {
    GLOBAL.register(file, counts, pos, stmts);
}

impl CounterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one file. A duplicate file name keeps the first
    /// registration.
    ///
    /// Panics when the parallel arrays disagree on the block count; that is
    /// a corrupt instrumented build, not a runtime condition.
    pub fn register(
        &self,
        file: &'static str,
        counts: &'static [AtomicU32],
        pos: &'static [u32],
        stmts: &'static [u16],
    ) {
        assert!(
            pos.len() == 3 * counts.len() && stmts.len() == counts.len(),
            "coverage: mismatched sizes"
        );
        let mut files = self.files.write().expect("counter lock poisoned");
        if files.iter().any(|cover| cover.file == file) {
            return;
        }
        files.push(FileCover {
            file,
            counts,
            pos,
            stmts,
        });
    }

    /// Number of registered blocks across all files.
    pub fn block_count(&self) -> usize {
        let files = self.files.read().expect("counter lock poisoned");
        files.iter().map(|cover| cover.counts.len()).sum()
    }

    /// Fraction of blocks executed at least once, in [0, 1].
    pub fn coverage(&self) -> f64 {
        let files = self.files.read().expect("counter lock poisoned");
        let mut covered = 0u64;
        let mut total = 0u64;
        for cover in files.iter() {
            for counter in cover.counts {
                if counter.load(Ordering::Relaxed) > 0 {
                    covered += 1;
                }
                total += 1;
            }
        }
        if total == 0 {
            return 0.0;
        }
        covered as f64 / total as f64
    }

    /// Serializes every registered file into the textual profile format.
    pub fn profile_text(&self, mode: &str) -> String {
        let mut out = format!("mode: {mode}\n");
        let files = self.files.read().expect("counter lock poisoned");
        for cover in files.iter() {
            for i in 0..cover.counts.len() {
                let line0 = cover.pos[3 * i];
                let line1 = cover.pos[3 * i + 1];
                let col0 = cover.pos[3 * i + 2] & 0xffff;
                let col1 = cover.pos[3 * i + 2] >> 16;
                let count = cover.counts[i].load(Ordering::Relaxed);
                let _ = writeln!(
                    out,
                    "{}:{}.{},{}.{} {} {}",
                    cover.file, line0, col0, line1, col1, cover.stmts[i], count
                );
            }
        }
        out
    }

    /// Zero-fills every counter in place. Slots are cleared one atomic
    /// store at a time; there is no cross-file consistency during the
    /// sweep, so callers clear between test runs, not during them.
    pub fn clear(&self) {
        let files = self.files.read().expect("counter lock poisoned");
        for cover in files.iter() {
            for counter in cover.counts {
                counter.store(0, Ordering::Relaxed);
            }
        }
    }
}
