//! Task-line parsing for one CPU block.
//!
//! Fields are located by word index, walking from the start of the line for
//! every field. A newline is never skipped as whitespace, so a walk can not
//! spill into the next line.

use chrono::{DateTime, Utc};
use log::warn;
use stalltrack_common::{COMM_SIZE, TaskRecord};

use super::{
    format::{TASK_MARKER, TaskFormat},
    proc_state::ProcessLookup,
};

const TASK_DIVIDER: &str = "-\n";

fn is_blank(c: char) -> bool {
    c.is_ascii_whitespace() && c != '\n'
}

/// Skip the rest of the current word.
fn skip_chars(s: &str) -> &str {
    let end = s.find(|c: char| c.is_ascii_whitespace()).unwrap_or(s.len());
    &s[end..]
}

/// Skip blanks, stopping at a newline.
fn skip_spaces(s: &str) -> &str {
    let end = s.find(|c: char| !is_blank(c)).unwrap_or(s.len());
    &s[end..]
}

fn next_line(s: &str) -> Option<&str> {
    s.find('\n').map(|i| &s[i + 1..])
}

fn skip_words(s: &str, nwords: usize) -> &str {
    (0..nwords).fold(s, |ptr, _| skip_chars(skip_spaces(ptr)))
}

/// The word at index `nwords` of `line`, or "" past the end of the line.
fn word_at(line: &str, nwords: usize) -> &str {
    let ptr = skip_spaces(skip_words(line, nwords));
    &ptr[..ptr.len() - skip_chars(ptr).len()]
}

/// Decimal prefix of `s`, like `strtol`: 0 when there is none.
fn parse_long(s: &str) -> i64 {
    leading_long(s).unwrap_or(0)
}

fn leading_long(s: &str) -> Option<i64> {
    let digits_start = usize::from(s.starts_with(['-', '+']));
    let digits = s[digits_start..]
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len() - digits_start);
    if digits == 0 {
        return None;
    }
    s[..digits_start + digits].parse().ok()
}

/// Truncate a task name to fit `COMM_SIZE` (one slot is the terminator).
fn bounded_comm(name: &str) -> String {
    if name.len() < COMM_SIZE {
        return name.to_string();
    }

    warn!("comm_size is too large: {}", name.len());
    let mut end = COMM_SIZE - 1;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    name[..end].to_string()
}

/// Text following the dashed divider under the task header.
fn task_section(block: &str) -> Option<&str> {
    let marker = block.find(TASK_MARKER)?;
    let after_marker = &block[marker..];
    let divider = after_marker.find(TASK_DIVIDER)?;
    Some(&after_marker[divider + TASK_DIVIDER.len()..])
}

/// Number of lines after the task divider.
pub fn count_task_lines(block: &str) -> usize {
    let Some(mut ptr) = task_section(block) else {
        return 0;
    };

    let mut lines = 0;
    while !ptr.is_empty() {
        lines += 1;
        match next_line(ptr) {
            Some(rest) => ptr = rest,
            None => break,
        }
    }
    lines
}

/// Value of a `.<name> : <value>` counter line, e.g. `.nr_running`.
///
/// `name` must be followed by blanks or a colon, so `.nr_running` does not
/// match a longer counter sharing the same prefix.
pub fn counter_value(block: &str, name: &str) -> Option<i64> {
    let mut rest = block;
    while let Some(idx) = rest.find(name) {
        let after = &rest[idx + name.len()..];
        if after.starts_with(|c: char| c == ':' || is_blank(c)) {
            let line = &after[..after.find('\n').unwrap_or(after.len())];
            let value = line.trim_start();
            let value = value.strip_prefix(':').unwrap_or(value);
            return leading_long(value.trim_start());
        }
        rest = after;
    }
    None
}

/// Parse up to `nr_entries` waiting tasks out of a CPU block.
///
/// Legacy lines marked `R` are the running task and never returned. For
/// the legacy layout, tasks that `lookup` does not report as runnable are
/// dropped without counting toward `nr_entries`. Every returned record is
/// stamped `now`; the merger decides the final stamp.
pub fn parse_task_lines<L: ProcessLookup + ?Sized>(
    block: &str,
    format: &TaskFormat,
    nr_entries: usize,
    lookup: &L,
    now: DateTime<Utc>,
) -> Vec<TaskRecord> {
    let mut tasks = Vec::with_capacity(nr_entries);
    let Some(mut line) = task_section(block) else {
        return tasks;
    };
    let offsets = format.offsets();

    while tasks.len() < nr_entries && !line.is_empty() {
        let current = line;
        line = next_line(current).unwrap_or("");

        if word_at(current, 0).is_empty() || format.skips_line(current) {
            continue;
        }

        let comm = bounded_comm(word_at(current, offsets.task));
        let pid = parse_long(word_at(current, offsets.pid)) as i32;
        let ctxsw = parse_long(word_at(current, offsets.switches));
        let prio = parse_long(word_at(current, offsets.prio)) as i32;

        if format.needs_state_lookup() && !lookup.is_runnable(pid) {
            continue;
        }

        tasks.push(TaskRecord {
            comm,
            pid,
            tgid: lookup.tgid(pid),
            ctxsw,
            prio,
            since: now,
        });
    }

    tasks
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashSet,
        sync::{Mutex, Once},
    };

    use log::{Level, LevelFilter, Metadata, Record};

    use super::*;
    use crate::backend::sched_debug::format::FormatOffsets;

    static WARNINGS: Mutex<Vec<String>> = Mutex::new(Vec::new());

    struct WarningLog;

    impl log::Log for WarningLog {
        fn enabled(&self, metadata: &Metadata) -> bool {
            metadata.level() <= Level::Warn
        }

        fn log(&self, record: &Record) {
            if self.enabled(record.metadata()) {
                WARNINGS.lock().unwrap().push(record.args().to_string());
            }
        }

        fn flush(&self) {}
    }

    fn capture_warnings() {
        static INIT: Once = Once::new();
        INIT.call_once(|| {
            log::set_logger(&WarningLog).unwrap();
            log::set_max_level(LevelFilter::Warn);
        });
    }

    struct FakeLookup {
        runnable: HashSet<i32>,
    }

    impl FakeLookup {
        fn with(pids: &[i32]) -> Self {
            Self {
                runnable: pids.iter().copied().collect(),
            }
        }
    }

    impl ProcessLookup for FakeLookup {
        fn is_runnable(&self, pid: i32) -> bool {
            self.runnable.contains(&pid)
        }

        fn tgid(&self, pid: i32) -> i32 {
            pid + 1000
        }
    }

    const LEGACY_OFFSETS: FormatOffsets = FormatOffsets {
        task: 0,
        pid: 1,
        switches: 3,
        prio: 4,
    };

    const MODERN_OFFSETS: FormatOffsets = FormatOffsets {
        task: 1,
        pid: 2,
        switches: 4,
        prio: 5,
    };

    const MODERN_BLOCK: &str = "\
cpu#2, 2394.374 MHz
  .nr_running                    : 3
  .rt_nr_running                 : 0

runnable tasks:
 S            task   PID         tree-key  switches  prio     wait-time             sum-exec        sum-sleep
-------------------------------------------------------------------------------------------------------------
>R            bash  4100      1201.002311       310   120         0.000000        98.120000         0.000000 0 0 /
 S     kworker/2:1   212       990.441210      4412   120         0.000000        12.010000         0.000000 0 0 /
 R         stress  4200      1200.000000        17   120         0.000000       500.000000         0.000000 0 0 /
 S           sshd   900       100.000000        88   120         0.000000         1.000000         0.000000 0 0 /
";

    const LEGACY_BLOCK: &str = "\
cpu#0, 2394.374 MHz
  .nr_running                    : 3

runnable tasks:
            task   PID         tree-key  switches  prio     wait-time             sum-exec        sum-sleep
----------------------------------------------------------------------------------------------------------
      watchdog/0    11        -8.984472       151     0         0.000000         0.535614         0.000000 0 /
R           less  9542      2382.087644        56   120         0.000000        16.444493         0.000000 0 /
         kthread    30         1.000000         9   120         0.000000         0.100000         0.000000 0 /
";

    #[test]
    fn test_word_walk_stays_on_line() {
        let text = "  alpha beta\n  gamma";
        assert_eq!(word_at(text, 0), "alpha");
        assert_eq!(word_at(text, 1), "beta");
        assert_eq!(word_at(text, 2), "");
        assert_eq!(word_at(text, 5), "");
    }

    #[test]
    fn test_parse_long_like_strtol() {
        assert_eq!(parse_long("9542"), 9542);
        assert_eq!(parse_long("-8.98"), -8);
        assert_eq!(parse_long("abc"), 0);
        assert_eq!(parse_long(""), 0);
        assert_eq!(parse_long("-"), 0);
    }

    #[test]
    fn test_counter_value() {
        assert_eq!(counter_value(MODERN_BLOCK, ".nr_running"), Some(3));
        assert_eq!(counter_value(MODERN_BLOCK, ".rt_nr_running"), Some(0));
        assert_eq!(counter_value(LEGACY_BLOCK, ".rt_nr_running"), None);
    }

    #[test]
    fn test_counter_value_without_colon() {
        let block = "cpu#0\n  .rt_nr_running  2\n  .nr_running 5\n";
        assert_eq!(counter_value(block, ".rt_nr_running"), Some(2));
        assert_eq!(counter_value(block, ".nr_running"), Some(5));
    }

    #[test]
    fn test_counter_value_does_not_match_longer_name() {
        let block = "  .nr_running_total : 9\n  .nr_running : 4\n";
        assert_eq!(counter_value(block, ".nr_running"), Some(4));
    }

    #[test]
    fn test_count_task_lines() {
        assert_eq!(count_task_lines(LEGACY_BLOCK), 3);
        assert_eq!(count_task_lines(MODERN_BLOCK), 4);
        assert_eq!(count_task_lines("cpu#0\n  .nr_running : 0\n"), 0);
    }

    #[test]
    fn test_modern_parse_takes_expected_count() {
        let format = TaskFormat::Modern(MODERN_OFFSETS);
        let now = Utc::now();
        let tasks = parse_task_lines(MODERN_BLOCK, &format, 3, &FakeLookup::with(&[]), now);

        let pids: Vec<i32> = tasks.iter().map(|t| t.pid).collect();
        assert_eq!(pids, vec![4100, 212, 4200]);

        assert_eq!(tasks[1].comm, "kworker/2:1");
        assert_eq!(tasks[1].ctxsw, 4412);
        assert_eq!(tasks[1].prio, 120);
        assert_eq!(tasks[1].tgid, 1212);
        assert!(tasks.iter().all(|t| t.since == now));
    }

    #[test]
    fn test_modern_parse_stops_at_end_of_block() {
        let format = TaskFormat::Modern(MODERN_OFFSETS);
        let tasks = parse_task_lines(
            MODERN_BLOCK,
            &format,
            10,
            &FakeLookup::with(&[]),
            Utc::now(),
        );
        assert_eq!(tasks.len(), 4);
    }

    #[test]
    fn test_legacy_skips_running_and_non_runnable() {
        let format = TaskFormat::Legacy(LEGACY_OFFSETS);
        // 9542 is runnable per /proc but it is the `R` line, so it never shows up
        let lookup = FakeLookup::with(&[30, 9542]);
        let tasks = parse_task_lines(LEGACY_BLOCK, &format, 3, &lookup, Utc::now());

        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].pid, 30);
        assert_eq!(tasks[0].comm, "kthread");
        assert_eq!(tasks[0].ctxsw, 9);
    }

    #[test]
    fn test_legacy_only_running_task() {
        let block = "\
cpu#0, 2394.374 MHz
runnable tasks:
            task   PID         tree-key  switches  prio     wait-time             sum-exec        sum-sleep
----------------------------------------------------------------------------------------------------------
R           less  9542      2382.087644        56   120         0.000000        16.444493         0.000000 0 /
";
        let format = TaskFormat::Legacy(LEGACY_OFFSETS);
        let tasks = parse_task_lines(
            block,
            &format,
            count_task_lines(block),
            &FakeLookup::with(&[9542]),
            Utc::now(),
        );
        assert!(tasks.is_empty());
    }

    #[test]
    fn test_legacy_skips_running_line_with_fused_name() {
        let block = "\
cpu#0, 2394.374 MHz
runnable tasks:
            task   PID         tree-key  switches  prio     wait-time             sum-exec        sum-sleep
----------------------------------------------------------------------------------------------------------
Rkworker/u16:12  9542      2382.087644        56   120         0.000000        16.444493         0.000000 0 /
 kworker/u16:13  9543      2382.100000        12   120         0.000000         1.000000         0.000000 0 /
";
        let format = TaskFormat::Legacy(LEGACY_OFFSETS);
        let lookup = FakeLookup::with(&[9542, 9543]);
        let tasks = parse_task_lines(block, &format, count_task_lines(block), &lookup, Utc::now());

        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].pid, 9543);
        assert_eq!(tasks[0].comm, "kworker/u16:13");
    }

    #[test]
    fn test_long_name_is_truncated() {
        capture_warnings();

        let block = "\
runnable tasks:
 S            task   PID         tree-key  switches  prio
----------------------------------------------------------
 R a_really_long_thread_name_here  77  1.0  5  120
";
        let format = TaskFormat::Modern(MODERN_OFFSETS);
        let tasks = parse_task_lines(block, &format, 1, &FakeLookup::with(&[]), Utc::now());

        assert_eq!(tasks[0].comm, "a_really_long_t");
        assert_eq!(tasks[0].comm.len(), COMM_SIZE - 1);
        assert_eq!(tasks[0].pid, 77);
        assert!(
            WARNINGS
                .lock()
                .unwrap()
                .iter()
                .any(|w| w == "comm_size is too large: 30")
        );
    }

    #[test]
    fn test_non_numeric_pid_is_zero() {
        let block = "\
runnable tasks:
 S            task   PID         tree-key  switches  prio
----------------------------------------------------------
 R          weird   n/a  1.0  5  120
";
        let format = TaskFormat::Modern(MODERN_OFFSETS);
        let tasks = parse_task_lines(block, &format, 1, &FakeLookup::with(&[]), Utc::now());
        assert_eq!(tasks[0].pid, 0);
    }

    #[test]
    fn test_missing_task_section() {
        let format = TaskFormat::Modern(MODERN_OFFSETS);
        let tasks = parse_task_lines(
            "cpu#0\n  .nr_running : 2\n",
            &format,
            2,
            &FakeLookup::with(&[]),
            Utc::now(),
        );
        assert!(tasks.is_empty());
    }
}
