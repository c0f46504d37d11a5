//! Process-wide panic reporting.

use std::any::Any;
use std::backtrace::Backtrace;
use std::fs::OpenOptions;
use std::io::Write;
use std::panic::{PanicHookInfo, take_hook};
use std::path::{Path, PathBuf};
use std::thread;

use chrono::Local;

use crate::logging::LOG_FILE_NAME;

/// Installs a panic hook that logs through `tracing` and, in abort builds,
/// appends the record straight to the current daily log file since the
/// non-blocking writer may not flush before the process dies.
///
/// Panics inside worker tasks are normally caught by the engine and never
/// reach this hook; it exists for the driver thread and for bugs outside
/// the workers.
pub fn install(log_dir: impl AsRef<Path>) {
    let log_dir = log_dir.as_ref().to_path_buf();
    let previous_hook = take_hook();

    std::panic::set_hook(Box::new(move |panic_info: &PanicHookInfo<'_>| {
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let record = format_panic_record(panic_info);
            tracing::error!(target: "roster_sync::panic", "{record}");

            if cfg!(panic = "abort") {
                let _ = append_panic_record(&log_dir, &record);
            }
        }));

        previous_hook(panic_info);
    }));
}

/// Extract the message of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        return (*s).to_string();
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return s.clone();
    }
    "unknown panic".to_string()
}

fn append_panic_record(log_dir: &Path, record: &str) -> std::io::Result<()> {
    // Same naming as tracing_appender::rolling::daily.
    let filename = format!("{}.{}", LOG_FILE_NAME, Local::now().format("%Y-%m-%d"));
    let path = PathBuf::from(log_dir).join(filename);

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{record}")?;
    file.flush()
}

fn format_panic_record(panic_info: &PanicHookInfo<'_>) -> String {
    let payload = panic_message(panic_info.payload());
    let location = panic_info
        .location()
        .map(|loc| format!("{}:{}:{}", loc.file(), loc.line(), loc.column()))
        .unwrap_or_else(|| "<unknown>".to_string());
    let thread_name = thread::current()
        .name()
        .unwrap_or("<unnamed>")
        .to_string();
    let backtrace = Backtrace::capture();
    let ts = Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z");

    format!(
        "{ts} PANIC thread={thread_name} location={location} payload={payload}\nBacktrace:\n{backtrace}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("static message");
        assert_eq!(panic_message(boxed.as_ref()), "static message");

        let boxed: Box<dyn Any + Send> = Box::new(format!("code {}", 7));
        assert_eq!(panic_message(boxed.as_ref()), "code 7");

        let boxed: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }

    #[test]
    fn test_append_panic_record() {
        let dir = tempfile::tempdir().unwrap();
        append_panic_record(dir.path(), "PANIC first").unwrap();
        append_panic_record(dir.path(), "PANIC second").unwrap();

        let filename = format!("{}.{}", LOG_FILE_NAME, Local::now().format("%Y-%m-%d"));
        let content = std::fs::read_to_string(dir.path().join(filename)).unwrap();
        assert_eq!(content, "PANIC first\nPANIC second\n");
    }
}
