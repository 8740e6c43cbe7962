use flutter_rust_bridge::frb;
use std::sync::mpsc::Sender;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use lazy_static::lazy_static;

lazy_static! {
    static ref LOG_SINK: RwLock<Option<Sender<String>>> = RwLock::new(None);
}

/// Track whether the logger has been initialized to avoid double initialization errors.
static LOGGER_INITIALIZED: AtomicBool = AtomicBool::new(false);

use log::{Level, Metadata, Record};

struct CombinedLogger;

impl log::Log for CombinedLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        #[cfg(debug_assertions)]
        {
            metadata.level() <= Level::Debug
        }
        #[cfg(not(debug_assertions))]
        {
            metadata.level() <= Level::Info
        }
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let msg = format_record(record.level(), record.target(), &record.args().to_string());

            // Only use println if no sink is connected (avoid duplication)
            if !try_send_log_to_sink(&msg) {
                println!("{}", msg);
            }
        }
    }

    fn flush(&self) {}
}

static LOGGER: CombinedLogger = CombinedLogger;

fn format_record(level: Level, target: &str, body: &str) -> String {
    format!("[{}][{}] {}", level, target, body)
}

fn default_level() -> log::LevelFilter {
    #[cfg(debug_assertions)]
    {
        log::LevelFilter::Debug
    }
    #[cfg(not(debug_assertions))]
    {
        log::LevelFilter::Info
    }
}

/// Initialize the global logger.
///
/// This function is idempotent - calling it multiple times is safe and will
/// simply return Ok(()) if the logger is already initialized.
///
/// Log levels:
/// - Debug builds: DEBUG and above
/// - Release builds: INFO and above
///
/// On Android and iOS the platform logger is installed instead, so records
/// land in logcat / the unified log.
pub fn init_logger() -> anyhow::Result<()> {
    if LOGGER_INITIALIZED.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err() {
        return Ok(());
    }

    #[cfg(target_os = "android")]
    let result: Result<(), log::SetLoggerError> = {
        android_logger::init_once(android_logger::Config::default().with_max_level(default_level()));
        Ok(())
    };

    #[cfg(target_os = "ios")]
    let result = oslog::OsLogger::new("dev.rag_vector_core")
        .level_filter(default_level())
        .init();

    #[cfg(not(any(target_os = "android", target_os = "ios")))]
    let result = log::set_logger(&LOGGER).map(|()| log::set_max_level(default_level()));

    result.map_err(|e| {
        // Reset the flag if initialization failed
        LOGGER_INITIALIZED.store(false, Ordering::SeqCst);
        anyhow::anyhow!("Logger init failed: {}", e)
    })
}

/// Route formatted log lines into `sink` instead of stdout.
#[frb(ignore)]
pub fn init_log_stream(sink: Sender<String>) -> anyhow::Result<()> {
    let mut guard = LOG_SINK.write().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
    *guard = Some(sink);
    Ok(())
}

/// Detach the log sink. Lines go back to stdout.
#[frb(sync)]
pub fn close_log_stream() -> anyhow::Result<()> {
    let mut guard = LOG_SINK.write().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
    *guard = None;
    Ok(())
}

/// Try to send a log message to the sink if one is registered.
/// Returns true if sent, false otherwise.
fn try_send_log_to_sink(msg: &str) -> bool {
    match LOG_SINK.read() {
        Ok(guard) => match &*guard {
            Some(sink) => sink.send(msg.to_string()).is_ok(),
            None => false,
        },
        Err(_) => {
            #[cfg(debug_assertions)]
            eprintln!("[WARNING] log sink lock is poisoned");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::channel;

    #[test]
    fn test_init_logger_is_idempotent() {
        init_logger().unwrap();
        init_logger().unwrap();
    }

    #[test]
    fn test_format_record() {
        assert_eq!(format_record(Level::Info, "store", "opened"), "[INFO][store] opened");
    }

    #[test]
    fn test_sink_receives_lines_until_closed() {
        let (tx, rx) = channel();
        init_log_stream(tx).unwrap();
        assert!(try_send_log_to_sink("[INFO][test] hello"));
        // Other tests may log concurrently through the same sink.
        assert!(rx.try_iter().any(|line| line == "[INFO][test] hello"));

        close_log_stream().unwrap();
        assert!(!try_send_log_to_sink("dropped"));
    }
}
