use std::fs::OpenOptions;
use std::io::{ self, Write };
use std::path::{ Path, PathBuf };
use std::str::FromStr;
use std::sync::Mutex;
use chrono::Utc;

//  order of log (Debug < Info < Warning < Error).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug = 0,
    Info = 1,
    Warning = 2,
    Error = 3,
}

impl LogLevel {
    fn as_str(&self) -> &str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Debug => "DEBUG",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warning" | "warn" => Ok(LogLevel::Warning),
            "error" => Ok(LogLevel::Error),
            other =>
                Err(
                    format!("Invalid log level: {}. Valid options: debug, info, warning, error", other)
                ),
        }
    }
}

/// Leveled logger writing either to an append-only file or to stderr.
///
/// The analysis core receives it as `Arc<Logger>`; hosts pick the sink.
pub struct Logger {
    file_path: Option<PathBuf>,
    write_mutex: Mutex<()>,
    enabled: bool,
    min_level: LogLevel,
}

impl Logger {
    pub fn new_with_level(
        file_path: &Path,
        enabled: bool,
        min_level: LogLevel
    ) -> Result<Self, io::Error> {
        if enabled {
            if let Some(dir) = file_path.parent() {
                if !dir.as_os_str().is_empty() {
                    std::fs::create_dir_all(dir)?;
                }
            }
            // ensure file exists
            OpenOptions::new().create(true).append(true).open(file_path)?;
        }
        Ok(Logger {
            file_path: Some(file_path.to_path_buf()),
            write_mutex: Mutex::new(()),
            enabled,
            min_level,
        })
    }

    pub fn stderr(min_level: LogLevel) -> Self {
        Logger {
            file_path: None,
            write_mutex: Mutex::new(()),
            enabled: true,
            min_level,
        }
    }

    /// Swallows everything. Used by tests and embedders that log elsewhere.
    pub fn disabled() -> Self {
        Logger {
            file_path: None,
            write_mutex: Mutex::new(()),
            enabled: false,
            min_level: LogLevel::Error,
        }
    }

    fn should_log(&self, level: LogLevel) -> bool {
        self.enabled && level >= self.min_level
    }

    pub fn log(&self, level: LogLevel, message: &str) -> Result<(), io::Error> {
        if !self.should_log(level) {
            return Ok(());
        }

        let _guard = self.write_mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let timestamp = Utc::now();
        let formatted_message = format!(
            "[{}] [{}] {}\n",
            timestamp.format("%Y-%m-%d %H:%M:%S%.3f UTC"),
            level.as_str(),
            message
        );

        match &self.file_path {
            Some(path) => {
                let mut file = OpenOptions::new().create(true).append(true).open(path)?;
                file.write_all(formatted_message.as_bytes())?;
                file.flush()?;
            }
            None => {
                let mut err = io::stderr().lock();
                err.write_all(formatted_message.as_bytes())?;
            }
        }
        Ok(())
    }

    pub fn log_fmt(&self, level: LogLevel, args: std::fmt::Arguments) -> Result<(), io::Error> {
        if !self.should_log(level) {
            return Ok(());
        }
        self.log(level, &format!("{}", args))
    }

    pub fn info(&self, message: &str) -> Result<(), io::Error> {
        self.log(LogLevel::Info, message)
    }
    pub fn warn(&self, message: &str) -> Result<(), io::Error> {
        self.log(LogLevel::Warning, message)
    }
    pub fn error(&self, message: &str) -> Result<(), io::Error> {
        self.log(LogLevel::Error, message)
    }
    pub fn debug(&self, message: &str) -> Result<(), io::Error> {
        self.log(LogLevel::Debug, message)
    }

    pub fn info_fmt(&self, args: std::fmt::Arguments) -> Result<(), io::Error> {
        self.log_fmt(LogLevel::Info, args)
    }
    pub fn warn_fmt(&self, args: std::fmt::Arguments) -> Result<(), io::Error> {
        self.log_fmt(LogLevel::Warning, args)
    }
    pub fn error_fmt(&self, args: std::fmt::Arguments) -> Result<(), io::Error> {
        self.log_fmt(LogLevel::Error, args)
    }
    pub fn debug_fmt(&self, args: std::fmt::Arguments) -> Result<(), io::Error> {
        self.log_fmt(LogLevel::Debug, args)
    }

    pub fn file_path(&self) -> Option<&Path> {
        self.file_path.as_deref()
    }
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
    pub fn min_level(&self) -> LogLevel {
        self.min_level
    }
}

#[macro_export]
macro_rules! log_info {
    (
        $logger:expr,
        $($arg:tt)*
    ) => {
        $logger.info_fmt(format_args!($($arg)*))
    };
}
#[macro_export]
macro_rules! log_warn {
    (
        $logger:expr,
        $($arg:tt)*
    ) => {
        $logger.warn_fmt(format_args!($($arg)*))
    };
}
#[macro_export]
macro_rules! log_error {
    (
        $logger:expr,
        $($arg:tt)*
    ) => {
        $logger.error_fmt(format_args!($($arg)*))
    };
}
#[macro_export]
macro_rules! log_debug {
    (
        $logger:expr,
        $($arg:tt)*
    ) => {
        $logger.debug_fmt(format_args!($($arg)*))
    };
}
