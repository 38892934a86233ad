use std::fs::OpenOptions;
use std::io::{ self, Write };
use std::path::{ Path, PathBuf };
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

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warning),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

/// Line logger shared by worker threads. Writes to an optional file and,
/// when `echo` is set, to stderr.
pub struct Logger {
    file_path: Option<PathBuf>,
    file_mutex: Mutex<()>,
    echo: bool,
    min_level: LogLevel,
}

impl Logger {
    pub fn new(file_path: Option<&Path>, echo: bool, min_level: LogLevel) -> Result<Self, io::Error> {
        if let Some(path) = file_path {
            // ensure file exists
            OpenOptions::new().create(true).append(true).open(path)?;
        }
        Ok(Logger {
            file_path: file_path.map(Path::to_path_buf),
            file_mutex: Mutex::new(()),
            echo,
            min_level,
        })
    }

    /// Accepts nothing; for library callers and tests.
    pub fn silent() -> Self {
        Logger { file_path: None, file_mutex: Mutex::new(()), echo: false, min_level: LogLevel::Error }
    }

    fn should_log(&self, level: LogLevel) -> bool {
        (self.file_path.is_some() || self.echo) && level >= self.min_level
    }

    pub fn log(&self, level: LogLevel, message: &str) -> Result<(), io::Error> {
        if !self.should_log(level) {
            return Ok(());
        }

        // keep logging after a panicked writer
        let _guard = self.file_mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let timestamp = Utc::now();
        let formatted_message = format!(
            "[{}] [{}] {}\n",
            timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
            level.as_str(),
            message
        );

        if self.echo {
            io::stderr().write_all(formatted_message.as_bytes())?;
        }
        if let Some(path) = &self.file_path {
            let mut file = OpenOptions::new().create(true).append(true).open(path)?;
            file.write_all(formatted_message.as_bytes())?;
            file.flush()?;
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
