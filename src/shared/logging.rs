use std::fs;
use std::io::Write;
use std::path::Path;

pub fn log_line(level: &str, event: &str, message: &str) -> Option<String> {
    let payload = serde_json::json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "level": level,
        "event": event,
        "message": message,
    });
    serde_json::to_string(&payload).ok()
}

pub fn append_engine_log(path: &Path, level: &str, event: &str, message: &str) {
    let Some(line) = log_line(level, event, message) else {
        return;
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && fs::create_dir_all(parent).is_err() {
            return;
        }
    }
    let Ok(mut file) = fs::OpenOptions::new().create(true).append(true).open(path) else {
        return;
    };
    let _ = writeln!(file, "{line}");
}

/// Optional log sink; a missing path turns every call into a no-op.
#[derive(Debug, Clone, Default)]
pub struct EngineLog {
    path: Option<std::path::PathBuf>,
}

impl EngineLog {
    pub fn new(path: Option<std::path::PathBuf>) -> Self {
        Self { path }
    }

    pub fn disabled() -> Self {
        Self { path: None }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn info(&self, event: &str, message: &str) {
        self.write("info", event, message);
    }

    pub fn warn(&self, event: &str, message: &str) {
        self.write("warn", event, message);
    }

    pub fn error(&self, event: &str, message: &str) {
        self.write("error", event, message);
    }

    fn write(&self, level: &str, event: &str, message: &str) {
        if let Some(path) = &self.path {
            append_engine_log(path, level, event, message);
        }
    }
}
