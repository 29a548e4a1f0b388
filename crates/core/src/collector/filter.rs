//! Non-evidence file filter.

/// Suffixes of files a browser or transfer leaves behind mid-download.
const PARTIAL_SUFFIXES: &[&str] = &[".crdownload", ".part", ".tmp"];

/// Decides which file names count as evidence.
///
/// Automation backends leave step screenshots, session recordings, console and
/// network logs and trace archives next to the real downloads. None of those
/// are stored or counted toward a successful collection.
#[derive(Debug, Clone, Default)]
pub struct ArtifactFilter {
    extra: Vec<String>,
}

impl ArtifactFilter {
    /// Create a filter with extra case-insensitive substrings to reject.
    pub fn new(extra: &[String]) -> Self {
        Self {
            extra: extra
                .iter()
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    /// Whether a file with this name is evidence.
    pub fn is_evidence(&self, file_name: &str) -> bool {
        let name = file_name.trim().to_lowercase();

        if name.is_empty() || name.starts_with('.') {
            return false;
        }
        if PARTIAL_SUFFIXES.iter().any(|s| name.ends_with(s)) {
            return false;
        }
        if name.contains("screenshot") || name.contains("recording") {
            return false;
        }
        if name.ends_with(".har") || name.ends_with(".webm") {
            return false;
        }
        if (name.starts_with("console") || name.starts_with("network")) && name.ends_with(".log")
        {
            return false;
        }
        if name.contains("console_log") {
            return false;
        }
        if name.starts_with("trace") && name.ends_with(".zip") {
            return false;
        }

        !self.extra.iter().any(|s| name.contains(s.as_str()))
    }
}
