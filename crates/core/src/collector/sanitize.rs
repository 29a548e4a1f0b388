//! Path-segment sanitizing for case folder and file names.

const MAX_SEGMENT_CHARS: usize = 100;

/// Make `name` safe to use as a single path segment.
///
/// Separators, reserved and control characters become `_`, whitespace runs
/// collapse to one space, leading/trailing dots and spaces are trimmed, and the
/// result is capped at 100 characters. May return an empty string.
pub fn sanitize_segment(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() && !c.is_whitespace() => '_',
            c => c,
        })
        .collect();

    let collapsed = replaced.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed.trim_matches(|c: char| c == '.' || c == ' ');
    let capped: String = trimmed.chars().take(MAX_SEGMENT_CHARS).collect();
    capped.trim_end_matches(|c: char| c == '.' || c == ' ').to_string()
}

const CASE_TAG_CHARS: usize = 8;

/// Folder name for a case: the sanitized display name followed by a short tag
/// from the case id, e.g. `Doe, John (1a2b3c4d)`. Cases sharing a display name
/// never share a folder. Falls back to the sanitized id alone when the name
/// has nothing usable left.
pub fn case_folder_name(display_name: &str, case_id: &str) -> String {
    let tag: String = case_id
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .take(CASE_TAG_CHARS)
        .collect();
    let name = sanitize_segment(display_name);

    match (name.is_empty(), tag.is_empty()) {
        (false, false) => {
            let room = MAX_SEGMENT_CHARS - tag.len() - 3;
            let name: String = name.chars().take(room).collect();
            format!("{} ({})", name.trim_end_matches(|c: char| c == '.' || c == ' '), tag)
        }
        (false, true) => name,
        (true, _) => {
            let id = sanitize_segment(case_id);
            if id.is_empty() {
                "case".to_string()
            } else {
                id
            }
        }
    }
}
