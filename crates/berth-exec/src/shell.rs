//! Shell snippets shared by every remote workflow.

/// Single-quote `value` for a POSIX shell.
pub fn quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"-_./:=@%+,".contains(&b))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}

const HEREDOC_MARKER: &str = "BERTH_EOF";

/// Feed `content` to `command` on stdin through a quoted heredoc.
pub fn heredoc(command: &str, content: &str) -> String {
    let newline = if content.ends_with('\n') { "" } else { "\n" };
    format!("{command} <<'{HEREDOC_MARKER}'\n{content}{newline}{HEREDOC_MARKER}")
}

/// Write `content` to `path` (creating the parent directory) with `mode`.
pub fn write_file(path: &str, content: &str, mode: &str) -> String {
    let dir = match path.rsplit_once('/') {
        Some((dir, _)) if !dir.is_empty() => dir,
        _ => ".",
    };
    let path = quote(path);
    let newline = if content.ends_with('\n') { "" } else { "\n" };
    format!(
        "mkdir -p {dir} && cat > {path} <<'{HEREDOC_MARKER}' && chmod {mode} {path}\n{content}{newline}{HEREDOC_MARKER}",
        dir = quote(dir),
    )
}
