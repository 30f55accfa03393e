//! Read and rewrite the `Peers` list of an overlay node's HJSON/JSON config.
//!
//! Only the `Peers: [...]` array is touched; the rest of the file (comments,
//! ordering, formatting) is preserved byte for byte.

use std::ops::Range;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

const PEERS_KEY: &str = "Peers";

#[derive(Debug, Error)]
pub enum OverlayConfigError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no top-level `Peers` array found")]
    MissingPeers,

    #[error("`Peers` array starting at byte {0} is not terminated")]
    Unterminated(usize),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> OverlayConfigError + '_ {
    move |source| OverlayConfigError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Lexical state while walking HJSON text.
#[derive(Clone, Copy, PartialEq)]
enum Lex {
    Code,
    Quoted(u8),
    Escape(u8),
    LineComment,
    /// Holds the index of the opening `/`.
    BlockComment(usize),
}

/// Byte-level walker that knows where strings and comments are.
struct Scanner<'a> {
    bytes: &'a [u8],
    state: Lex,
}

impl<'a> Scanner<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            bytes: text.as_bytes(),
            state: Lex::Code,
        }
    }

    /// Advance past byte `i`; returns true if that byte is code (not string/comment).
    fn step(&mut self, i: usize) -> bool {
        let b = self.bytes[i];
        let next = self.bytes.get(i + 1).copied();
        match self.state {
            Lex::Code => match b {
                b'"' | b'\'' => {
                    self.state = Lex::Quoted(b);
                    false
                }
                b'#' => {
                    self.state = Lex::LineComment;
                    false
                }
                b'/' if next == Some(b'/') => {
                    self.state = Lex::LineComment;
                    false
                }
                b'/' if next == Some(b'*') => {
                    self.state = Lex::BlockComment(i);
                    false
                }
                _ => true,
            },
            Lex::Quoted(q) => {
                if b == b'\\' {
                    self.state = Lex::Escape(q);
                } else if b == q {
                    self.state = Lex::Code;
                }
                false
            }
            Lex::Escape(q) => {
                self.state = Lex::Quoted(q);
                false
            }
            Lex::LineComment => {
                if b == b'\n' {
                    self.state = Lex::Code;
                }
                false
            }
            Lex::BlockComment(open) => {
                // The closing `*` must not be the one that opened the comment.
                if b == b'/' && i >= open + 3 && self.bytes[i - 1] == b'*' {
                    self.state = Lex::Code;
                }
                false
            }
        }
    }
}

fn is_ident(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// If a `Peers` key (bare or quoted) starts at `i`, return the index just past it.
fn key_at(bytes: &[u8], i: usize) -> Option<usize> {
    let key = PEERS_KEY.as_bytes();
    let (start, quoted) = if bytes[i] == b'"' { (i + 1, true) } else { (i, false) };
    if !bytes[start..].starts_with(key) {
        return None;
    }
    if i > 0 && is_ident(bytes[i - 1]) {
        return None;
    }
    let mut end = start + key.len();
    if quoted {
        if bytes.get(end) != Some(&b'"') {
            return None;
        }
        end += 1;
    } else if bytes.get(end).copied().is_some_and(is_ident) {
        return None;
    }
    Some(end)
}

/// Byte range of the top-level `Peers` array, brackets included.
fn locate_peers(text: &str) -> Result<Range<usize>, OverlayConfigError> {
    let bytes = text.as_bytes();
    let mut scanner = Scanner::new(text);
    let mut braces = 0usize;
    let mut brackets = 0usize;
    let mut i = 0;

    while i < bytes.len() {
        // A quoted key is recognised before the scanner enters string state.
        let top_level = scanner.state == Lex::Code && brackets == 0 && braces <= 1;
        if top_level {
            if let Some(after_key) = key_at(bytes, i) {
                let mut j = after_key;
                while j < bytes.len() && bytes[j].is_ascii_whitespace() {
                    j += 1;
                }
                if bytes.get(j) == Some(&b':') {
                    j += 1;
                    while j < bytes.len() && bytes[j].is_ascii_whitespace() {
                        j += 1;
                    }
                    if bytes.get(j) == Some(&b'[') {
                        let close = matching_bracket(text, j)?;
                        return Ok(j..close + 1);
                    }
                }
            }
        }

        if scanner.step(i) {
            match bytes[i] {
                b'{' => braces += 1,
                b'}' => braces = braces.saturating_sub(1),
                b'[' => brackets += 1,
                b']' => brackets = brackets.saturating_sub(1),
                _ => {}
            }
        }
        i += 1;
    }

    Err(OverlayConfigError::MissingPeers)
}

fn matching_bracket(text: &str, open: usize) -> Result<usize, OverlayConfigError> {
    let mut scanner = Scanner::new(text);
    let mut depth = 0usize;
    for i in open..text.len() {
        if !scanner.step(i) {
            continue;
        }
        match text.as_bytes()[i] {
            b'[' => depth += 1,
            b']' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(i);
                }
            }
            _ => {}
        }
    }
    Err(OverlayConfigError::Unterminated(open))
}

/// Entries of the `Peers` array: quoted strings and HJSON quoteless lines.
pub fn read_peers(text: &str) -> Result<Vec<String>, OverlayConfigError> {
    let range = locate_peers(text)?;
    let body = &text[range.start + 1..range.end - 1];
    let mut peers = Vec::new();

    let mut chars = body.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        match c {
            c if c.is_whitespace() || c == ',' => {}
            '#' => skip_line(&mut chars),
            '/' if body[i + 1..].starts_with('/') => skip_line(&mut chars),
            '/' if body[i + 1..].starts_with('*') => {
                chars.next();
                let mut prev = ' ';
                for (_, c) in chars.by_ref() {
                    if prev == '*' && c == '/' {
                        break;
                    }
                    prev = c;
                }
            }
            '"' | '\'' => {
                let mut value = String::new();
                while let Some((_, c2)) = chars.next() {
                    match c2 {
                        '\\' => {
                            if let Some((_, esc)) = chars.next() {
                                value.push(match esc {
                                    'n' => '\n',
                                    't' => '\t',
                                    other => other,
                                });
                            }
                        }
                        q if q == c => break,
                        other => value.push(other),
                    }
                }
                peers.push(value);
            }
            _ => {
                let end = body[i..].find('\n').map_or(body.len(), |n| i + n);
                let value = body[i..end].trim().trim_end_matches(',').trim();
                if !value.is_empty() {
                    peers.push(value.to_string());
                }
                while chars.peek().is_some_and(|(j, _)| *j < end) {
                    chars.next();
                }
            }
        }
    }
    Ok(peers)
}

fn skip_line(chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>) {
    for (_, c) in chars.by_ref() {
        if c == '\n' {
            break;
        }
    }
}

fn format_list<S: AsRef<str>>(indent: &str, urls: &[S]) -> String {
    if urls.is_empty() {
        return "[]".to_string();
    }
    let items: Vec<String> = urls
        .iter()
        .map(|u| format!("{indent}  {}", serde_json::Value::from(u.as_ref())))
        .collect();
    format!("[\n{}\n{indent}]", items.join(",\n"))
}

/// Add a `Peers` key to a config that has none: first entry of the root
/// object, or first line of a braceless root.
fn insert_peers<S: AsRef<str>>(text: &str, urls: &[S]) -> String {
    let bytes = text.as_bytes();
    let mut scanner = Scanner::new(text);
    let first = (0..bytes.len()).find(|&i| scanner.step(i) && !bytes[i].is_ascii_whitespace());

    match first {
        Some(open) if bytes[open] == b'{' => {
            let rest = &text[open + 1..];
            let after = rest.trim_start();
            // Plain JSON needs quoted keys and a separating comma.
            let entry = if after.starts_with('"') {
                format!("\"{PEERS_KEY}\": {},", format_list("  ", urls))
            } else {
                format!("{PEERS_KEY}: {}", format_list("  ", urls))
            };
            format!("{}\n  {entry}{rest}", &text[..=open])
        }
        Some(at) => {
            let line_start = text[..at].rfind('\n').map_or(0, |n| n + 1);
            format!(
                "{}{PEERS_KEY}: {}\n{}",
                &text[..line_start],
                format_list("", urls),
                &text[line_start..]
            )
        }
        None => format!("{PEERS_KEY}: {}\n{text}", format_list("", urls)),
    }
}

/// Replace the `Peers` array in `text` with `urls`, keeping everything else.
/// A config without the key gets one.
pub fn render_peers<S: AsRef<str>>(text: &str, urls: &[S]) -> Result<String, OverlayConfigError> {
    let range = match locate_peers(text) {
        Ok(range) => range,
        Err(OverlayConfigError::MissingPeers) => return Ok(insert_peers(text, urls)),
        Err(e) => return Err(e),
    };

    let line_start = text[..range.start].rfind('\n').map_or(0, |n| n + 1);
    let indent: String = text[line_start..]
        .chars()
        .take_while(|c| *c == ' ' || *c == '\t')
        .collect();
    let list = format_list(&indent, urls);

    let mut out = String::with_capacity(text.len() + list.len());
    out.push_str(&text[..range.start]);
    out.push_str(&list);
    out.push_str(&text[range.end..]);
    Ok(out)
}

/// Whether the config at `path` already lists any peers. A missing key counts as none.
pub fn has_peers(path: &Path) -> Result<bool, OverlayConfigError> {
    let text = std::fs::read_to_string(path).map_err(io_err(path))?;
    match read_peers(&text) {
        Ok(peers) => Ok(!peers.is_empty()),
        Err(OverlayConfigError::MissingPeers) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Whether `path` can be opened for writing.
pub fn is_writable(path: &Path) -> bool {
    std::fs::OpenOptions::new().append(true).open(path).is_ok()
}

/// Rewrite the `Peers` list of the config at `path`.
///
/// The new content goes to a sibling temp file that is renamed over the
/// original, so a crash never leaves a half-written config.
pub fn write_peers<S: AsRef<str>>(path: &Path, urls: &[S]) -> Result<(), OverlayConfigError> {
    let text = std::fs::read_to_string(path).map_err(io_err(path))?;
    let updated = render_peers(&text, urls)?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{file_name}.peerscout.tmp"));

    let permissions = std::fs::metadata(path).map_err(io_err(path))?.permissions();
    std::fs::write(&tmp, updated).map_err(io_err(&tmp))?;
    std::fs::set_permissions(&tmp, permissions).map_err(io_err(&tmp))?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(path)(e));
    }

    info!(path = %path.display(), count = urls.len(), "updated peers in config");
    Ok(())
}
