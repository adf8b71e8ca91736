//! Plain-text program listings: one chunk per line, `#` starts a comment.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::chunk::{self, Chunk};

#[derive(Debug, Error)]
pub enum ProgramLoadError {
    #[error("cannot access listing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("line {line}: `{token}` is not a chunk")]
    InvalidToken { line: usize, token: String },
    #[error("listing contains no chunks")]
    Empty,
}

pub fn parse_listing(text: &str) -> Result<Vec<Chunk>, ProgramLoadError> {
    let mut program = Vec::new();
    for (i, line) in text.lines().enumerate() {
        let token = line.trim();
        if token.is_empty() || token.starts_with('#') {
            continue;
        }
        let chunk = token.parse::<Chunk>().map_err(|_| ProgramLoadError::InvalidToken {
            line: i + 1,
            token: token.to_string(),
        })?;
        program.push(chunk);
    }
    if program.is_empty() {
        return Err(ProgramLoadError::Empty);
    }
    Ok(program)
}

pub fn load_listing<P: AsRef<Path>>(path: P) -> Result<Vec<Chunk>, ProgramLoadError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|source| ProgramLoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_listing(&text)
}

/// Listing text with a disassembly comment above each chunk.
pub fn render_listing(program: &[Chunk]) -> String {
    let mut text = String::new();
    for (address, chunk) in program.iter().enumerate() {
        let _ = writeln!(text, "# {address:04}: {}", chunk::disassemble(*chunk));
        let _ = writeln!(text, "{chunk}");
    }
    text
}

pub fn write_listing<P: AsRef<Path>>(path: P, program: &[Chunk]) -> Result<(), ProgramLoadError> {
    let path = path.as_ref();
    fs::write(path, render_listing(program)).map_err(|source| ProgramLoadError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let program = parse_listing("# header\n\n 81 \n512\n# trailing\n").unwrap();
        assert_eq!(program, vec![81, 512]);
    }

    #[test]
    fn bad_token_reports_its_line() {
        let err = parse_listing("81\n\nPUSH 3\n").unwrap_err();
        match err {
            ProgramLoadError::InvalidToken { line, token } => {
                assert_eq!(line, 3);
                assert_eq!(token, "PUSH 3");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(parse_listing("-4"), Err(ProgramLoadError::InvalidToken { .. })));
        assert!(matches!(parse_listing("# only\n"), Err(ProgramLoadError::Empty)));
    }

    #[test]
    fn rendered_listing_parses_back() {
        let program = vec![81, 512, 1];
        let text = render_listing(&program);
        assert!(text.contains("# 0001: PUSH 0"));
        assert_eq!(parse_listing(&text).unwrap(), program);
    }

    #[test]
    fn files_round_trip_and_missing_files_name_their_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("program.txt");
        write_listing(&path, &[81, 7]).unwrap();
        assert_eq!(load_listing(&path).unwrap(), vec![81, 7]);

        let missing = dir.path().join("absent.txt");
        let err = load_listing(&missing).unwrap_err();
        assert!(err.to_string().contains("absent.txt"));
    }
}
