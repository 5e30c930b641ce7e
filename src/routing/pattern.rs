//! Route pattern compilation and path matching.
//!
//! # Syntax
//!
//! - Literal text matches itself, byte for byte (case-sensitive).
//! - `:name` captures one path segment: one or more characters up to, but not
//!   including, the next `/`. A name is one or more `[A-Za-z0-9_]`.
//! - `*name` at the very end of a pattern captures the rest of the path,
//!   `/` included, possibly empty. A bare trailing `*` binds under the name `*`.
//!
//! Anything that does not form a valid token (a `:` with no name after it, a
//! `*` followed by more path) is literal text. Compilation never fails.
//!
//! # Matching
//!
//! A pattern matches only the whole path. Segment captures are greedy, so
//! `/:stem.:ext` matches `/a.b.c` with `stem = "a.b"` and `ext = "c"`.
//! Matching first records, for every piece and byte offset, whether the rest
//! of the pattern can match from there, then reads the captures off that
//! table. Time is linear in the path length for a given pattern; there is no
//! backtracking.

/// One compiled piece of a route pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece {
    Literal(String),
    Segment,
    Rest,
}

/// Compiled path matcher.
///
/// Produces exactly one capture per `:name`/`*name` token, in declaration
/// order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMatcher {
    pieces: Vec<Piece>,
}

/// Output of [`compile`]: the matcher plus its ordered capture names.
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    pub matcher: PathMatcher,
    pub param_names: Vec<String>,
}

/// Name bound by a bare trailing `*`.
pub const ANONYMOUS_WILDCARD: &str = "*";

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Compile a route pattern into a matcher and its capture names.
pub fn compile(pattern: &str) -> CompiledPattern {
    let mut pieces = Vec::new();
    let mut param_names = Vec::new();
    let mut literal = String::new();

    let mut rest = pattern;
    loop {
        let mut chars = rest.chars();
        let Some(c) = chars.next() else {
            break;
        };
        let after = chars.as_str();

        match c {
            ':' => {
                let name_len = after
                    .char_indices()
                    .find(|&(_, ch)| !is_name_char(ch))
                    .map_or(after.len(), |(i, _)| i);

                if name_len == 0 {
                    literal.push(':');
                    rest = after;
                    continue;
                }

                let (name, remaining) = after.split_at(name_len);
                flush_literal(&mut literal, &mut pieces);
                pieces.push(Piece::Segment);
                param_names.push(name.to_string());
                rest = remaining;
            }
            '*' if after.chars().all(is_name_char) => {
                flush_literal(&mut literal, &mut pieces);
                pieces.push(Piece::Rest);
                param_names.push(if after.is_empty() {
                    ANONYMOUS_WILDCARD.to_string()
                } else {
                    after.to_string()
                });
                rest = "";
            }
            _ => {
                literal.push(c);
                rest = after;
            }
        }
    }
    flush_literal(&mut literal, &mut pieces);

    CompiledPattern {
        matcher: PathMatcher { pieces },
        param_names,
    }
}

fn flush_literal(literal: &mut String, pieces: &mut Vec<Piece>) {
    if !literal.is_empty() {
        pieces.push(Piece::Literal(std::mem::take(literal)));
    }
}

impl PathMatcher {
    /// Number of captures a successful match produces.
    pub fn capture_count(&self) -> usize {
        self.pieces
            .iter()
            .filter(|p| !matches!(p, Piece::Literal(_)))
            .count()
    }

    /// Test `path` and return the captured substrings in declaration order.
    pub fn captures<'p>(&self, path: &'p str) -> Option<Vec<&'p str>> {
        if let Some(Piece::Literal(prefix)) = self.pieces.first()
            && !path.starts_with(prefix.as_str())
        {
            return None;
        }

        let rows = reachability(&self.pieces, path);
        if rows.first().and_then(|row| row.first()) != Some(&true) {
            return None;
        }
        extract(&self.pieces, &rows, path)
    }

    /// Test `path` without collecting captures.
    pub fn is_match(&self, path: &str) -> bool {
        self.captures(path).is_some()
    }
}

/// `rows[i][o]` is true when `pieces[i..]` matches `path[o..]` exactly.
///
/// Built back to front in one pass per piece, so the cost is
/// O(pieces × path length) whatever the path looks like.
fn reachability(pieces: &[Piece], path: &str) -> Vec<Vec<bool>> {
    let len = path.len();
    let bytes = path.as_bytes();
    let mut rows = vec![vec![false; len + 1]; pieces.len() + 1];
    if let Some(end) = rows.last_mut().and_then(|row| row.last_mut()) {
        *end = true;
    }

    for (i, piece) in pieces.iter().enumerate().rev() {
        let (head, tail) = rows.split_at_mut(i + 1);
        let (Some(current), Some(next)) = (head.last_mut(), tail.first()) else {
            continue;
        };
        let reaches = |offset: usize| next.get(offset) == Some(&true);

        match piece {
            Piece::Literal(lit) => {
                for (offset, cell) in current.iter_mut().enumerate() {
                    *cell = path.get(offset..).is_some_and(|rest| rest.starts_with(lit.as_str()))
                        && reaches(offset + lit.len());
                }
            }
            Piece::Rest => {
                let tail_matches_empty = reaches(len);
                for (offset, cell) in current.iter_mut().enumerate() {
                    *cell = tail_matches_empty && path.is_char_boundary(offset);
                }
            }
            Piece::Segment => {
                // `open`: some end in (offset, next '/'] is a char boundary
                // from which the tail matches.
                let mut open = false;
                for offset in (0..=len).rev() {
                    if let Some(cell) = current.get_mut(offset) {
                        *cell = open && path.is_char_boundary(offset);
                    }
                    let Some(before) = offset.checked_sub(1) else {
                        break;
                    };
                    if bytes.get(before) == Some(&b'/') {
                        open = false;
                    } else {
                        open = open || (path.is_char_boundary(offset) && reaches(offset));
                    }
                }
            }
        }
    }

    rows
}

/// Walk a successful match from the front, taking the longest segment
/// capture that still lets the rest match.
fn extract<'p>(pieces: &[Piece], rows: &[Vec<bool>], path: &'p str) -> Option<Vec<&'p str>> {
    let mut out = Vec::new();
    let mut offset = 0;

    for (i, piece) in pieces.iter().enumerate() {
        let next = rows.get(i + 1)?;
        match piece {
            Piece::Literal(lit) => offset += lit.len(),
            Piece::Rest => {
                out.push(path.get(offset..)?);
                offset = path.len();
            }
            Piece::Segment => {
                let rest = path.get(offset..)?;
                let segment_end = rest.find('/').map_or(path.len(), |i| offset + i);
                let end = (offset + 1..=segment_end)
                    .rev()
                    .find(|&end| path.is_char_boundary(end) && next.get(end) == Some(&true))?;
                out.push(path.get(offset..end)?);
                offset = end;
            }
        }
    }

    (offset == path.len()).then_some(out)
}
