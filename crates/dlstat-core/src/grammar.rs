//! Line grammar for the package-downloads log.
//!
//! Every line starts with the same prefix
//!
//! ```text
//! 2013-06-01 10:15:22,031 userA downloading ...
//! ```
//!
//! and continues as one of two alternatives:
//!
//! * **package line** – `pkgA,pkgB x [S1,S2] (12345 bytes)`
//! * **resource line** – `file.zip from project P, resource R (999 bytes)`
//!
//! The package alternative is always tried first. When it fails anywhere
//! after the shared prefix, parsing restarts from the beginning of the line
//! with the resource alternative. Filenames are greedy runs of printable
//! characters, so trying the stricter alternative first is what keeps a
//! package list from being read as a filename.
//!
//! Whitespace (space, tab, CR, LF) is skipped before every token. Literals
//! match as plain prefixes. List parsing never backtracks internally: a
//! delimiter followed by something that is not an item ends the list at the
//! delimiter, and the alternative then fails on the next expected token.

use std::fmt;

// ── Raw record ────────────────────────────────────────────────────────────────

/// Fields extracted from one successfully matched line.
///
/// Exactly one of `packages`/`filename` groups is populated; the presence of
/// `packages` marks a package line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord<'a> {
    /// Year, month and day digit runs.
    pub date: [&'a str; 3],
    /// Hour, minute, second and millisecond digit runs.
    pub time: [&'a str; 4],
    pub login: &'a str,
    pub packages: Option<Vec<&'a str>>,
    pub subjects: Option<Vec<&'a str>>,
    pub filename: Option<&'a str>,
    pub project: Option<&'a str>,
    pub resource: Option<&'a str>,
    /// Unconverted digit run from the `(N bytes)` clause.
    pub bytes_requested: &'a str,
}

// ── ParseError ────────────────────────────────────────────────────────────────

/// A line that matched neither grammar alternative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    /// 1-based line number within the input, when known.
    pub line_number: Option<usize>,
    /// The offending line, without its terminator.
    pub line: String,
    /// Byte offset of the furthest point either alternative reached.
    pub position: usize,
    /// Description of the token expected at `position`.
    pub expected: &'static str,
}

impl ParseError {
    /// Attach the line number once the caller knows it.
    pub fn at_line(mut self, line_number: usize) -> Self {
        self.line_number = Some(line_number);
        self
    }

    /// The offending line with a `>!<` marker inserted at the failure point.
    pub fn marked_line(&self) -> String {
        let split = self.position.min(self.line.len());
        match (self.line.get(..split), self.line.get(split..)) {
            (Some(head), Some(tail)) => format!("{}>!<{}", head, tail),
            _ => self.line.clone(),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line_number {
            Some(n) => write!(
                f,
                "Parse error on line {}, position {}: expected {}: {}",
                n,
                self.position,
                self.expected,
                self.marked_line()
            ),
            None => write!(
                f,
                "Parse error at position {}: expected {}: {}",
                self.position,
                self.expected,
                self.marked_line()
            ),
        }
    }
}

impl std::error::Error for ParseError {}

// ── Public entry point ────────────────────────────────────────────────────────

/// Match `line` against the package alternative, then the resource
/// alternative, returning the first success.
///
/// A trailing newline is tolerated; any other trailing content after the
/// closing `bytes)` is rejected.
pub fn parse_line(line: &str) -> Result<RawRecord<'_>, ParseError> {
    let package_failure = match package_line(line) {
        Ok(record) => return Ok(record),
        Err(e) => e,
    };
    let resource_failure = match resource_line(line) {
        Ok(record) => return Ok(record),
        Err(e) => e,
    };

    // Report whichever alternative got further into the line.
    let furthest = if resource_failure.pos > package_failure.pos {
        resource_failure
    } else {
        package_failure
    };

    Err(ParseError {
        line_number: None,
        line: line.trim_end_matches(['\r', '\n']).to_string(),
        position: furthest.pos,
        expected: furthest.expected,
    })
}

// ── Alternatives ──────────────────────────────────────────────────────────────

struct Prefix<'a> {
    date: [&'a str; 3],
    time: [&'a str; 4],
    login: &'a str,
}

fn prefix<'a>(c: &mut Cursor<'a>) -> Result<Prefix<'a>, Expected> {
    let year = c.digits_exact(4, "four-digit year")?;
    c.literal("-")?;
    let month = c.digits_exact(2, "two-digit month")?;
    c.literal("-")?;
    let day = c.digits_exact(2, "two-digit day")?;

    let hour = c.digits_exact(2, "two-digit hour")?;
    c.literal(":")?;
    let minute = c.digits_exact(2, "two-digit minute")?;
    c.literal(":")?;
    let second = c.digits_exact(2, "two-digit second")?;
    c.literal(",")?;
    let millis = c.word(is_digit, "milliseconds")?;

    let login = c.word(is_ident, "login")?;
    c.literal("downloading")?;

    Ok(Prefix {
        date: [year, month, day],
        time: [hour, minute, second, millis],
        login,
    })
}

fn package_line(line: &str) -> Result<RawRecord<'_>, Expected> {
    let mut c = Cursor::new(line);
    let p = prefix(&mut c)?;

    let packages = c.delimited(is_ident, "package name")?;
    c.literal("x")?;
    c.literal("[")?;
    let subjects = c.delimited(is_alnum, "subject id")?;
    c.literal("]")?;
    let bytes_requested = bytes_clause(&mut c)?;
    c.end()?;

    Ok(RawRecord {
        date: p.date,
        time: p.time,
        login: p.login,
        packages: Some(packages),
        subjects: Some(subjects),
        filename: None,
        project: None,
        resource: None,
        bytes_requested,
    })
}

fn resource_line(line: &str) -> Result<RawRecord<'_>, Expected> {
    let mut c = Cursor::new(line);
    let p = prefix(&mut c)?;

    let filename = c.word(is_printable, "filename")?;
    c.literal("from")?;
    c.literal("project")?;
    let project = c.word(is_ident, "project id")?;
    c.literal(",")?;
    c.literal("resource")?;
    let resource = c.word(is_ident, "resource id")?;
    let bytes_requested = bytes_clause(&mut c)?;
    c.end()?;

    Ok(RawRecord {
        date: p.date,
        time: p.time,
        login: p.login,
        packages: None,
        subjects: None,
        filename: Some(filename),
        project: Some(project),
        resource: Some(resource),
        bytes_requested,
    })
}

fn bytes_clause<'a>(c: &mut Cursor<'a>) -> Result<&'a str, Expected> {
    c.literal("(")?;
    let digits = c.word(is_digit, "byte count")?;
    c.literal("bytes)")?;
    Ok(digits)
}

// ── Character classes ─────────────────────────────────────────────────────────

fn is_digit(b: u8) -> bool {
    b.is_ascii_digit()
}

fn is_alnum(b: u8) -> bool {
    b.is_ascii_alphanumeric()
}

fn is_ident(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn is_printable(b: u8) -> bool {
    b.is_ascii_graphic()
}

fn is_space(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\r' | b'\n')
}

// ── Cursor ────────────────────────────────────────────────────────────────────

/// Where and why an alternative stopped matching.
#[derive(Debug, Clone, Copy)]
struct Expected {
    pos: usize,
    expected: &'static str,
}

/// Byte cursor over one line. Only ASCII bytes are ever consumed, so `pos`
/// always sits on a `char` boundary.
struct Cursor<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn bytes(&self) -> &'a [u8] {
        self.input.as_bytes()
    }

    fn skip_whitespace(&mut self) {
        while self.pos < self.input.len() && is_space(self.bytes()[self.pos]) {
            self.pos += 1;
        }
    }

    fn fail<T>(&self, expected: &'static str) -> Result<T, Expected> {
        Err(Expected {
            pos: self.pos,
            expected,
        })
    }

    /// Consume `lit` when the remaining input starts with it.
    fn literal(&mut self, lit: &'static str) -> Result<(), Expected> {
        self.skip_whitespace();
        if self.input[self.pos..].starts_with(lit) {
            self.pos += lit.len();
            Ok(())
        } else {
            self.fail(lit)
        }
    }

    /// Consume the longest non-empty run of bytes satisfying `class`.
    fn word(&mut self, class: fn(u8) -> bool, what: &'static str) -> Result<&'a str, Expected> {
        self.skip_whitespace();
        let start = self.pos;
        let bytes = self.bytes();
        let mut end = start;
        while end < bytes.len() && class(bytes[end]) {
            end += 1;
        }
        if end == start {
            return self.fail(what);
        }
        self.pos = end;
        Ok(&self.input[start..end])
    }

    /// Consume a digit run of exactly `n` digits; a longer run is a failure.
    fn digits_exact(&mut self, n: usize, what: &'static str) -> Result<&'a str, Expected> {
        self.skip_whitespace();
        let start = self.pos;
        let bytes = self.bytes();
        let mut end = start;
        while end < bytes.len() && is_digit(bytes[end]) {
            end += 1;
        }
        if end - start != n {
            return self.fail(what);
        }
        self.pos = end;
        Ok(&self.input[start..end])
    }

    /// `item (',' item)*`. A comma not followed by an item is left unconsumed.
    fn delimited(
        &mut self,
        class: fn(u8) -> bool,
        what: &'static str,
    ) -> Result<Vec<&'a str>, Expected> {
        let mut items = vec![self.word(class, what)?];
        loop {
            let mark = self.pos;
            if self.literal(",").is_err() {
                self.pos = mark;
                break;
            }
            match self.word(class, what) {
                Ok(item) => items.push(item),
                Err(_) => {
                    self.pos = mark;
                    break;
                }
            }
        }
        Ok(items)
    }

    /// Only whitespace may follow the last token.
    fn end(&mut self) -> Result<(), Expected> {
        self.skip_whitespace();
        if self.pos == self.input.len() {
            Ok(())
        } else {
            self.fail("end of line")
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const PACKAGE: &str =
        "2013-06-01 10:15:22,031 userA downloading pkgA x [S1,S2,S3] (12345 bytes)";
    const RESOURCE: &str = "2013-06-01 10:16:00,000 userB downloading filename.zip from project ProjX, resource ResY (999 bytes)";

    // ── package lines ─────────────────────────────────────────────────────────

    #[test]
    fn test_package_line_fields() {
        let r = parse_line(PACKAGE).unwrap();
        assert_eq!(r.date, ["2013", "06", "01"]);
        assert_eq!(r.time, ["10", "15", "22", "031"]);
        assert_eq!(r.login, "userA");
        assert_eq!(r.packages, Some(vec!["pkgA"]));
        assert_eq!(r.subjects, Some(vec!["S1", "S2", "S3"]));
        assert_eq!(r.filename, None);
        assert_eq!(r.bytes_requested, "12345");
    }

    #[test]
    fn test_package_line_multiple_packages_keep_order_and_duplicates() {
        let line = "2013-06-01 10:15:22,031 u downloading b_unproc,a_preproc,b_unproc x [S1] (1 bytes)";
        let r = parse_line(line).unwrap();
        assert_eq!(r.packages, Some(vec!["b_unproc", "a_preproc", "b_unproc"]));
    }

    #[test]
    fn test_package_line_tolerates_spaces_around_delimiters() {
        let line = "2013-06-01 10:15:22,031 u downloading p1 , p2 x[ S1 , S2 ]( 10 bytes)";
        let r = parse_line(line).unwrap();
        assert_eq!(r.packages, Some(vec!["p1", "p2"]));
        assert_eq!(r.subjects, Some(vec!["S1", "S2"]));
        assert_eq!(r.bytes_requested, "10");
    }

    #[test]
    fn test_trailing_newline_is_accepted() {
        let line = format!("{}\r\n", PACKAGE);
        assert!(parse_line(&line).is_ok());
    }

    #[test]
    fn test_long_millisecond_field() {
        let line = "2013-06-01 10:15:22,0312345 u downloading p x [S] (1 bytes)";
        assert_eq!(parse_line(line).unwrap().time[3], "0312345");
    }

    // ── resource lines ────────────────────────────────────────────────────────

    #[test]
    fn test_resource_line_fields() {
        let r = parse_line(RESOURCE).unwrap();
        assert_eq!(r.login, "userB");
        assert_eq!(r.packages, None);
        assert_eq!(r.filename, Some("filename.zip"));
        assert_eq!(r.project, Some("ProjX"));
        assert_eq!(r.resource, Some("ResY"));
        assert_eq!(r.bytes_requested, "999");
    }

    #[test]
    fn test_identifier_like_filename_falls_back_to_resource() {
        // `notes` looks like a package name until the missing `x [..]` clause.
        let line = "2013-06-01 10:16:00,000 u downloading notes from project P_1, resource R_2 (5 bytes)";
        let r = parse_line(line).unwrap();
        assert_eq!(r.packages, None);
        assert_eq!(r.filename, Some("notes"));
        assert_eq!(r.project, Some("P_1"));
    }

    #[test]
    fn test_comma_list_filename_is_resource() {
        let line = "2013-06-01 10:16:00,000 u downloading a,b,c.zip from project P, resource R (5 bytes)";
        let r = parse_line(line).unwrap();
        assert_eq!(r.filename, Some("a,b,c.zip"));
    }

    #[test]
    fn test_filename_with_punctuation() {
        let line = "2013-06-01 10:16:00,000 u downloading HCP_Q1-GroupAvg(20)[v2].zip from project HCP_Q1, resource Q1 (5 bytes)";
        let r = parse_line(line).unwrap();
        assert_eq!(r.filename, Some("HCP_Q1-GroupAvg(20)[v2].zip"));
    }

    // ── failures ──────────────────────────────────────────────────────────────

    #[test]
    fn test_missing_closing_paren_fails() {
        let line = "2013-06-01 10:15:22,031 userA downloading pkgA x [S1] (12345 bytes";
        let err = parse_line(line).unwrap_err();
        assert_eq!(err.line, line);
        assert_eq!(err.expected, "bytes)");
        assert_eq!(err.position, line.find("bytes").unwrap());
    }

    #[test]
    fn test_trailing_garbage_fails() {
        let line = format!("{} extra", PACKAGE);
        let err = parse_line(&line).unwrap_err();
        assert_eq!(err.expected, "end of line");
    }

    #[test]
    fn test_bad_prefix_fails_at_start() {
        let err = parse_line("13-06-01 10:15:22,031 u downloading p x [S] (1 bytes)").unwrap_err();
        assert_eq!(err.position, 0);
        assert_eq!(err.expected, "four-digit year");
    }

    #[test]
    fn test_five_digit_year_is_rejected() {
        assert!(parse_line("20130-06-01 10:15:22,031 u downloading p x [S] (1 bytes)").is_err());
    }

    #[test]
    fn test_subject_ids_reject_underscore() {
        let line = "2013-06-01 10:15:22,031 u downloading p x [S_1] (1 bytes)";
        assert!(parse_line(line).is_err());
    }

    #[test]
    fn test_dangling_comma_in_package_list_fails() {
        let line = "2013-06-01 10:15:22,031 u downloading p1, x [S1] (1 bytes)";
        // `x` is consumed as a second package name, so the `x` literal is missing.
        assert!(parse_line(line).is_err());
    }

    #[test]
    fn test_empty_line_fails() {
        assert!(parse_line("").is_err());
    }

    // ── ParseError ────────────────────────────────────────────────────────────

    #[test]
    fn test_marked_line_inserts_marker() {
        let err = ParseError {
            line_number: None,
            line: "abc def".to_string(),
            position: 4,
            expected: "x",
        };
        assert_eq!(err.marked_line(), "abc >!<def");
    }

    #[test]
    fn test_display_includes_line_number() {
        let err = parse_line("garbage").unwrap_err().at_line(7);
        let msg = err.to_string();
        assert!(msg.starts_with("Parse error on line 7, position 0"));
        assert!(msg.contains(">!<garbage"));
    }
}
