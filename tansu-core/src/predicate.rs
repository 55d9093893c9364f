//! Scan predicates.
//!
//! A predicate is a conjunction of per-field constraints over the
//! identifiers `row`, `column`, `time`, and `history`:
//!
//! ```text
//!   row ~= "com.foo" and time >= 1999-01-02T03:04:05.678901Z
//!   "word:cat" < column <= "word:dog" or column >= "word:fish"
//!   row = "com.foo.www/index.html" and history = 1
//! ```
//!
//! Row, column, and time constraints normalize to interval sets; `or` is
//! accepted between constraints on the same identifier and unions their
//! sets, `and` intersects across identifiers. `~=` is prefix match. Time
//! literals are ISO-8601 UTC or `@N` microsecond ticks; the canonical
//! printed form uses `@N`, which round-trips exactly.
//!
//! The canonical textual form escapes bytes outside printable ASCII as
//! `\xHH` and satisfies `parse(format(p)) == p`.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::cell::CellKey;
use crate::error::{Error, Result};
use crate::interval::{Interval, IntervalSet, LowerBound, UpperBound};
use crate::repr;

type ByteInterval = Interval<Vec<u8>>;
type ByteSet = IntervalSet<Vec<u8>>;
type TimeSet = IntervalSet<i64>;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScanPredicate {
    rows: Option<ByteSet>,
    columns: Option<ByteSet>,
    times: Option<TimeSet>,
    history: Option<u32>,
}

impl ScanPredicate {
    /// The unconstrained predicate.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn parse(expr: &str) -> Result<Self> {
        let toks = lex(expr)?;
        if toks.is_empty() {
            return Ok(Self::default());
        }
        let mut parser = Parser { toks, pos: 0 };
        let pred = parser.parse_expr()?;
        if parser.pos != parser.toks.len() {
            return Err(Error::value(format!(
                "trailing tokens in predicate: {:?}",
                expr
            )));
        }
        Ok(pred)
    }

    pub fn rows(&self) -> Option<&ByteSet> {
        self.rows.as_ref()
    }

    pub fn columns(&self) -> Option<&ByteSet> {
        self.columns.as_ref()
    }

    pub fn times(&self) -> Option<&TimeSet> {
        self.times.as_ref()
    }

    pub fn history(&self) -> Option<u32> {
        self.history
    }

    pub fn with_rows(mut self, rows: ByteSet) -> Self {
        self.rows = Some(canonicalize_byte_set(rows));
        self
    }

    pub fn with_row_interval(self, iv: ByteInterval) -> Self {
        self.with_rows(IntervalSet::from_interval(iv))
    }

    pub fn with_columns(mut self, columns: ByteSet) -> Self {
        self.columns = Some(canonicalize_byte_set(columns));
        self
    }

    pub fn with_times(mut self, times: TimeSet) -> Self {
        self.times = Some(times);
        self
    }

    pub fn with_history(mut self, history: u32) -> Self {
        self.history = Some(history);
        self
    }

    /// Intersect the row constraint with `span`. An empty intersection
    /// yields the unsatisfiable predicate (`"" < row < ""`), not an error.
    pub fn clip_rows(&self, span: &ByteInterval) -> ScanPredicate {
        let rows = match &self.rows {
            None => {
                if span.is_infinite() {
                    return self.clone();
                }
                IntervalSet::from_interval(span.clone())
            }
            Some(set) => set.clip(span),
        };
        ScanPredicate {
            rows: Some(rows),
            ..self.clone()
        }
    }

    /// If the column constraint reduces to a finite union of whole
    /// families, return that family set. Ranges that cross family
    /// boundaries or lack an upper bound return `None`.
    pub fn column_families(&self) -> Option<Vec<Vec<u8>>> {
        let set = self.columns.as_ref()?;
        let mut fams = BTreeSet::new();
        for iv in set.iter() {
            let lower = iv.lower.value()?;
            let colon = lower.iter().position(|&b| b == b':')?;
            let fam = lower[..colon].to_vec();
            let mut lo = fam.clone();
            lo.push(b':');
            let mut hi = fam.clone();
            hi.push(b';');
            let fam_iv = Interval::new(LowerBound::Inclusive(lo), UpperBound::Exclusive(hi));
            if !iv.contained_in(&fam_iv) {
                return None;
            }
            fams.insert(fam);
        }
        Some(fams.into_iter().collect())
    }

    pub fn matches_row(&self, row: &[u8]) -> bool {
        match &self.rows {
            None => true,
            Some(set) => set.iter().any(|iv| interval_contains_bytes(iv, row)),
        }
    }

    pub fn matches_column(&self, column: &[u8]) -> bool {
        match &self.columns {
            None => true,
            Some(set) => set.iter().any(|iv| interval_contains_bytes(iv, column)),
        }
    }

    pub fn matches_time(&self, ts: i64) -> bool {
        match &self.times {
            None => true,
            Some(set) => set.contains(&ts),
        }
    }

    pub fn matches_key(&self, key: &CellKey) -> bool {
        self.matches_row(&key.row)
            && self.matches_column(&key.column)
            && self.matches_time(key.timestamp)
    }

    /// Whether the row constraint can overlap the given interval. Used for
    /// block skipping.
    pub fn rows_overlap(&self, iv: &ByteInterval) -> bool {
        match &self.rows {
            None => !iv.is_empty(),
            Some(set) => set.overlaps(iv),
        }
    }

    /// Whether the time constraint can overlap [min, max].
    pub fn times_overlap(&self, min: i64, max: i64) -> bool {
        match &self.times {
            None => true,
            Some(set) => set.overlaps(&Interval::new(
                LowerBound::Inclusive(min),
                UpperBound::Inclusive(max),
            )),
        }
    }
}

impl FromStr for ScanPredicate {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// The empty string is the least byte string, so the full line is the
/// same constraint as `>= ""`, which, unlike an explicit unbounded
/// lower, has a textual spelling.
fn canonicalize_byte_set(set: ByteSet) -> ByteSet {
    let full = set
        .iter()
        .any(|iv| iv.lower == LowerBound::Unbounded && iv.upper == UpperBound::Unbounded);
    if full {
        IntervalSet::from_interval(Interval::new(
            LowerBound::Inclusive(Vec::new()),
            UpperBound::Unbounded,
        ))
    } else {
        set
    }
}

/// Contains check on byte slices without copying the probe.
fn interval_contains_bytes(iv: &ByteInterval, b: &[u8]) -> bool {
    let lower_ok = match &iv.lower {
        LowerBound::Unbounded => true,
        LowerBound::Inclusive(v) => b >= v.as_slice(),
        LowerBound::Exclusive(v) => b > v.as_slice(),
    };
    let upper_ok = match &iv.upper {
        UpperBound::Unbounded => true,
        UpperBound::Inclusive(v) => b <= v.as_slice(),
        UpperBound::Exclusive(v) => b < v.as_slice(),
    };
    lower_ok && upper_ok
}

/// Least byte string greater than every string with prefix `p`, or `None`
/// when no such bound exists (all-0xff or empty prefix).
pub fn next_prefix(p: &[u8]) -> Option<Vec<u8>> {
    let end = p.iter().rposition(|&b| b != 0xff)?;
    let mut out = p[..=end].to_vec();
    out[end] += 1;
    Some(out)
}

/// The interval covering every string with the given prefix.
pub fn prefix_interval(p: &[u8]) -> ByteInterval {
    let upper = match next_prefix(p) {
        Some(v) => UpperBound::Exclusive(v),
        None => UpperBound::Unbounded,
    };
    Interval::new(LowerBound::Inclusive(p.to_vec()), upper)
}

//----------------------------------------------------------------------------
// Formatting
//----------------------------------------------------------------------------

impl fmt::Display for ScanPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = Vec::new();
        let mut fields = 0;
        if self.rows.is_some() {
            fields += 1;
        }
        if self.columns.is_some() {
            fields += 1;
        }
        if self.times.is_some() {
            fields += 1;
        }
        if self.history.is_some() {
            fields += 1;
        }

        if let Some(set) = &self.rows {
            parts.push(format_byte_set("row", set, fields > 1));
        }
        if let Some(set) = &self.columns {
            parts.push(format_byte_set("column", set, fields > 1));
        }
        if let Some(set) = &self.times {
            parts.push(format_time_set(set, fields > 1));
        }
        if let Some(n) = self.history {
            parts.push(format!("history = {}", n));
        }
        write!(f, "{}", parts.join(" and "))
    }
}

fn format_byte_set(ident: &str, set: &ByteSet, parenthesize: bool) -> String {
    if set.is_empty() {
        return format!("\"\" < {} < \"\"", ident);
    }
    let atoms: Vec<String> = set.iter().map(|iv| format_byte_interval(ident, iv)).collect();
    join_atoms(atoms, parenthesize)
}

fn format_time_set(set: &TimeSet, parenthesize: bool) -> String {
    if set.is_empty() {
        return "@0 < time < @0".to_string();
    }
    let atoms: Vec<String> = set.iter().map(format_time_interval).collect();
    join_atoms(atoms, parenthesize)
}

fn join_atoms(atoms: Vec<String>, parenthesize: bool) -> String {
    if atoms.len() == 1 {
        atoms.into_iter().next().unwrap()
    } else if parenthesize {
        format!("({})", atoms.join(" or "))
    } else {
        atoms.join(" or ")
    }
}

fn format_byte_interval(ident: &str, iv: &ByteInterval) -> String {
    use LowerBound as L;
    use UpperBound as U;
    match (&iv.lower, &iv.upper) {
        (L::Unbounded, U::Unbounded) => format!("{} >= \"\"", ident),
        (L::Inclusive(v), U::Unbounded) => format!("{} >= {}", ident, repr::quoted(v)),
        (L::Exclusive(v), U::Unbounded) => format!("{} > {}", ident, repr::quoted(v)),
        (L::Unbounded, U::Inclusive(v)) => format!("{} <= {}", ident, repr::quoted(v)),
        (L::Unbounded, U::Exclusive(v)) => format!("{} < {}", ident, repr::quoted(v)),
        (L::Inclusive(a), U::Inclusive(b)) if a == b => {
            format!("{} = {}", ident, repr::quoted(a))
        }
        (L::Inclusive(a), U::Exclusive(b)) if next_prefix(a).as_deref() == Some(b.as_slice()) => {
            format!("{} ~= {}", ident, repr::quoted(a))
        }
        (lower, upper) => {
            let (lv, lop) = match lower {
                L::Inclusive(v) => (v, "<="),
                L::Exclusive(v) => (v, "<"),
                L::Unbounded => unreachable!(),
            };
            let (uv, uop) = match upper {
                U::Inclusive(v) => (v, "<="),
                U::Exclusive(v) => (v, "<"),
                U::Unbounded => unreachable!(),
            };
            format!(
                "{} {} {} {} {}",
                repr::quoted(lv),
                lop,
                ident,
                uop,
                repr::quoted(uv)
            )
        }
    }
}

fn format_time_interval(iv: &Interval<i64>) -> String {
    use LowerBound as L;
    use UpperBound as U;
    match (&iv.lower, &iv.upper) {
        (L::Unbounded, U::Unbounded) => format!("time >= @{}", i64::MIN),
        (L::Inclusive(v), U::Unbounded) => format!("time >= @{}", v),
        (L::Exclusive(v), U::Unbounded) => format!("time > @{}", v),
        (L::Unbounded, U::Inclusive(v)) => format!("time <= @{}", v),
        (L::Unbounded, U::Exclusive(v)) => format!("time < @{}", v),
        (L::Inclusive(a), U::Inclusive(b)) if a == b => format!("time = @{}", a),
        (lower, upper) => {
            let (lv, lop) = match lower {
                L::Inclusive(v) => (v, "<="),
                L::Exclusive(v) => (v, "<"),
                L::Unbounded => unreachable!(),
            };
            let (uv, uop) = match upper {
                U::Inclusive(v) => (v, "<="),
                U::Exclusive(v) => (v, "<"),
                U::Unbounded => unreachable!(),
            };
            format!("@{} {} time {} @{}", lv, lop, uop, uv)
        }
    }
}

//----------------------------------------------------------------------------
// Lexer
//----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Str(Vec<u8>),
    Ticks(i64),
    Num(i64),
    Op(CmpOp),
    LParen,
    RParen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Lt,
    Le,
    Eq,
    Ge,
    Gt,
    Prefix,
}

fn lex(expr: &str) -> Result<Vec<Tok>> {
    let bytes = expr.as_bytes();
    let mut toks = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match b {
            b' ' | b'\t' | b'\r' | b'\n' => i += 1,
            b'(' => {
                toks.push(Tok::LParen);
                i += 1;
            }
            b')' => {
                toks.push(Tok::RParen);
                i += 1;
            }
            b'<' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    toks.push(Tok::Op(CmpOp::Le));
                    i += 2;
                } else {
                    toks.push(Tok::Op(CmpOp::Lt));
                    i += 1;
                }
            }
            b'>' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    toks.push(Tok::Op(CmpOp::Ge));
                    i += 2;
                } else {
                    toks.push(Tok::Op(CmpOp::Gt));
                    i += 1;
                }
            }
            b'=' => {
                toks.push(Tok::Op(CmpOp::Eq));
                i += 1;
            }
            b'~' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    toks.push(Tok::Op(CmpOp::Prefix));
                    i += 2;
                } else {
                    return Err(Error::value("stray '~' in predicate"));
                }
            }
            b'\'' | b'"' => {
                let (s, next) = lex_quoted(bytes, i)?;
                toks.push(Tok::Str(s));
                i = next;
            }
            b'@' => {
                let start = i + 1;
                let mut j = start;
                if bytes.get(j) == Some(&b'-') {
                    j += 1;
                }
                while j < bytes.len() && bytes[j].is_ascii_digit() {
                    j += 1;
                }
                let text = std::str::from_utf8(&bytes[start..j]).unwrap();
                let ticks: i64 = text
                    .parse()
                    .map_err(|_| Error::value(format!("bad tick literal '@{}'", text)))?;
                toks.push(Tok::Ticks(ticks));
                i = j;
            }
            b'0'..=b'9' => {
                let mut j = i;
                while j < bytes.len()
                    && matches!(bytes[j],
                        b'0'..=b'9' | b'a'..=b'z' | b'A'..=b'Z' | b':' | b'.' | b'+' | b'-')
                {
                    j += 1;
                }
                let text = std::str::from_utf8(&bytes[i..j]).unwrap();
                if let Ok(n) = text.parse::<i64>() {
                    toks.push(Tok::Num(n));
                } else {
                    toks.push(Tok::Ticks(parse_iso_time(text)?));
                }
                i = j;
            }
            b'a'..=b'z' | b'A'..=b'Z' | b'_' => {
                let mut j = i;
                while j < bytes.len()
                    && matches!(bytes[j], b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'_')
                {
                    j += 1;
                }
                toks.push(Tok::Ident(
                    std::str::from_utf8(&bytes[i..j]).unwrap().to_string(),
                ));
                i = j;
            }
            _ => {
                return Err(Error::value(format!(
                    "unexpected character '{}' in predicate",
                    b as char
                )));
            }
        }
    }
    Ok(toks)
}

fn lex_quoted(bytes: &[u8], start: usize) -> Result<(Vec<u8>, usize)> {
    let quote = bytes[start];
    let mut out = Vec::new();
    let mut i = start + 1;
    while i < bytes.len() {
        let b = bytes[i];
        if b == quote {
            return Ok((out, i + 1));
        }
        if b == b'\\' {
            match bytes.get(i + 1) {
                Some(b'\\') => {
                    out.push(b'\\');
                    i += 2;
                }
                Some(b'\'') => {
                    out.push(b'\'');
                    i += 2;
                }
                Some(b'"') => {
                    out.push(b'"');
                    i += 2;
                }
                Some(b'x') => {
                    let hex = bytes
                        .get(i + 2..i + 4)
                        .and_then(|h| std::str::from_utf8(h).ok())
                        .and_then(|h| u8::from_str_radix(h, 16).ok());
                    match hex {
                        Some(v) => {
                            out.push(v);
                            i += 4;
                        }
                        None => return Err(Error::value("bad hex escape in string literal")),
                    }
                }
                Some(c) => {
                    return Err(Error::value(format!("unknown escape '\\{}'", *c as char)));
                }
                None => return Err(Error::value("trailing backslash in string literal")),
            }
        } else {
            out.push(b);
            i += 1;
        }
    }
    Err(Error::value("unterminated string literal"))
}

/// Parse an ISO-8601 timestamp to microseconds since the epoch.
fn parse_iso_time(text: &str) -> Result<i64> {
    let dt = chrono::DateTime::parse_from_rfc3339(text)
        .map_err(|e| Error::value(format!("bad timestamp '{}': {}", text, e)))?;
    Ok(dt.timestamp_micros())
}

//----------------------------------------------------------------------------
// Parser
//----------------------------------------------------------------------------

struct Parser {
    toks: Vec<Tok>,
    pos: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Row,
    Column,
    Time,
    History,
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos)
    }

    fn next(&mut self) -> Option<Tok> {
        let t = self.toks.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn at_keyword(&self, kw: &str) -> bool {
        matches!(self.peek(), Some(Tok::Ident(s)) if s == kw)
    }

    fn parse_expr(&mut self) -> Result<ScanPredicate> {
        let mut acc = self.parse_term()?;
        while self.at_keyword("or") {
            self.pos += 1;
            let rhs = self.parse_term()?;
            acc = combine_or(acc, rhs)?;
        }
        Ok(acc)
    }

    fn parse_term(&mut self) -> Result<ScanPredicate> {
        let mut acc = self.parse_factor()?;
        while self.at_keyword("and") {
            self.pos += 1;
            let rhs = self.parse_factor()?;
            acc = combine_and(acc, rhs);
        }
        Ok(acc)
    }

    fn parse_factor(&mut self) -> Result<ScanPredicate> {
        if matches!(self.peek(), Some(Tok::LParen)) {
            self.pos += 1;
            let inner = self.parse_expr()?;
            match self.next() {
                Some(Tok::RParen) => Ok(inner),
                _ => Err(Error::value("expected ')' in predicate")),
            }
        } else {
            self.parse_atom()
        }
    }

    fn parse_atom(&mut self) -> Result<ScanPredicate> {
        match self.next() {
            // ident op literal
            Some(Tok::Ident(ident)) => {
                let field = field_of(&ident)?;
                let op = self.expect_op()?;
                match field {
                    Field::History => {
                        if op != CmpOp::Eq {
                            return Err(Error::value("history supports '=' only"));
                        }
                        match self.next() {
                            Some(Tok::Num(n)) if n > 0 && n <= u32::MAX as i64 => {
                                Ok(ScanPredicate::all().with_history(n as u32))
                            }
                            other => Err(Error::value(format!(
                                "bad history count: {:?}",
                                other
                            ))),
                        }
                    }
                    Field::Time => {
                        let ticks = self.expect_ticks()?;
                        let iv = interval_from_op(op, ticks)?;
                        Ok(ScanPredicate::all().with_times(IntervalSet::from_interval(iv)))
                    }
                    Field::Row | Field::Column => {
                        let s = self.expect_str()?;
                        let iv = if op == CmpOp::Prefix {
                            prefix_interval(&s)
                        } else {
                            interval_from_op(op, s)?
                        };
                        Ok(self.predicate_for(field, IntervalSet::from_interval(iv)))
                    }
                }
            }
            // literal op ident [op literal]: range or reversed compare
            Some(Tok::Str(s)) => {
                let op = self.expect_op()?;
                let ident = self.expect_ident()?;
                let field = field_of(&ident)?;
                if !matches!(field, Field::Row | Field::Column) {
                    return Err(Error::value(format!(
                        "string literal cannot bound '{}'",
                        ident
                    )));
                }
                let iv = self.finish_range(op, s, |p: &mut Parser| p.expect_str())?;
                Ok(self.predicate_for(field, IntervalSet::from_interval(iv)))
            }
            Some(Tok::Ticks(t)) | Some(Tok::Num(t)) => {
                let op = self.expect_op()?;
                let ident = self.expect_ident()?;
                if field_of(&ident)? != Field::Time {
                    return Err(Error::value(format!(
                        "time literal cannot bound '{}'",
                        ident
                    )));
                }
                let iv = self.finish_range(op, t, |p: &mut Parser| p.expect_ticks())?;
                Ok(ScanPredicate::all().with_times(IntervalSet::from_interval(iv)))
            }
            other => Err(Error::value(format!("unexpected token: {:?}", other))),
        }
    }

    /// After `literal op ident`, either close a `lo op ident op hi` range
    /// or treat it as a reversed single comparison.
    fn finish_range<T: Ord + Clone>(
        &mut self,
        first_op: CmpOp,
        lo: T,
        read: impl Fn(&mut Parser) -> Result<T>,
    ) -> Result<Interval<T>> {
        if matches!(self.peek(), Some(Tok::Op(_))) {
            let lower = match first_op {
                CmpOp::Lt => LowerBound::Exclusive(lo),
                CmpOp::Le => LowerBound::Inclusive(lo),
                _ => {
                    return Err(Error::value(
                        "range lower bound must use '<' or '<='",
                    ))
                }
            };
            let second = self.expect_op()?;
            let hi = read(self)?;
            let upper = match second {
                CmpOp::Lt => UpperBound::Exclusive(hi),
                CmpOp::Le => UpperBound::Inclusive(hi),
                _ => {
                    return Err(Error::value(
                        "range upper bound must use '<' or '<='",
                    ))
                }
            };
            Ok(Interval::new(lower, upper))
        } else {
            // "lit < ident" reads as "ident > lit"
            let flipped = match first_op {
                CmpOp::Lt => CmpOp::Gt,
                CmpOp::Le => CmpOp::Ge,
                CmpOp::Gt => CmpOp::Lt,
                CmpOp::Ge => CmpOp::Le,
                CmpOp::Eq => CmpOp::Eq,
                CmpOp::Prefix => {
                    return Err(Error::value("'~=' requires the identifier on the left"))
                }
            };
            interval_from_op(flipped, lo)
        }
    }

    fn predicate_for(&self, field: Field, set: ByteSet) -> ScanPredicate {
        match field {
            Field::Row => ScanPredicate::all().with_rows(set),
            Field::Column => ScanPredicate::all().with_columns(set),
            _ => unreachable!(),
        }
    }

    fn expect_op(&mut self) -> Result<CmpOp> {
        match self.next() {
            Some(Tok::Op(op)) => Ok(op),
            other => Err(Error::value(format!("expected operator, got {:?}", other))),
        }
    }

    fn expect_str(&mut self) -> Result<Vec<u8>> {
        match self.next() {
            Some(Tok::Str(s)) => Ok(s),
            other => Err(Error::value(format!(
                "expected string literal, got {:?}",
                other
            ))),
        }
    }

    fn expect_ticks(&mut self) -> Result<i64> {
        match self.next() {
            Some(Tok::Ticks(t)) | Some(Tok::Num(t)) => Ok(t),
            other => Err(Error::value(format!(
                "expected timestamp, got {:?}",
                other
            ))),
        }
    }

    fn expect_ident(&mut self) -> Result<String> {
        match self.next() {
            Some(Tok::Ident(s)) => Ok(s),
            other => Err(Error::value(format!(
                "expected identifier, got {:?}",
                other
            ))),
        }
    }
}

fn field_of(ident: &str) -> Result<Field> {
    match ident {
        "row" => Ok(Field::Row),
        "column" => Ok(Field::Column),
        "time" => Ok(Field::Time),
        "history" => Ok(Field::History),
        other => Err(Error::value(format!("unknown identifier '{}'", other))),
    }
}

fn interval_from_op<T: Ord + Clone>(op: CmpOp, v: T) -> Result<Interval<T>> {
    Ok(match op {
        CmpOp::Lt => Interval::new(LowerBound::Unbounded, UpperBound::Exclusive(v)),
        CmpOp::Le => Interval::new(LowerBound::Unbounded, UpperBound::Inclusive(v)),
        CmpOp::Eq => Interval::point(v),
        CmpOp::Ge => Interval::new(LowerBound::Inclusive(v), UpperBound::Unbounded),
        CmpOp::Gt => Interval::new(LowerBound::Exclusive(v), UpperBound::Unbounded),
        CmpOp::Prefix => return Err(Error::value("'~=' applies to byte strings only")),
    })
}

/// The single field a predicate constrains, or `None` if zero or several.
fn constrained_field(p: &ScanPredicate) -> Option<Field> {
    let mut fields = Vec::with_capacity(1);
    if p.rows.is_some() {
        fields.push(Field::Row);
    }
    if p.columns.is_some() {
        fields.push(Field::Column);
    }
    if p.times.is_some() {
        fields.push(Field::Time);
    }
    if p.history.is_some() {
        fields.push(Field::History);
    }
    match fields.as_slice() {
        [f] => Some(*f),
        _ => None,
    }
}

fn combine_and(a: ScanPredicate, b: ScanPredicate) -> ScanPredicate {
    ScanPredicate {
        rows: merge_and(a.rows, b.rows),
        columns: merge_and(a.columns, b.columns),
        times: merge_and(a.times, b.times),
        history: match (a.history, b.history) {
            (Some(x), Some(y)) => Some(x.min(y)),
            (x, y) => x.or(y),
        },
    }
}

fn merge_and<T: Ord + Clone>(
    a: Option<IntervalSet<T>>,
    b: Option<IntervalSet<T>>,
) -> Option<IntervalSet<T>> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.intersect(&y)),
        (x, y) => x.or(y),
    }
}

fn combine_or(a: ScanPredicate, b: ScanPredicate) -> Result<ScanPredicate> {
    let fa = constrained_field(&a);
    let fb = constrained_field(&b);
    match (fa, fb) {
        (Some(Field::Row), Some(Field::Row)) => Ok(ScanPredicate::all()
            .with_rows(a.rows.unwrap().union(&b.rows.unwrap()))),
        (Some(Field::Column), Some(Field::Column)) => Ok(ScanPredicate::all()
            .with_columns(a.columns.unwrap().union(&b.columns.unwrap()))),
        (Some(Field::Time), Some(Field::Time)) => Ok(ScanPredicate::all()
            .with_times(a.times.unwrap().union(&b.times.unwrap()))),
        _ => Err(Error::value(
            "'or' requires both sides to constrain the same single field",
        )),
    }
}
