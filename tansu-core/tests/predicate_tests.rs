//! Scan predicate parsing, formatting, clipping, and column-family
//! extraction.

use proptest::prelude::*;

use tansu_core::interval::{Interval, IntervalSet, LowerBound, UpperBound};
use tansu_core::predicate::{next_prefix, prefix_interval};
use tansu_core::ScanPredicate;

/// Parse an expression and print it back in canonical form.
fn p(expr: &str) -> String {
    ScanPredicate::parse(expr).unwrap().to_string()
}

#[test]
fn test_parse_empty() {
    assert_eq!(p(""), "");
    assert_eq!(p("   "), "");
}

#[test]
fn test_parse_row_predicates() {
    assert_eq!(p("  row < 'foo'  "), "row < \"foo\"");
    assert_eq!(p("row ~= 'foo'"), "row ~= \"foo\"");
    assert_eq!(p("row ~= 'foo\\xff'"), "row ~= \"foo\\xff\"");
    assert_eq!(p("row ~= ''"), "row >= \"\"");
}

#[test]
fn test_parse_documentation_examples() {
    assert_eq!(
        p("row = 'com.foo.www/index.html' and history = 1"),
        "row = \"com.foo.www/index.html\" and history = 1"
    );
    assert_eq!(
        p("\"word:cat\" < column <= \"word:dog\" or column >= \"word:fish\""),
        "\"word:cat\" < column <= \"word:dog\" or column >= \"word:fish\""
    );
    assert_eq!(p("time = @0"), "time = @0");

    // ISO timestamps parse to microsecond ticks and print in tick form
    let ts = chrono::DateTime::parse_from_rfc3339("1999-01-02T03:04:05.678901Z")
        .unwrap()
        .timestamp_micros();
    assert_eq!(
        p("row ~= 'com.foo' and time >= 1999-01-02T03:04:05.678901Z"),
        format!("row ~= \"com.foo\" and time >= @{}", ts)
    );
}

#[test]
fn test_parse_escapes() {
    // Trailing escaped backslash is fine; trailing bare backslash is not
    assert_eq!(p("row = 'foo\\\\'"), "row = \"foo\\\\\"");
    assert!(ScanPredicate::parse("row = 'foo\\'").is_err());

    assert_eq!(p("row ~= '\\x00'"), "row ~= \"\\x00\"");
    assert_eq!(
        p("'com.v\\xe0' <= row < 'com.xp'"),
        "\"com.v\\xe0\" <= row < \"com.xp\""
    );
}

#[test]
fn test_parse_errors() {
    assert!(ScanPredicate::parse("row = 'unterminated").is_err());
    assert!(ScanPredicate::parse("bogus = 'x'").is_err());
    assert!(ScanPredicate::parse("row = ").is_err());
    assert!(ScanPredicate::parse("row ~ 'x'").is_err());
    assert!(ScanPredicate::parse("history = 0").is_err());
    // or across different fields is not expressible
    assert!(ScanPredicate::parse("row = 'a' or column = 'b'").is_err());
}

fn span(lb: Option<&str>, ub: Option<&str>) -> Interval<Vec<u8>> {
    let lower = match lb {
        Some(s) => LowerBound::Inclusive(s.as_bytes().to_vec()),
        None => LowerBound::Unbounded,
    };
    let upper = match ub {
        Some(s) => UpperBound::Exclusive(s.as_bytes().to_vec()),
        None => UpperBound::Unbounded,
    };
    Interval::new(lower, upper)
}

fn clip_row(expr: &str, lb: Option<&str>, ub: Option<&str>) -> String {
    ScanPredicate::parse(expr)
        .unwrap()
        .clip_rows(&span(lb, ub))
        .to_string()
}

#[test]
fn test_clip_rows() {
    assert_eq!(clip_row("", Some("bar"), Some("foo")), "\"bar\" <= row < \"foo\"");
    assert_eq!(
        clip_row("row > 'cat'", Some("bar"), Some("foo")),
        "\"cat\" < row < \"foo\""
    );
    assert_eq!(
        clip_row("row < 'cat' and history = 3", Some("bar"), Some("foo")),
        "\"bar\" <= row < \"cat\" and history = 3"
    );

    assert_eq!(clip_row("row < 'cat'", None, None), "row < \"cat\"");
    assert_eq!(clip_row("row > 'cat'", None, None), "row > \"cat\"");
    assert_eq!(clip_row("row > 'cat'", None, Some("dog")), "\"cat\" < row < \"dog\"");
    assert_eq!(clip_row("row < 'rat'", Some("dog"), None), "\"dog\" <= row < \"rat\"");

    // Empty intersection becomes the unsatisfiable predicate
    assert_eq!(clip_row("row < 'cat'", Some("dog"), None), "\"\" < row < \"\"");
}

#[test]
fn test_clip_rows_idempotent() {
    let exprs = ["", "row > 'cat'", "row ~= 'com.'", "row < 'cat' and history = 3"];
    let spans = [
        span(Some("bar"), Some("foo")),
        span(None, Some("dog")),
        span(Some("dog"), None),
        span(None, None),
    ];
    for expr in exprs {
        for sp in &spans {
            let once = ScanPredicate::parse(expr).unwrap().clip_rows(sp);
            let twice = once.clip_rows(sp);
            assert_eq!(once, twice, "clip not idempotent for {:?}", expr);
        }
    }
}

fn families(expr: &str) -> Option<Vec<Vec<u8>>> {
    ScanPredicate::parse(expr).unwrap().column_families()
}

#[test]
fn test_column_families() {
    assert_eq!(families(""), None);
    // Unsatisfiable column range: extractable, zero families
    assert_eq!(families("'b' < column < 'a'"), Some(vec![]));

    assert_eq!(
        families("column = 'source:whitelist'"),
        Some(vec![b"source".to_vec()])
    );
    assert_eq!(
        families("column = 'source:whitelist' or column = 'source:deepcrawl'"),
        Some(vec![b"source".to_vec()])
    );
    assert_eq!(
        families("column = 'source:whitelist' or column = 'depth:1'"),
        Some(vec![b"depth".to_vec(), b"source".to_vec()])
    );
    assert_eq!(
        families("column ~= 'source:deepcrawl'"),
        Some(vec![b"source".to_vec()])
    );
    assert_eq!(families("column ~= 'source:'"), Some(vec![b"source".to_vec()]));
    assert_eq!(families("column ~= 'source'"), None);
    assert_eq!(families("column < 'source;'"), None);
    assert_eq!(
        families("'source:' < column < 'source;'"),
        Some(vec![b"source".to_vec()])
    );
    assert_eq!(
        families("'source:a' < column < 'source:d'"),
        Some(vec![b"source".to_vec()])
    );
    assert_eq!(
        families("'source:a' <= column < 'source:d'"),
        Some(vec![b"source".to_vec()])
    );
    assert_eq!(
        families("'source:a' < column <= 'source:d'"),
        Some(vec![b"source".to_vec()])
    );
    assert_eq!(
        families("'source:a' <= column <= 'source:d'"),
        Some(vec![b"source".to_vec()])
    );
    assert_eq!(families("'source1:a' <= column <= 'source2:d'"), None);
    assert_eq!(
        families("column = 'source:whitelist' or column > 'source:whitelist'"),
        None
    );
    assert_eq!(families("column = 'source:whitelist' or column > 'zeta'"), None);
}

#[test]
fn test_matching() {
    let pred = ScanPredicate::parse("row ~= 'com.' and column = 'link:out' and time >= @10")
        .unwrap();
    assert!(pred.matches_row(b"com.example"));
    assert!(!pred.matches_row(b"org.example"));
    assert!(pred.matches_column(b"link:out"));
    assert!(!pred.matches_column(b"link:in"));
    assert!(pred.matches_time(10));
    assert!(!pred.matches_time(9));
}

#[test]
fn test_next_prefix() {
    assert_eq!(next_prefix(b"foo"), Some(b"fop".to_vec()));
    assert_eq!(next_prefix(b"foo\xff"), Some(b"fop".to_vec()));
    assert_eq!(next_prefix(b""), None);
    assert_eq!(next_prefix(b"\xff\xff"), None);
    // An unboundable prefix still covers everything from itself up
    assert!(!prefix_interval(b"\xff").is_empty());
    assert!(prefix_interval(b"\xff").contains(&b"\xff\x01".to_vec()));
}

//----------------------------------------------------------------------------
// Round-trip property
//----------------------------------------------------------------------------

fn arb_value() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..8)
}

/// Intervals with a finite lower bound; unions of these can never
/// normalize to the full line, which has no textual form.
fn arb_interval() -> impl Strategy<Value = Interval<Vec<u8>>> {
    (arb_value(), arb_value(), 0..2u8, 0..3u8).prop_map(|(a, b, lk, uk)| {
        let lower = if lk == 0 {
            LowerBound::Inclusive(a)
        } else {
            LowerBound::Exclusive(a)
        };
        let upper = match uk {
            0 => UpperBound::Inclusive(b),
            1 => UpperBound::Exclusive(b),
            _ => UpperBound::Unbounded,
        };
        Interval::new(lower, upper)
    })
}

fn arb_byte_set() -> impl Strategy<Value = IntervalSet<Vec<u8>>> {
    prop::collection::vec(arb_interval(), 1..4).prop_map(IntervalSet::new)
}

fn arb_time_set() -> impl Strategy<Value = IntervalSet<i64>> {
    prop::collection::vec(
        (any::<i32>(), any::<i32>(), 0..3u8).prop_map(|(a, b, uk)| {
            let upper = match uk {
                0 => UpperBound::Inclusive(b as i64),
                1 => UpperBound::Exclusive(b as i64),
                _ => UpperBound::Unbounded,
            };
            Interval::new(LowerBound::Inclusive(a as i64), upper)
        }),
        1..3,
    )
    .prop_map(IntervalSet::new)
}

fn arb_predicate() -> impl Strategy<Value = ScanPredicate> {
    (
        prop::option::of(arb_byte_set()),
        prop::option::of(arb_byte_set()),
        prop::option::of(arb_time_set()),
        prop::option::of(1..100u32),
    )
        .prop_map(|(rows, columns, times, history)| {
            let mut pred = ScanPredicate::all();
            if let Some(r) = rows {
                pred = pred.with_rows(r);
            }
            if let Some(c) = columns {
                pred = pred.with_columns(c);
            }
            if let Some(t) = times {
                pred = pred.with_times(t);
            }
            if let Some(h) = history {
                pred = pred.with_history(h);
            }
            pred
        })
}

proptest! {
    #[test]
    fn prop_format_parse_round_trip(pred in arb_predicate()) {
        let text = pred.to_string();
        let reparsed = ScanPredicate::parse(&text)
            .unwrap_or_else(|e| panic!("reparse of {:?} failed: {}", text, e));
        prop_assert_eq!(pred, reparsed);
    }
}
