//! Unit tests for parser.rs module

use chat_log_ingest::parser::{parse_header, parse_line, reconstruct_lines, split_lines};
use proptest::prelude::*;

#[test]
fn test_parse_quoted_comma_and_escaped_quote() {
    assert_eq!(parse_line(r#"a,"b,c","d""e""#), vec!["a", "b,c", "d\"e"]);
}

#[test]
fn test_parse_empty_fields() {
    assert_eq!(parse_line("a,,c,"), vec!["a", "", "c", ""]);
}

#[test]
fn test_parse_unterminated_quote_runs_to_end() {
    assert_eq!(parse_line(r#"a,"b,c"#), vec!["a", "b,c"]);
}

#[test]
fn test_parse_header_strips_quotes_and_spaces() {
    assert_eq!(parse_header(r#" "chat_id" , 'text',type "#), vec!["chat_id", "text", "type"]);
}

#[test]
fn test_split_lines_drops_blank_and_carriage_returns() {
    assert_eq!(split_lines("a,b\r\n\r\n1,2\n  \n3,4"), vec!["a,b", "1,2", "3,4"]);
}

#[test]
fn test_reconstruct_merges_split_record() {
    let lines = ["h1,h2,h3,h4,h5", "1,2,3", "4,5"];
    let out = reconstruct_lines(&lines, 5, 10);

    assert_eq!(out.lines, vec!["h1,h2,h3,h4,h5", "1,2,3,4,5"]);
    assert_eq!(out.merged, 1);
    assert_eq!(out.dropped, 0);
}

#[test]
fn test_reconstruct_keeps_complete_lines() {
    let lines = ["a,b,c", "1,2,3", "4,5,6"];
    let out = reconstruct_lines(&lines, 3, 10);

    assert_eq!(out.lines.len(), 3);
    assert_eq!(out.merged, 0);
}

#[test]
fn test_reconstruct_tolerates_one_missing_field() {
    let lines = ["a,b,c,d", "1,2,3"];
    let out = reconstruct_lines(&lines, 4, 10);

    assert_eq!(out.lines, vec!["a,b,c,d", "1,2,3"]);
    assert_eq!(out.dropped, 0);
}

#[test]
fn test_reconstruct_drops_unrecoverable_record() {
    // The second line would overshoot, so it starts a record of its own
    let lines = ["a,b,c,d,e", "1,2", "x,y,z,w"];
    let out = reconstruct_lines(&lines, 5, 10);

    assert_eq!(out.lines, vec!["a,b,c,d,e", "x,y,z,w"]);
    assert_eq!(out.dropped, 1);
    assert_eq!(out.merged, 0);
}

#[test]
fn test_reconstruct_respects_join_limit() {
    let lines = ["a,b,c,d,e,f", "1", "2", "3", "4", "5"];
    let out = reconstruct_lines(&lines, 6, 2);

    // "1,2,3" is too short and dropped; "4,5" likewise
    assert_eq!(out.lines, vec!["a,b,c,d,e,f"]);
    assert_eq!(out.dropped, 2);
}

#[test]
fn test_reconstruct_empty_input() {
    let lines: [&str; 0] = [];
    let out = reconstruct_lines(&lines, 3, 10);
    assert!(out.lines.is_empty());
}

proptest! {
    #[test]
    fn prop_parse_line_never_loses_unquoted_commas(fields in proptest::collection::vec("[a-z0-9 ]{0,8}", 1..10)) {
        let line = fields.join(",");
        prop_assert_eq!(parse_line(&line), fields);
    }

    #[test]
    fn prop_reconstruct_never_grows(lines in proptest::collection::vec("[a-z,\"]{0,20}", 1..30), expected in 1usize..8) {
        let out = reconstruct_lines(&lines, expected, 10);
        prop_assert!(out.lines.len() <= lines.len());
        prop_assert!(out.merged + out.dropped + out.lines.len() <= lines.len());
    }
}
