//! Access-log parsing over realistic and hostile input.

use pretty_assertions::assert_eq;

use specmock::mock::log::MIN_TOKENS;
use specmock::mock::{AccessLogEntry, LineBuffer};

const SAMPLES: &[&str] = &[
    r#"172.17.0.1 - - [01/Jan/2024:10:15:32 +0000] "GET /pets HTTP/1.1" 200 512"#,
    r#"172.17.0.1 - - [01/Jan/2024:10:15:33 +0000] "POST /pets HTTP/1.1" 201 64"#,
    r#"172.17.0.1 - - [01/Jan/2024:10:15:34 +0000] "DELETE /pets/7 HTTP/1.1" 404 0"#,
    r#"172.17.0.1 - - [01/Jan/2024:10:15:35 +0000] "GET /pets?limit=10 HTTP/1.1" 500 19"#,
];

#[test]
fn test_samples_parse() {
    let parsed: Vec<AccessLogEntry> = SAMPLES
        .iter()
        .map(|line| AccessLogEntry::parse(line).unwrap())
        .collect();

    let summary: Vec<(&str, &str, Option<u16>)> = parsed
        .iter()
        .map(|e| (e.method.as_str(), e.path.as_str(), e.status()))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("GET", "/pets", Some(200)),
            ("POST", "/pets", Some(201)),
            ("DELETE", "/pets/7", Some(404)),
            ("GET", "/pets?limit=10", Some(500)),
        ]
    );
    assert!(parsed.iter().all(|e| e.timestamp.starts_with("01/Jan/2024")));
}

#[test]
fn test_parse_is_deterministic() {
    for line in SAMPLES {
        assert_eq!(AccessLogEntry::parse(line), AccessLogEntry::parse(line));
    }
}

#[test]
fn test_every_short_line_is_rejected() {
    for count in 0..MIN_TOKENS {
        let line = vec!["x"; count].join(" ");
        let err = AccessLogEntry::parse(&line).unwrap_err();
        assert_eq!(err.expected, MIN_TOKENS);
        assert_eq!(err.tokens, line.split(' ').count());
    }
}

#[test]
fn test_exactly_min_tokens_is_accepted() {
    let line = vec!["t"; MIN_TOKENS].join(" ");
    let entry = AccessLogEntry::parse(&line).unwrap();
    assert_eq!(entry.status_code, "t");
    assert_eq!(entry.status(), None);
}

#[test]
fn test_truncated_prefixes_never_panic() {
    let line = SAMPLES[0];
    for end in 0..=line.len() {
        let _ = AccessLogEntry::parse(&line[..end]);
    }
}

#[test]
fn test_non_ascii_input_is_handled() {
    let line = "ü ö ä [ß +0000] \"ñ /ç HTTP/1.1\" 200";
    let entry = AccessLogEntry::parse(line).unwrap();
    assert_eq!(entry.timestamp, "ß");
    assert_eq!(entry.method, "ñ");
    assert_eq!(entry.path, "/ç");
    assert_eq!(entry.status(), Some(200));
}

#[test]
fn test_line_buffer_matches_whole_input_for_any_split() {
    let text = format!("{}\r\n{}\n\n{}", SAMPLES[0], SAMPLES[1], SAMPLES[2]);
    let expected = vec![SAMPLES[0], SAMPLES[1], SAMPLES[2]];

    for split in 0..=text.len() {
        let (head, tail) = text.as_bytes().split_at(split);
        let mut buffer = LineBuffer::default();
        let mut lines = buffer.push(head);
        lines.extend(buffer.push(tail));
        lines.extend(buffer.finish());
        assert_eq!(lines, expected, "split at {split}");
    }
}
