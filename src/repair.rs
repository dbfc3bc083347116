//! Tolerant JSON extraction from free-form model output.
//!
//! Models wrap JSON in prose, code fences, trailing commas, Python literals
//! and sometimes stop mid-object. [`parse_model_output`] tries every `{`/`[`
//! in the reply, first strictly and then through a single-pass repair, and
//! reports [`ParseOutcome::Unparsable`] instead of failing.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// Upper bound on start offsets tried per reply.
const MAX_CANDIDATES: usize = 64;

/// Result of tolerant decoding.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    Parsed(Value),
    Unparsable { raw: String },
}

fn code_fence() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| {
        Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)```").expect("code fence regex is valid")
    })
}

/// Decode the JSON object or array in `raw` that best fits an items reply.
///
/// Strict parses at every start offset win over repaired ones. A value shaped
/// like an items reply (an object with `items`, or a list of objects) is
/// returned as soon as it is found; otherwise the earliest candidate wins.
pub fn parse_model_output(raw: &str) -> ParseOutcome {
    let starts = candidate_starts(raw);

    let mut found: Vec<(usize, Value)> = Vec::new();
    for (rank, &start) in starts.iter().enumerate() {
        if let Some(value) = first_value(&raw[start..]) {
            if looks_like_items(&value) {
                return ParseOutcome::Parsed(value);
            }
            found.push((rank, value));
        }
    }

    for (rank, &start) in starts.iter().enumerate() {
        if found.iter().any(|(r, _)| *r == rank) {
            continue;
        }
        let repaired = repair(&raw[start..]).and_then(|text| serde_json::from_str::<Value>(&text).ok());
        if let Some(value) = repaired {
            if looks_like_items(&value) {
                return ParseOutcome::Parsed(value);
            }
            found.push((rank, value));
        }
    }

    match found.into_iter().min_by_key(|(rank, _)| *rank) {
        Some((_, value)) => ParseOutcome::Parsed(value),
        None => ParseOutcome::Unparsable {
            raw: raw.to_string(),
        },
    }
}

/// Byte offsets of every `{`/`[`, with the first opener of each fenced block
/// ranked ahead of the rest. Bare prose never yields a candidate.
fn candidate_starts(raw: &str) -> Vec<usize> {
    let mut starts = Vec::new();

    for caps in code_fence().captures_iter(raw) {
        if let Some(body) = caps.get(1) {
            if let Some(offset) = body.as_str().find(is_opener) {
                starts.push(body.start() + offset);
            }
        }
    }

    for (offset, c) in raw.char_indices() {
        if starts.len() >= MAX_CANDIDATES {
            break;
        }
        if is_opener(c) && !starts.contains(&offset) {
            starts.push(offset);
        }
    }

    starts
}

fn is_opener(c: char) -> bool {
    c == '{' || c == '['
}

/// Strictly parse the value at the head of `text`, ignoring what follows it.
fn first_value(text: &str) -> Option<Value> {
    serde_json::Deserializer::from_str(text)
        .into_iter::<Value>()
        .next()?
        .ok()
}

fn looks_like_items(value: &Value) -> bool {
    match value {
        Value::Object(obj) => obj.contains_key("items"),
        Value::Array(entries) => !entries.is_empty() && entries.iter().all(Value::is_object),
        _ => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Container {
    Object,
    Array,
}

/// What the scanner expects next inside a container.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Expect {
    Key,
    Colon,
    Value,
    Comma,
}

#[derive(Debug)]
struct Frame {
    kind: Container,
    expect: Expect,
}

/// Rewrite near-JSON into strict JSON. Returns `None` when the text cannot be
/// repaired with confidence.
fn repair(input: &str) -> Option<String> {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len() + 16);
    let mut stack: Vec<Frame> = Vec::new();
    let mut i = 0;
    let mut started = false;

    while i < chars.len() {
        if started && stack.is_empty() {
            // trailing text after the top-level value
            break;
        }

        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '/' if chars.get(i + 1) == Some(&'/') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                i += 2;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    i += 1;
                }
                i += 2;
            }
            '{' | '[' => {
                begin_value(&mut stack, &mut out)?;
                out.push(c);
                stack.push(Frame {
                    kind: if c == '{' { Container::Object } else { Container::Array },
                    expect: if c == '{' { Expect::Key } else { Expect::Value },
                });
                started = true;
                i += 1;
            }
            '}' | ']' => {
                let kind = if c == '}' { Container::Object } else { Container::Array };
                // A mismatched closer closes the inner container first.
                while let Some(top) = stack.last() {
                    if top.kind == kind {
                        break;
                    }
                    close_frame(&mut stack, &mut out);
                }
                if stack.is_empty() {
                    break;
                }
                close_frame(&mut stack, &mut out);
                i += 1;
            }
            ',' => {
                if let Some(top) = stack.last_mut() {
                    if top.expect == Expect::Comma {
                        out.push(',');
                        top.expect = match top.kind {
                            Container::Object => Expect::Key,
                            Container::Array => Expect::Value,
                        };
                    }
                }
                i += 1;
            }
            ':' => {
                if let Some(top) = stack.last_mut() {
                    if top.expect == Expect::Colon {
                        out.push(':');
                        top.expect = Expect::Value;
                    }
                }
                i += 1;
            }
            '"' | '\'' => {
                let (text, next) = read_quoted(&chars, i);
                i = next;
                if at_key_position(&stack) {
                    begin_key(&mut stack, &mut out, &text);
                } else {
                    begin_value(&mut stack, &mut out)?;
                    out.push_str(&text);
                    end_value(&mut stack);
                }
            }
            _ => {
                if stack.is_empty() {
                    return None;
                }
                if at_key_position(&stack) {
                    let (key, next) = read_bare_key(&chars, i)?;
                    i = next;
                    begin_key(&mut stack, &mut out, &serde_json::to_string(&key).ok()?);
                } else {
                    let (word, next) = read_bare_value(&chars, i);
                    i = next;
                    begin_value(&mut stack, &mut out)?;
                    out.push_str(&bare_literal(&word)?);
                    end_value(&mut stack);
                }
            }
        }
    }

    if !started {
        return None;
    }

    // Truncated output: close whatever is still open.
    while !stack.is_empty() {
        close_frame(&mut stack, &mut out);
    }

    Some(out)
}

fn at_key_position(stack: &[Frame]) -> bool {
    matches!(
        stack.last(),
        Some(Frame {
            kind: Container::Object,
            expect: Expect::Key | Expect::Comma,
        })
    )
}

fn begin_key(stack: &mut [Frame], out: &mut String, quoted: &str) {
    if let Some(top) = stack.last_mut() {
        if top.expect == Expect::Comma {
            out.push(',');
        }
        out.push_str(quoted);
        top.expect = Expect::Colon;
    }
}

/// Prepare the output for a value, inserting a missing `,` or `:`.
fn begin_value(stack: &mut [Frame], out: &mut String) -> Option<()> {
    let Some(top) = stack.last_mut() else {
        return Some(());
    };
    match (top.kind, top.expect) {
        (_, Expect::Value) => {}
        (Container::Array, Expect::Comma) => out.push(','),
        (Container::Object, Expect::Colon) => out.push(':'),
        _ => return None,
    }
    top.expect = Expect::Value;
    Some(())
}

fn end_value(stack: &mut [Frame]) {
    if let Some(top) = stack.last_mut() {
        top.expect = Expect::Comma;
    }
}

fn close_frame(stack: &mut Vec<Frame>, out: &mut String) {
    let Some(frame) = stack.pop() else {
        return;
    };
    match frame.expect {
        Expect::Colon => out.push_str(":null"),
        Expect::Value if frame.kind == Container::Object => out.push_str("null"),
        Expect::Key | Expect::Value if out.ends_with(',') => {
            out.pop();
        }
        _ => {}
    }
    out.push(match frame.kind {
        Container::Object => '}',
        Container::Array => ']',
    });
    end_value(stack);
}

/// Read a single- or double-quoted string starting at `start` and return it
/// re-encoded as a strict JSON string. Unterminated strings are closed.
fn read_quoted(chars: &[char], start: usize) -> (String, usize) {
    let quote = chars[start];
    let mut text = String::from('"');
    let mut i = start + 1;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\\' => match chars.get(i + 1) {
                Some('\'') => {
                    text.push('\'');
                    i += 2;
                }
                Some(&next) if matches!(next, '"' | '\\' | '/' | 'b' | 'f' | 'n' | 'r' | 't' | 'u') => {
                    text.push('\\');
                    text.push(next);
                    i += 2;
                }
                Some(&next) => {
                    text.push_str("\\\\");
                    text.push(next);
                    i += 2;
                }
                None => {
                    text.push_str("\\\\");
                    i += 1;
                }
            },
            c if c == quote && (quote == '"' || closes_single_quote(chars, i + 1)) => {
                i += 1;
                break;
            }
            '"' => {
                text.push_str("\\\"");
                i += 1;
            }
            '\n' => {
                text.push_str("\\n");
                i += 1;
            }
            '\r' => {
                text.push_str("\\r");
                i += 1;
            }
            '\t' => {
                text.push_str("\\t");
                i += 1;
            }
            c if (c as u32) < 0x20 => {
                text.push_str(&format!("\\u{:04x}", c as u32));
                i += 1;
            }
            c => {
                text.push(c);
                i += 1;
            }
        }
    }

    text.push('"');
    (text, i)
}

/// A `'` only ends a single-quoted string when followed by a delimiter, so
/// apostrophes inside values (`'Men's shirt'`) survive.
fn closes_single_quote(chars: &[char], next: usize) -> bool {
    chars[next..]
        .iter()
        .find(|c| !c.is_whitespace())
        .map_or(true, |c| matches!(c, ',' | '}' | ']' | ':'))
}

/// Read an unquoted key up to its `:`. Keys may contain spaces (`Item ID`).
fn read_bare_key(chars: &[char], start: usize) -> Option<(String, usize)> {
    let mut i = start;
    while i < chars.len() {
        match chars[i] {
            ':' => {
                let key: String = chars[start..i].iter().collect();
                let key = key.trim();
                return (!key.is_empty()).then(|| (key.to_string(), i));
            }
            ',' | '{' | '}' | '[' | ']' | '"' | '\n' => return None,
            _ => i += 1,
        }
    }
    None
}

/// Read an unquoted value. Literals and numbers end at whitespace so that
/// `[1 2 3]` splits; anything else runs to the next delimiter (`SAR only`).
fn read_bare_value(chars: &[char], start: usize) -> (String, usize) {
    let is_delimiter = |c: char| matches!(c, ',' | '}' | ']' | '\n' | '\r');

    let mut word_end = start;
    while word_end < chars.len() && !is_delimiter(chars[word_end]) && !chars[word_end].is_whitespace() {
        word_end += 1;
    }
    let word: String = chars[start..word_end].iter().collect();
    if is_scalar_literal(&word) {
        return (word, word_end);
    }

    let mut run_end = word_end;
    while run_end < chars.len() && !is_delimiter(chars[run_end]) {
        run_end += 1;
    }
    let run: String = chars[start..run_end].iter().collect();
    (run.trim().to_string(), run_end)
}

fn is_scalar_literal(word: &str) -> bool {
    matches!(
        word,
        "true" | "True" | "false" | "False" | "null" | "None" | "undefined"
    ) || (looks_numeric(word) && word.parse::<f64>().is_ok())
}

fn looks_numeric(word: &str) -> bool {
    word.starts_with(|c: char| c.is_ascii_digit() || matches!(c, '+' | '-' | '.'))
}

/// Map an unquoted value to its strict JSON spelling.
fn bare_literal(word: &str) -> Option<String> {
    match word {
        "true" | "True" => return Some("true".to_string()),
        "false" | "False" => return Some("false".to_string()),
        "null" | "None" | "undefined" => return Some("null".to_string()),
        _ => {}
    }

    if serde_json::from_str::<serde_json::Number>(word).is_ok() {
        return Some(word.to_string());
    }

    if looks_numeric(word) {
        if let Ok(n) = word.parse::<f64>() {
            return Some(
                serde_json::Number::from_f64(n)
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| "null".to_string()),
            );
        }
    }

    serde_json::to_string(word).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parsed(raw: &str) -> Value {
        match parse_model_output(raw) {
            ParseOutcome::Parsed(value) => value,
            ParseOutcome::Unparsable { raw } => panic!("expected a value from {:?}", raw),
        }
    }

    #[test]
    fn test_strict_json() {
        let raw = r#"{"items": [{"Item ID": "A1", "Item Description": "Toner", "Unit Price": 10.5, "Quantity": 2, "Tax Amount": 3.15, "Total Amount": 24.15}]}"#;
        let value = parsed(raw);
        assert_eq!(value["items"].as_array().unwrap().len(), 1);
        assert_eq!(value["items"][0]["Item ID"], "A1");
        assert_eq!(value["items"][0]["Quantity"], 2);
    }

    #[test]
    fn test_trailing_commas() {
        let value = parsed(r#"{"items": [{"Item ID": "A1", "Quantity": 2,},],}"#);
        assert_eq!(value, json!({ "items": [{ "Item ID": "A1", "Quantity": 2 }] }));
    }

    #[test]
    fn test_unquoted_keys() {
        let value = parsed(r#"{items: [{Item ID: "A1", Unit Price: 10.5}]}"#);
        assert_eq!(value, json!({ "items": [{ "Item ID": "A1", "Unit Price": 10.5 }] }));
    }

    #[test]
    fn test_code_fence_with_prose() {
        let raw = "Here is the data:\n```json\n{\"items\": []}\n```\nLet me know if you need more.";
        assert_eq!(parsed(raw), json!({ "items": [] }));
    }

    #[test]
    fn test_unterminated_fence() {
        let raw = "```json\n{\"items\": [{\"Item ID\": \"B2\"}]}";
        assert_eq!(parsed(raw), json!({ "items": [{ "Item ID": "B2" }] }));
    }

    #[test]
    fn test_leading_prose() {
        let value = parsed(r#"ahmed {"1": "ahmed", "2": "fahad"}"#);
        assert_eq!(value, json!({ "1": "ahmed", "2": "fahad" }));
    }

    #[test]
    fn test_python_style_dict() {
        let value = parsed("{'items': [{'Item ID': 'A1', 'Note': None, 'Taxed': True}]}");
        assert_eq!(
            value,
            json!({ "items": [{ "Item ID": "A1", "Note": null, "Taxed": true }] })
        );
    }

    #[test]
    fn test_single_quoted_with_double_quote_inside() {
        let value = parsed(r#"{'Item Description': 'Screen 12" wide'}"#);
        assert_eq!(value["Item Description"], "Screen 12\" wide");
    }

    #[test]
    fn test_comments_are_dropped() {
        let raw = "{\n  // the table\n  \"items\": [ /* first row */ {\"Quantity\": 1}]\n}";
        assert_eq!(parsed(raw), json!({ "items": [{ "Quantity": 1 }] }));
    }

    #[test]
    fn test_raw_newline_in_string() {
        let value = parsed("{\"Item Description\": \"line one\nline two\"}");
        assert_eq!(value["Item Description"], "line one\nline two");
    }

    #[test]
    fn test_apostrophe_inside_single_quoted_value() {
        let value = parsed("{'Item Description': 'Men's shirt', 'Quantity': 2}");
        assert_eq!(value, json!({ "Item Description": "Men's shirt", "Quantity": 2 }));
    }

    #[test]
    fn test_bracketed_prose_before_items() {
        let raw = "Extracted [2 items] from the invoice:\n{\"items\": [{\"Item ID\": \"A1\", \"Quantity\": 2}]}";
        assert_eq!(
            parsed(raw),
            json!({ "items": [{ "Item ID": "A1", "Quantity": 2 }] })
        );
    }

    #[test]
    fn test_braced_prose_before_items() {
        let raw = "Note {see below}: {\"items\": [{\"Item ID\": \"A1\"}]}";
        assert_eq!(parsed(raw), json!({ "items": [{ "Item ID": "A1" }] }));
    }

    #[test]
    fn test_bracketed_prose_before_near_json_items() {
        let raw = "Extracted [2 items]:\n{items: [{'Item ID': 'A1'},],}";
        assert_eq!(parsed(raw), json!({ "items": [{ "Item ID": "A1" }] }));
    }

    #[test]
    fn test_earliest_value_wins_without_items() {
        // the inner object parses strictly, the whole only after repair
        let value = parsed("{\"a\": 1, \"b\": {\"c\": 2},}");
        assert_eq!(value, json!({ "a": 1, "b": { "c": 2 } }));
    }

    #[test]
    fn test_missing_commas() {
        let value = parsed("{\"a\": 1\n\"b\": [1 2 3]}");
        assert_eq!(value, json!({ "a": 1, "b": [1, 2, 3] }));
    }

    #[test]
    fn test_truncated_output_is_closed() {
        let value = parsed(r#"{"items": [{"Item ID": "A1", "Quantity": 2}, {"Item ID": "A2", "Item Desc"#);
        assert_eq!(
            value,
            json!({ "items": [{ "Item ID": "A1", "Quantity": 2 }, { "Item ID": "A2", "Item Desc": null }] })
        );
    }

    #[test]
    fn test_loose_numbers_and_bare_words() {
        let value = parsed("{price: +5, ratio: .5, currency: SAR}");
        assert_eq!(value, json!({ "price": 5.0, "ratio": 0.5, "currency": "SAR" }));
    }

    #[test]
    fn test_trailing_text_ignored() {
        let value = parsed("[1, 2] and that is all }");
        assert_eq!(value, json!([1, 2]));
    }

    #[test]
    fn test_prose_is_unparsable() {
        let raw = "I could not find any invoice table in this image.";
        assert_eq!(
            parse_model_output(raw),
            ParseOutcome::Unparsable { raw: raw.to_string() }
        );
    }

    #[test]
    fn test_braced_prose_is_unparsable() {
        assert!(matches!(
            parse_model_output("Sorry {no items} here"),
            ParseOutcome::Unparsable { .. }
        ));
    }

    #[test]
    fn test_empty_input_is_unparsable() {
        assert!(matches!(parse_model_output("   "), ParseOutcome::Unparsable { .. }));
    }

    #[test]
    fn test_scalar_is_not_accepted() {
        assert!(matches!(parse_model_output("42"), ParseOutcome::Unparsable { .. }));
    }
}
