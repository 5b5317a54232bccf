//! Line tokenizer for traditional (`G1 X10`) and extended
//! (`SET_LED LED=chamber RED=1`) G-code.

use std::collections::BTreeMap;

use super::{CommandError, CommandKind, GCodeCommand};

/// Split a multi-line script into non-empty lines.
pub fn script_lines(script: &str) -> impl Iterator<Item = &str> {
    script.lines().map(str::trim).filter(|l| !l.is_empty())
}

/// Parse a single line. Blank lines and pure comments yield `None`.
pub fn parse_line(line: &str) -> Result<Option<GCodeCommand>, CommandError> {
    let body = strip_checksum(strip_line_number(strip_comment(line).trim()));
    if body.is_empty() {
        return Ok(None);
    }

    let (command, parameters) = if let Some(split) = traditional_split(body) {
        let (name, rest) = body.split_at(split);
        (normalize_traditional(name), parse_words(rest))
    } else {
        let end = body.find(char::is_whitespace).unwrap_or(body.len());
        let (name, rest) = body.split_at(end);
        (name.to_ascii_uppercase(), parse_key_values(rest, body)?)
    };

    Ok(Some(GCodeCommand {
        kind: CommandKind::from_name(&command),
        command,
        parameters,
        raw: body.to_string(),
    }))
}

fn strip_comment(line: &str) -> &str {
    let mut in_quotes = false;
    for (i, c) in line.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ';' if !in_quotes => return &line[..i],
            _ => {}
        }
    }
    line
}

fn strip_line_number(line: &str) -> &str {
    let bytes = line.as_bytes();
    if bytes.len() > 1 && (bytes[0] == b'N' || bytes[0] == b'n') && bytes[1].is_ascii_digit() {
        let end = line[1..]
            .find(|c: char| !c.is_ascii_digit())
            .map_or(line.len(), |i| i + 1);
        return line[end..].trim_start();
    }
    line
}

fn strip_checksum(line: &str) -> &str {
    match line.rfind('*') {
        Some(i) if i + 1 < line.len() && line[i + 1..].bytes().all(|b| b.is_ascii_digit()) => line[..i].trim_end(),
        _ => line,
    }
}

/// For `G1 X10` or `g1x10`, the byte index where the command word ends.
fn traditional_split(body: &str) -> Option<usize> {
    let bytes = body.as_bytes();
    if bytes.len() < 2 || !matches!(bytes[0].to_ascii_uppercase(), b'G' | b'M' | b'T') || !bytes[1].is_ascii_digit() {
        return None;
    }
    let mut end = 1;
    while end < bytes.len() && (bytes[end].is_ascii_digit() || bytes[end] == b'.') {
        end += 1;
    }
    // SET_... style names never start with a letter-digit pair, but a
    // trailing underscore would mean an extended name like "M1_FOO".
    if end < bytes.len() && bytes[end] == b'_' {
        return None;
    }
    Some(end)
}

/// "g01" -> "G1", "M104" stays.
fn normalize_traditional(name: &str) -> String {
    let letter = name[..1].to_ascii_uppercase();
    let number = &name[1..];
    match number.parse::<u32>() {
        Ok(n) => format!("{}{}", letter, n),
        Err(_) => format!("{}{}", letter, number),
    }
}

fn parse_words(rest: &str) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();
    let chars: Vec<char> = rest.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if !c.is_ascii_alphabetic() {
            i += 1;
            continue;
        }
        let letter = c.to_ascii_uppercase();
        i += 1;
        let mut j = i;
        while j < chars.len() && chars[j] == ' ' {
            j += 1;
        }
        let start = j;
        while j < chars.len() && (chars[j].is_ascii_digit() || matches!(chars[j], '.' | '-' | '+')) {
            j += 1;
        }
        let value: String = chars[start..j].iter().collect();
        if !value.is_empty() {
            i = j;
        }
        params.insert(letter.to_string(), value);
    }
    params
}

fn parse_key_values(rest: &str, body: &str) -> Result<BTreeMap<String, String>, CommandError> {
    let mut params = BTreeMap::new();
    let mut chars = rest.chars().peekable();
    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        if chars.peek().is_none() {
            break;
        }
        let mut key = String::new();
        while let Some(&c) = chars.peek() {
            if c == '=' || c.is_whitespace() {
                break;
            }
            key.push(c);
            chars.next();
        }
        if chars.peek() != Some(&'=') {
            // Bare token without a value, e.g. "EXCLUDE_OBJECT foo".
            tracing::debug!("Ignoring bare token '{}' in '{}'", key, body);
            continue;
        }
        chars.next();
        let mut value = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            let mut closed = false;
            for c in chars.by_ref() {
                if c == '"' {
                    closed = true;
                    break;
                }
                value.push(c);
            }
            if !closed {
                return Err(CommandError::Malformed(body.to_string()));
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                value.push(c);
                chars.next();
            }
        }
        params.insert(key.to_ascii_uppercase(), value);
    }
    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> GCodeCommand {
        parse_line(line).unwrap().unwrap()
    }

    #[test]
    fn test_traditional_words() {
        let cmd = parse("G1 X10.5 Y-3 F3000");
        assert_eq!(cmd.kind, CommandKind::LinearMove);
        assert_eq!(cmd.get_f64("X").unwrap(), Some(10.5));
        assert_eq!(cmd.get_f64("Y").unwrap(), Some(-3.0));
        assert_eq!(cmd.get_f64("F").unwrap(), Some(3000.0));
    }

    #[test]
    fn test_axis_letters_are_case_insensitive_and_may_be_spaced() {
        let cmd = parse("g1 x 10 y20");
        assert_eq!(cmd.command, "G1");
        assert_eq!(cmd.get_f64("X").unwrap(), Some(10.0));
        assert_eq!(cmd.get_f64("Y").unwrap(), Some(20.0));
    }

    #[test]
    fn test_glued_words_and_leading_zero() {
        let cmd = parse("G01X5Z0.2");
        assert_eq!(cmd.command, "G1");
        assert_eq!(cmd.get_f64("X").unwrap(), Some(5.0));
        assert_eq!(cmd.get_f64("Z").unwrap(), Some(0.2));
    }

    #[test]
    fn test_bare_axis_flags() {
        let cmd = parse("G28 X Y");
        assert_eq!(cmd.kind, CommandKind::Home);
        assert!(cmd.has("X"));
        assert!(cmd.has("Y"));
        assert!(!cmd.has("Z"));
        assert_eq!(cmd.get_f64("X").unwrap(), None);
    }

    #[test]
    fn test_extended_with_quotes() {
        let cmd = parse("set_led led=\"chamber light\" RED=0.5 green=1");
        assert_eq!(cmd.kind, CommandKind::SetLed);
        assert_eq!(cmd.get_str("LED"), Some("chamber light"));
        assert_eq!(cmd.get_f64("RED").unwrap(), Some(0.5));
        assert_eq!(cmd.get_f64("GREEN").unwrap(), Some(1.0));
    }

    #[test]
    fn test_exclude_object_names_do_not_collide() {
        assert_eq!(parse("EXCLUDE_OBJECT NAME=Part_1").kind, CommandKind::ExcludeObject);
        assert_eq!(parse("EXCLUDE_OBJECT_DEFINE NAME=Part_1").kind, CommandKind::ExcludeObjectDefine);
        assert_eq!(parse("EXCLUDE_OBJECT_START NAME=Part_1").kind, CommandKind::ExcludeObjectStart);
        assert_eq!(parse("PAUSE_MACRO").kind, CommandKind::Unknown);
    }

    #[test]
    fn test_comments_line_numbers_and_checksums() {
        assert_eq!(parse_line("; just a comment").unwrap(), None);
        assert_eq!(parse_line("   ").unwrap(), None);
        let cmd = parse("N42 G1 X1*91 ; move");
        assert_eq!(cmd.command, "G1");
        assert_eq!(cmd.get_f64("X").unwrap(), Some(1.0));
        let quoted = parse("EXCLUDE_OBJECT NAME=\"a;b\"");
        assert_eq!(quoted.get_str("NAME"), Some("a;b"));
    }

    #[test]
    fn test_bad_numbers_and_quotes_rejected() {
        let cmd = parse("G1 X1.2.3");
        assert!(matches!(cmd.get_f64("X"), Err(CommandError::InvalidNumber { .. })));
        let cmd = parse("SET_HEATER_TEMPERATURE HEATER=extruder TARGET=hot");
        assert!(matches!(cmd.get_f64("TARGET"), Err(CommandError::InvalidNumber { .. })));
        let cmd = parse("SET_HEATER_TEMPERATURE HEATER=extruder TARGET=nan");
        assert!(cmd.get_f64("TARGET").is_err());
        assert!(matches!(
            parse_line("SET_LED LED=\"unterminated"),
            Err(CommandError::Malformed(_))
        ));
    }

    #[test]
    fn test_script_lines() {
        let lines: Vec<&str> = script_lines("G28\n\n  G1 X10  \nM84").collect();
        assert_eq!(lines, vec!["G28", "G1 X10", "M84"]);
    }
}
