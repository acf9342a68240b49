//! Line cleaning and tokenising shared by zone and step-size files.

/// Strips a trailing `//` comment and surrounding whitespace. Returns `None`
/// for lines that carry nothing (blank, or a `/`-leading comment line).
pub fn clean_line(raw: &str) -> Option<&str> {
    let without_comment = match raw.find("//") {
        Some(index) => &raw[..index],
        None => raw,
    };
    let line = without_comment.trim();

    if line.is_empty() || line.starts_with('/') {
        None
    } else {
        Some(line)
    }
}

/// Splits a cleaned line into tokens.
///
/// Whitespace separates tokens. A double-quoted run is one token with the
/// quotes removed. A `(...)` group is one token with its inner whitespace
/// dropped, so `( 0.1, 0.2 )` becomes `(0.1,0.2)`. The square and curly
/// brackets always stand alone so value and color spans can be located by
/// token.
pub fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' => {
                flush(&mut current, &mut tokens);
                let mut quoted = String::new();
                for inner in chars.by_ref() {
                    if inner == '"' {
                        break;
                    }
                    quoted.push(inner);
                }
                tokens.push(quoted);
            }
            '(' => {
                flush(&mut current, &mut tokens);
                let mut group = String::from("(");
                for inner in chars.by_ref() {
                    if !inner.is_whitespace() {
                        group.push(inner);
                    }
                    if inner == ')' {
                        break;
                    }
                }
                tokens.push(group);
            }
            '[' | ']' | '{' | '}' => {
                flush(&mut current, &mut tokens);
                tokens.push(ch.to_string());
            }
            c if c.is_whitespace() => flush(&mut current, &mut tokens),
            c => current.push(c),
        }
    }

    flush(&mut current, &mut tokens);
    tokens
}

fn flush(current: &mut String, tokens: &mut Vec<String>) {
    if !current.is_empty() {
        tokens.push(std::mem::take(current));
    }
}

/// Replaces every `|` channel wildcard with `channel`.
pub fn expand_wildcard(text: &str, channel: u32) -> String {
    if text.contains('|') {
        text.replace('|', &channel.to_string())
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_comments_and_blank_lines() {
        assert_eq!(clean_line("  Play Play // transport\r"), Some("Play Play"));
        assert_eq!(clean_line("\t\t"), None);
        assert_eq!(clean_line("/ disabled"), None);
        assert_eq!(clean_line("// only a comment"), None);
    }

    #[test]
    fn splits_on_whitespace_and_tabs() {
        assert_eq!(tokenize("Zone\tHome  Main"), vec!["Zone", "Home", "Main"]);
    }

    #[test]
    fn keeps_quoted_names_together() {
        assert_eq!(
            tokenize(r#"Zone "VST: ReaComp (Cockos)" Comp"#),
            vec!["Zone", "VST: ReaComp (Cockos)", "Comp"]
        );
    }

    #[test]
    fn brackets_stand_alone_and_groups_stay_atomic() {
        assert_eq!(
            tokenize("Rotary1 FXParam 3 [0.0 ( 0.1, 0.2 ) 0.0>1.0]{ #FF0000 }"),
            vec![
                "Rotary1", "FXParam", "3", "[", "0.0", "(0.1,0.2)", "0.0>1.0", "]", "{",
                "#FF0000", "}"
            ]
        );
    }

    #[test]
    fn wildcard_expansion_replaces_every_pipe() {
        assert_eq!(expand_wildcard("Fader|", 3), "Fader3");
        assert_eq!(expand_wildcard("Send|A|", 2), "Send2A2");
        assert_eq!(expand_wildcard("Play", 2), "Play");
    }
}
