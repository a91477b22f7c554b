//! Chat template text handling
//!
//! A resolved chat template is embedded in a YAML data config and then read
//! by a Jinja-based trainer, so it is escaped and wrapped before use.

/// Replace raw newlines inside single- or double-quoted segments with `\n`.
///
/// A segment closes at the next matching quote that is not preceded by a
/// backslash. An opening quote without a closing partner is left as is.
pub fn escape_newlines_in_quoted(template: &str) -> String {
    let chars: Vec<char> = template.chars().collect();
    let mut out = String::with_capacity(template.len());
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c == '"' || c == '\'' {
            if let Some(end) = closing_quote(&chars, i) {
                out.push(c);
                for &inner in &chars[i + 1..end] {
                    if inner == '\n' {
                        out.push_str("\\n");
                    } else {
                        out.push(inner);
                    }
                }
                out.push(c);
                i = end + 1;
                continue;
            }
        }
        out.push(c);
        i += 1;
    }
    out
}

fn closing_quote(chars: &[char], open: usize) -> Option<usize> {
    let quote = chars[open];
    (open + 1..chars.len()).find(|&j| chars[j] == quote && chars[j - 1] != '\\')
}

/// Protect a template from a second templating pass.
pub fn wrap_raw(template: &str) -> String {
    format!("{{% raw %}}\n{}\n{{% endraw %}}", template)
}
