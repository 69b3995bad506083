// src/prompts/template.rs — `{{name}}` substitution
//
// Single left-to-right pass. A placeholder is replaced only when the context
// holds a *string* under that name; anything else (missing, number, bool,
// object) leaves the placeholder literally in place. Substituted text is
// never re-scanned.

use super::Context;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

pub fn render_template(template: &str, context: &Context) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find(OPEN) {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + OPEN.len()..];

        let Some(end) = after_open.find(CLOSE) else {
            out.push_str(&rest[start..]);
            return out;
        };

        let name = &after_open[..end];
        match context.get(name).and_then(|v| v.as_str()) {
            Some(value) if is_placeholder_name(name) => out.push_str(value),
            _ => {
                out.push_str(OPEN);
                out.push_str(name);
                out.push_str(CLOSE);
            }
        }
        rest = &after_open[end + CLOSE.len()..];
    }

    out.push_str(rest);
    out
}

/// Placeholder names referenced by a template, in order of appearance.
pub fn placeholders(template: &str) -> Vec<&str> {
    let mut names = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find(OPEN) {
        let after_open = &rest[start + OPEN.len()..];
        let Some(end) = after_open.find(CLOSE) else {
            break;
        };
        let name = &after_open[..end];
        if is_placeholder_name(name) {
            names.push(name);
        }
        rest = &after_open[end + CLOSE.len()..];
    }
    names
}

pub fn references(template: &str, name: &str) -> bool {
    placeholders(template).contains(&name)
}

fn is_placeholder_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(OPEN) && !name.contains(char::is_whitespace)
}
