//! Single-pass prompt-template substitution.

use std::collections::HashMap;

/// Render `{{placeholder}}` keys in a single pass.
///
/// Keys in `replacements` include their delimiters. One pass means a
/// substituted value can never introduce a placeholder that gets
/// substituted again. Unknown placeholders stay as-is.
pub fn render_single_pass(template: &str, replacements: &HashMap<String, String>) -> String {
    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        rendered.push_str(&rest[..start]);
        if let Some(end_offset) = rest[start..].find("}}") {
            let key = &rest[start..start + end_offset + 2];
            if let Some(value) = replacements.get(key) {
                rendered.push_str(value);
            } else {
                rendered.push_str(key);
            }
            rest = &rest[start + end_offset + 2..];
        } else {
            rendered.push_str(&rest[start..]);
            rest = "";
        }
    }
    rendered.push_str(rest);
    rendered
}
