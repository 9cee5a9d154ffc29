use std::collections::BTreeMap;

use crate::error::{Result, SyncError};

/// Expand `{name}` placeholders from `vars`. `{{` and `}}` emit literal braces.
pub fn expand(tpl: &str, vars: &BTreeMap<String, String>) -> Result<String> {
    let mut out = String::with_capacity(tpl.len());
    let mut chars = tpl.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(ch) => name.push(ch),
                        None => {
                            return Err(SyncError::Template(format!(
                                "unclosed placeholder in {tpl:?}"
                            )));
                        }
                    }
                }
                let v = vars.get(&name).ok_or_else(|| {
                    SyncError::Template(format!("unknown placeholder {{{name}}} in {tpl:?}"))
                })?;
                out.push_str(v);
            }
            '}' => {
                return Err(SyncError::Template(format!(
                    "single '}}' in {tpl:?}"
                )));
            }
            _ => out.push(c),
        }
    }
    Ok(out)
}
