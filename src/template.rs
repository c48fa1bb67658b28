// SPDX-License-Identifier: Apache-2.0 OR MIT
// Positional templates: `{0}`, `{1}` ... with `{{` / `}}` escapes

use std::fmt::Write;

use crate::entry::{RenderBuffer, Value};

/// Handle to a template registered in a [`TemplateTable`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TemplateId(u32);

impl TemplateId {
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for TemplateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Pre-registered template texts
///
/// Built before the router starts and shared read-only afterwards.
#[derive(Debug, Default, Clone)]
pub struct TemplateTable {
    templates: Vec<String>,
}

impl TemplateTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_templates<I, S>(templates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            templates: templates.into_iter().map(Into::into).collect(),
        }
    }

    /// Register a template, returning its id (ids are dense, starting at 0)
    pub fn add(&mut self, text: impl Into<String>) -> TemplateId {
        self.templates.push(text.into());
        TemplateId((self.templates.len() - 1) as u32)
    }

    pub fn get(&self, id: TemplateId) -> Option<&str> {
        self.templates.get(id.index()).map(String::as_str)
    }

    /// Look up the id of an already registered template text
    pub fn find(&self, text: &str) -> Option<TemplateId> {
        self.templates
            .iter()
            .position(|t| t == text)
            .map(|i| TemplateId(i as u32))
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

/// Expand `template` into `buf`, substituting `{n}` with `arg(n)`
///
/// `{{` and `}}` produce literal braces. A placeholder whose argument is
/// missing is copied verbatim, as is any brace that does not start a
/// well-formed placeholder. Returns the number of bytes appended.
pub fn expand<'v>(
    template: &str,
    mut arg: impl FnMut(usize) -> Option<Value<'v>>,
    buf: &mut RenderBuffer,
) -> usize {
    let start_len = buf.len();
    let bytes = template.as_bytes();
    // Start of the literal run not yet copied
    let mut literal = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'{' | b'}' if bytes.get(i + 1) == Some(&bytes[i]) => {
                buf.push_str(&template[literal..=i]);
                i += 2;
                literal = i;
            }
            b'{' => {
                let digits = bytes[i + 1..]
                    .iter()
                    .take_while(|b| b.is_ascii_digit())
                    .count();
                let close = i + 1 + digits;
                if digits == 0 || bytes.get(close) != Some(&b'}') {
                    i += 1;
                    continue;
                }

                let value = template[i + 1..close].parse::<usize>().ok().and_then(&mut arg);
                if let Some(value) = value {
                    buf.push_str(&template[literal..i]);
                    write_value(buf, value);
                    literal = close + 1;
                }
                i = close + 1;
            }
            _ => i += 1,
        }
    }

    buf.push_str(&template[literal..]);
    buf.len() - start_len
}

#[inline]
fn write_value(buf: &mut RenderBuffer, value: Value<'_>) {
    match value {
        Value::Str(s) => buf.push_str(s),
        other => {
            let _ = write!(buf, "{}", other);
        }
    }
}
