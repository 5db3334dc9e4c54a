use std::sync::OnceLock;

use crate::loggable::{Literal, Loggable};

/// A log template bound to one call site.
///
/// The template's literal text is split around its `{}` placeholders the
/// first time the call site fires, and each non-empty piece is interned so
/// records carry only its address. The call site is a `static` created by
/// [`log!`](crate::log), so the split and the interning happen once.
#[derive(Debug)]
pub struct CallSite {
    template: &'static str,
    segments: OnceLock<Vec<Option<Literal>>>,
}

impl CallSite {
    pub const fn new(template: &'static str) -> Self {
        Self {
            template,
            segments: OnceLock::new(),
        }
    }

    pub fn template(&self) -> &'static str {
        self.template
    }

    /// Literal text around the placeholders: one more entry than there are
    /// placeholders, `None` where the text between them is empty.
    pub fn segments(&self) -> &[Option<Literal>] {
        self.segments.get_or_init(|| {
            split_template(self.template)
                .into_iter()
                .map(|text| (!text.is_empty()).then(|| Literal::new(&text)))
                .collect()
        })
    }

    /// Fields of one record: each argument preceded by the literal text before it.
    pub fn interleave<'a>(&'a self, args: &[&'a dyn Loggable]) -> Vec<&'a dyn Loggable> {
        let segments = self.segments();
        let mut fields: Vec<&dyn Loggable> = Vec::with_capacity(segments.len() + args.len());
        for (index, segment) in segments.iter().enumerate() {
            if let Some(literal) = segment {
                fields.push(literal);
            }
            if let Some(arg) = args.get(index) {
                fields.push(*arg);
            }
        }
        fields
    }
}

/// Splits a template on `{}` and resolves `{{` / `}}` escapes.
fn split_template(template: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match (c, chars.peek()) {
            ('{', Some('{')) | ('}', Some('}')) => {
                current.push(c);
                chars.next();
            }
            ('{', Some('}')) => {
                chars.next();
                segments.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    segments.push(current);
    segments
}

// Helper functions for compile-time template analysis
#[doc(hidden)]
pub const fn validate_format(s: &str) -> bool {
    let bytes = s.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'{' => {
                if i + 1 < bytes.len() && (bytes[i + 1] == b'{' || bytes[i + 1] == b'}') {
                    i += 2;
                    continue;
                }
                return false; // Only `{}` placeholders are supported
            }
            b'}' => {
                if i + 1 < bytes.len() && bytes[i + 1] == b'}' {
                    i += 2;
                    continue;
                }
                return false; // Unmatched closing brace
            }
            _ => {}
        }
        i += 1;
    }
    true
}

#[doc(hidden)]
pub const fn count_placeholders(s: &str) -> usize {
    let bytes = s.as_bytes();
    let mut i = 0;
    let mut count = 0;

    while i + 1 < bytes.len() {
        match (bytes[i], bytes[i + 1]) {
            (b'{', b'{') | (b'}', b'}') => i += 2,
            (b'{', b'}') => {
                count += 1;
                i += 2;
            }
            _ => i += 1,
        }
    }
    count
}
