//! Document type declarations and entity references.
//!
//! Only the internal subset is read, and only for what the parser acts on: general
//! entity declarations with literal values and the set of declared element types.
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Default)]
pub(crate) struct DocType {
    pub name: String,
    pub entities: HashMap<String, String>,
    pub elements: HashSet<String>,
}

impl DocType {
    /// Parse the body of `<!DOCTYPE ...>` as delivered by the reader.
    pub fn parse(body: &str) -> Self {
        let body = body.trim_start();
        let name_end = body.find(|c: char| c.is_whitespace() || c == '[').unwrap_or(body.len());
        let mut doctype = DocType { name: body[..name_end].to_string(), ..Default::default() };
        let subset = match (body.find('['), body.rfind(']')) {
            (Some(start), Some(end)) if start < end => &body[start + 1..end],
            _ => "",
        };
        let mut rest = subset;
        while let Some(pos) = rest.find("<!") {
            rest = &rest[pos + 2..];
            if let Some(decl) = rest.strip_prefix("ENTITY") {
                doctype.read_entity(decl);
            } else if let Some(decl) = rest.strip_prefix("ELEMENT") {
                let name: String = decl.trim_start().chars().take_while(|c| !c.is_whitespace() && *c != '>').collect();
                if !name.is_empty() {
                    doctype.elements.insert(name);
                }
            }
        }
        doctype
    }

    fn read_entity(&mut self, decl: &str) {
        let decl = decl.trim_start();
        // Parameter entities only matter inside the DTD itself.
        if decl.starts_with('%') {
            return;
        }
        let name_end = decl.find(char::is_whitespace).unwrap_or(decl.len());
        let name = &decl[..name_end];
        let after = decl[name_end..].trim_start();
        let Some(quote) = after.chars().next().filter(|c| *c == '"' || *c == '\'') else {
            // External entity (SYSTEM/PUBLIC); left to the entity resolver.
            return;
        };
        let Some(len) = after[1..].find(quote) else { return };
        let literal = &after[1..1 + len];
        let value = expand_references(literal, |r| builtin_reference(r).map(String::from))
            .unwrap_or_else(|_| literal.to_string());
        // The first declaration of an entity is binding.
        self.entities.entry(name.to_string()).or_insert(value);
    }

    pub fn declares_elements(&self) -> bool {
        !self.elements.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ReferenceError {
    Undeclared(String),
    Unterminated,
}

/// Character references and the five predefined entities.
pub(crate) fn builtin_reference(name: &str) -> Option<char> {
    match name {
        "lt" => Some('<'),
        "gt" => Some('>'),
        "amp" => Some('&'),
        "apos" => Some('\''),
        "quot" => Some('"'),
        _ => {
            let digits = name.strip_prefix('#')?;
            let code = match digits.strip_prefix('x') {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => digits.parse::<u32>().ok()?,
            };
            char::from_u32(code).filter(|c| *c != '\0')
        }
    }
}

/// Replace every `&name;` in `raw` using `resolve`.
pub(crate) fn expand_references(
    raw: &str,
    mut resolve: impl FnMut(&str) -> Option<String>,
) -> Result<String, ReferenceError> {
    if !raw.contains('&') {
        return Ok(raw.to_string());
    }
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let after = &rest[amp + 1..];
        let semi = after.find(';').ok_or(ReferenceError::Unterminated)?;
        let name = &after[..semi];
        let replacement = resolve(name).ok_or_else(|| ReferenceError::Undeclared(name.to_string()))?;
        out.push_str(&replacement);
        rest = &after[semi + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

pub(crate) fn normalize_line_endings(text: &str) -> String {
    if text.contains('\r') { text.replace("\r\n", "\n").replace('\r', "\n") } else { text.to_string() }
}

/// Literal whitespace in attribute values becomes a space before references expand.
pub(crate) fn normalize_attribute_whitespace(raw: &str) -> String {
    normalize_line_endings(raw).replace(['\t', '\n'], " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn internal_subset_declarations() {
        let dt = DocType::parse(
            concat!(
                " doc [\n <!ELEMENT doc (#PCDATA)>\n",
                " <!ENTITY who \"world &#38; co\">\n <!ENTITY who 'ignored'>\n",
                " <!ENTITY % p \"x\">\n <!ENTITY ext SYSTEM \"ext.xml\">\n]",
            ),
        );
        assert_eq!(dt.name, "doc");
        assert!(dt.elements.contains("doc"));
        assert_eq!(dt.entities.get("who").map(String::as_str), Some("world & co"));
        assert!(!dt.entities.contains_key("p"));
        assert!(!dt.entities.contains_key("ext"));
    }

    #[rstest]
    fn doctype_without_subset() {
        let dt = DocType::parse(" html");
        assert_eq!(dt.name, "html");
        assert!(!dt.declares_elements());
    }

    #[rstest]
    #[case("lt", Some('<'))]
    #[case("#65", Some('A'))]
    #[case("#x263A", Some('\u{263A}'))]
    #[case("#0", None)]
    #[case("nbsp", None)]
    fn builtin_references(#[case] name: &str, #[case] expected: Option<char>) {
        assert_eq!(builtin_reference(name), expected);
    }

    #[rstest]
    fn expansion_reports_undeclared_names() {
        let resolve = |n: &str| builtin_reference(n).map(String::from);
        assert_eq!(expand_references("a &lt; b", resolve).unwrap(), "a < b");
        assert_eq!(expand_references("&nope;", resolve), Err(ReferenceError::Undeclared("nope".into())));
        assert_eq!(expand_references("a & b", resolve), Err(ReferenceError::Unterminated));
    }

    #[rstest]
    fn attribute_whitespace() {
        assert_eq!(normalize_attribute_whitespace("a\r\nb\tc"), "a b c");
    }
}
