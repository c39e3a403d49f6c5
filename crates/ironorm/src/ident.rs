//! Identifier wrapping (component B).
//!
//! An [`Identifier`] is a textual name that may carry dot-segments
//! (`schema.table.column`), an `as alias`, or the wildcard `*`. Quoting is
//! deferred to render time because the quote character is dialect-specific:
//! MySQL/MariaDB use back-ticks, PostgreSQL and SQLite use double quotes.
//! Both escape an embedded quote by doubling it.
//!
//! ```ignore
//! use ironorm::ident::{Dialect, Identifier};
//!
//! let id = Identifier::parse("public.users as u")?;
//! assert_eq!(id.wrap(Dialect::Pgsql), r#""public"."users" as "u""#);
//! assert_eq!(id.wrap(Dialect::MySql), "`public`.`users` as `u`");
//! # Ok::<(), ironorm::error::OrmError>(())
//! ```

use crate::error::{OrmError, OrmResult};

/// The three supported SQL dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    MySql,
    Pgsql,
    Sqlite,
}

impl Dialect {
    /// The character used to quote a single identifier segment.
    pub fn quote_char(self) -> char {
        match self {
            Dialect::MySql => '`',
            Dialect::Pgsql | Dialect::Sqlite => '"',
        }
    }
}

/// A single dot-segment or alias of an identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentPart {
    /// A bare name, to be quoted at render time: `[A-Za-z_][A-Za-z0-9_$]*`
    /// or the wildcard `*` (never quoted).
    Unquoted(String),
    /// A name the caller already wrapped in dialect quotes; passed through
    /// as literally given, including whatever escaping it already used.
    Quoted(String),
}

/// A wrappable SQL identifier: dot-segments plus an optional alias.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identifier {
    pub segments: Vec<IdentPart>,
    pub alias: Option<IdentPart>,
}

impl Identifier {
    pub fn quoted(name: &str) -> OrmResult<Self> {
        if name.is_empty() {
            return Err(OrmError::validation("empty quoted identifier"));
        }
        if name.contains('\0') {
            return Err(OrmError::validation("identifier cannot contain NUL"));
        }
        Ok(Self {
            segments: vec![IdentPart::Quoted(name.to_string())],
            alias: None,
        })
    }

    /// Parse `schema.table.column`, `"Quoted"."Segments"`, or either form
    /// followed by ` as alias` (case-insensitive, matched once).
    pub fn parse(s: &str) -> OrmResult<Self> {
        if s.is_empty() {
            return Err(OrmError::validation("identifier cannot be empty"));
        }
        if s.contains('\0') {
            return Err(OrmError::validation("identifier cannot contain NUL"));
        }

        let (main, alias) = split_as(s);
        let segments = parse_dotted(main)?;
        let alias = match alias {
            Some(a) => Some(parse_single(a)?),
            None => None,
        };
        Ok(Self { segments, alias })
    }

    /// Render for the given dialect: `"schema"."table" as "alias"`.
    pub fn wrap(&self, dialect: Dialect) -> String {
        let mut out = String::new();
        self.write_wrapped(&mut out, dialect);
        out
    }

    pub(crate) fn write_wrapped(&self, out: &mut String, dialect: Dialect) {
        for (i, part) in self.segments.iter().enumerate() {
            if i > 0 {
                out.push('.');
            }
            write_part(out, part, dialect);
        }
        if let Some(alias) = &self.alias {
            out.push_str(" as ");
            write_part(out, alias, dialect);
        }
    }

    /// Render as a table reference, applying `prefix` to the table segment
    /// (the first segment when unqualified, or — when an alias is present —
    /// prefixing the alias too, so callers can reference an aliased table
    /// consistently under the connection's configured prefix).
    pub fn wrap_table(&self, dialect: Dialect, prefix: &str) -> String {
        if prefix.is_empty() {
            return self.wrap(dialect);
        }
        let mut out = String::new();
        for (i, part) in self.segments.iter().enumerate() {
            if i > 0 {
                out.push('.');
            }
            if i == self.segments.len() - 1 {
                write_part(&mut out, &prefixed(part, prefix), dialect);
            } else {
                write_part(&mut out, part, dialect);
            }
        }
        if let Some(alias) = &self.alias {
            out.push_str(" as ");
            write_part(&mut out, &prefixed(alias, prefix), dialect);
        }
        out
    }

    /// The wrapped `as alias` part alone (no leading `as `), if present.
    pub fn wrap_alias(&self, dialect: Dialect) -> Option<String> {
        self.alias.as_ref().map(|alias| {
            let mut out = String::new();
            write_part(&mut out, alias, dialect);
            out
        })
    }

    /// The final segment, ignoring any alias (`unqualify`): `a.b.c` -> `c`.
    pub fn unqualify(&self) -> String {
        match self.segments.last() {
            Some(IdentPart::Unquoted(s)) => s.clone(),
            Some(IdentPart::Quoted(s)) => s.clone(),
            None => String::new(),
        }
    }
}

fn prefixed(part: &IdentPart, prefix: &str) -> IdentPart {
    match part {
        IdentPart::Unquoted(s) if s == "*" => IdentPart::Unquoted(s.clone()),
        IdentPart::Unquoted(s) => IdentPart::Unquoted(format!("{prefix}{s}")),
        IdentPart::Quoted(s) => IdentPart::Quoted(format!("{prefix}{s}")),
    }
}

fn write_part(out: &mut String, part: &IdentPart, dialect: Dialect) {
    match part {
        IdentPart::Unquoted(s) if s == "*" => out.push('*'),
        IdentPart::Unquoted(s) => {
            let q = dialect.quote_char();
            out.push(q);
            out.push_str(s);
            out.push(q);
        }
        IdentPart::Quoted(s) => {
            let q = dialect.quote_char();
            out.push(q);
            for ch in s.chars() {
                if ch == q {
                    out.push(q);
                    out.push(q);
                } else {
                    out.push(ch);
                }
            }
            out.push(q);
        }
    }
}

/// Split on the first ` as ` (case-insensitive), outside of quotes.
fn split_as(s: &str) -> (&str, Option<&str>) {
    let bytes = s.as_bytes();
    let mut in_quote: Option<char> = None;
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        match in_quote {
            Some(q) if c == q => in_quote = None,
            Some(_) => {}
            None if c == '"' || c == '`' => in_quote = Some(c),
            None => {
                if (c == ' ' || c == '\t') && s[i..].len() >= 4 {
                    let rest = &s[i..];
                    if rest.len() >= 4 && rest[1..3].eq_ignore_ascii_case("as") {
                        let after = rest.as_bytes().get(3);
                        if after == Some(&b' ') || after == Some(&b'\t') {
                            let main = &s[..i];
                            let alias = rest[4..].trim_start();
                            if !main.trim().is_empty() && !alias.trim().is_empty() {
                                return (main.trim_end(), Some(alias));
                            }
                        }
                    }
                }
            }
        }
        i += 1;
    }
    (s, None)
}

fn parse_dotted(s: &str) -> OrmResult<Vec<IdentPart>> {
    if s == "*" {
        return Ok(vec![IdentPart::Unquoted("*".to_string())]);
    }
    let mut parts = Vec::new();
    let mut chars = s.chars().peekable();

    while chars.peek().is_some() {
        if !parts.is_empty() {
            match chars.next() {
                Some('.') => {
                    if chars.peek().is_none() {
                        return Err(OrmError::validation("trailing '.' in identifier"));
                    }
                }
                Some(c) => {
                    return Err(OrmError::validation(format!(
                        "expected '.' between identifier parts, got '{c}'"
                    )));
                }
                None => break,
            }
        }

        if chars.peek() == Some(&'"') || chars.peek() == Some(&'`') {
            let quote = chars.next().unwrap();
            let mut name = String::new();
            loop {
                match chars.next() {
                    Some(c) if c == quote => {
                        if chars.peek() == Some(&quote) {
                            chars.next();
                            name.push(quote);
                        } else {
                            break;
                        }
                    }
                    Some(c) => name.push(c),
                    None => return Err(OrmError::validation("unclosed quoted identifier")),
                }
            }
            if name.is_empty() {
                return Err(OrmError::validation("empty quoted identifier"));
            }
            parts.push(IdentPart::Quoted(name));
            continue;
        }

        if chars.peek() == Some(&'*') {
            chars.next();
            parts.push(IdentPart::Unquoted("*".to_string()));
            continue;
        }

        let mut name = String::new();
        while let Some(&c) = chars.peek() {
            if c == '.' {
                break;
            }
            if name.is_empty() {
                if c == '_' || c.is_ascii_alphabetic() {
                    name.push(c);
                    chars.next();
                } else {
                    return Err(OrmError::validation(format!(
                        "invalid identifier start character: '{c}'"
                    )));
                }
            } else if c == '_' || c == '$' || c.is_ascii_alphanumeric() {
                name.push(c);
                chars.next();
            } else {
                return Err(OrmError::validation(format!(
                    "invalid character in identifier: '{c}'"
                )));
            }
        }
        if name.is_empty() {
            return Err(OrmError::validation("empty identifier segment"));
        }
        parts.push(IdentPart::Unquoted(name));
    }

    if parts.is_empty() {
        return Err(OrmError::validation("empty identifier"));
    }
    Ok(parts)
}

fn parse_single(s: &str) -> OrmResult<IdentPart> {
    let parts = parse_dotted(s)?;
    if parts.len() != 1 {
        return Err(OrmError::validation("alias cannot contain '.'"));
    }
    Ok(parts.into_iter().next().unwrap())
}

/// Join already-wrapped column fragments with `, ` (`columnize`).
pub fn columnize(cols: &[String]) -> String {
    cols.join(", ")
}

/// Wrap every identifier in `cols` for `dialect` (`wrapArray`).
pub fn wrap_array(cols: &[Identifier], dialect: Dialect) -> OrmResult<Vec<String>> {
    Ok(cols.iter().map(|c| c.wrap(dialect)).collect())
}

/// Quote a string literal: wraps in `'...'`, doubling embedded quotes.
pub fn quote_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for ch in s.chars() {
        if ch == '\'' {
            out.push('\'');
            out.push('\'');
        } else {
            out.push(ch);
        }
    }
    out.push('\'');
    out
}

/// Join placeholder markers with `, ` (`parametrize`): `?, ?, ?`.
pub fn parametrize(count: usize) -> String {
    std::iter::repeat_n("?", count)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Convert an input into an [`Identifier`].
pub trait IntoIdentifier {
    fn into_identifier(self) -> OrmResult<Identifier>;
}

impl IntoIdentifier for Identifier {
    fn into_identifier(self) -> OrmResult<Identifier> {
        Ok(self)
    }
}

impl IntoIdentifier for &Identifier {
    fn into_identifier(self) -> OrmResult<Identifier> {
        Ok(self.clone())
    }
}

impl IntoIdentifier for &str {
    fn into_identifier(self) -> OrmResult<Identifier> {
        Identifier::parse(self)
    }
}

impl IntoIdentifier for String {
    fn into_identifier(self) -> OrmResult<Identifier> {
        Identifier::parse(&self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_simple_per_dialect() {
        let id = Identifier::parse("torrents").unwrap();
        assert_eq!(id.wrap(Dialect::MySql), "`torrents`");
        assert_eq!(id.wrap(Dialect::Pgsql), r#""torrents""#);
        assert_eq!(id.wrap(Dialect::Sqlite), r#""torrents""#);
    }

    #[test]
    fn wraps_dotted() {
        let id = Identifier::parse("public.users").unwrap();
        assert_eq!(id.wrap(Dialect::Pgsql), r#""public"."users""#);
    }

    #[test]
    fn wraps_with_alias() {
        let id = Identifier::parse("public.users as u").unwrap();
        assert_eq!(id.wrap(Dialect::Pgsql), r#""public"."users" as "u""#);
    }

    #[test]
    fn wildcard_passes_through() {
        let id = Identifier::parse("*").unwrap();
        assert_eq!(id.wrap(Dialect::MySql), "*");
        let id2 = Identifier::parse("users.*").unwrap();
        assert_eq!(id2.wrap(Dialect::Pgsql), r#""users".*"#);
    }

    #[test]
    fn table_prefix_applies_to_table_segment_only() {
        let id = Identifier::parse("public.users").unwrap();
        assert_eq!(
            id.wrap_table(Dialect::Pgsql, "wp_"),
            r#""public"."wp_users""#
        );
    }

    #[test]
    fn table_prefix_applies_to_alias_when_present() {
        let id = Identifier::parse("users as u").unwrap();
        assert_eq!(
            id.wrap_table(Dialect::Pgsql, "wp_"),
            r#""wp_users" as "wp_u""#
        );
    }

    #[test]
    fn unqualify_takes_last_segment() {
        let id = Identifier::parse("schema.table.column").unwrap();
        assert_eq!(id.unqualify(), "column");
    }

    #[test]
    fn quote_string_escapes_embedded_quote() {
        assert_eq!(quote_string("it's"), "'it''s'");
    }

    #[test]
    fn rejects_empty_and_malformed() {
        assert!(Identifier::parse("").is_err());
        assert!(Identifier::parse("1table").is_err());
        assert!(Identifier::parse("my table").is_err());
        assert!(Identifier::parse("schema..table").is_err());
        assert!(Identifier::parse("schema.").is_err());
        assert!(Identifier::parse(r#""unclosed"#).is_err());
    }

    #[test]
    fn mysql_escapes_backtick_by_doubling() {
        let id = Identifier::quoted("has`tick").unwrap();
        assert_eq!(id.wrap(Dialect::MySql), "`has``tick`");
    }
}
