//! Shallow JSON scanner and emitter for the wire envelope.
//!
//! The envelope schema is fixed and at most two levels deep, so this module
//! implements exactly what the wire needs: dotted-key lookup over nested
//! objects (`from.user`, `payload.message`), the standard escape set, and an
//! incremental object/array emitter. Call sites go through the typed
//! [`crate::envelope`] module, so a full parser could replace this without
//! touching them.

// ---------------------------------------------------------------------------
// Lookup
// ---------------------------------------------------------------------------

/// Look up a dotted key and return its decoded string value.
///
/// Returns `None` when the key is absent or the value is not a string.
pub fn get_string(doc: &str, key: &str) -> Option<String> {
    let raw = raw_value(doc, key)?;
    let bytes = raw.as_bytes();
    if bytes.first() != Some(&b'"') {
        return None;
    }
    let inner = &raw[1..raw.len() - 1];
    Some(unescape(inner))
}

/// Look up a dotted key and return its integer value.
pub fn get_int(doc: &str, key: &str) -> Option<i64> {
    let raw = raw_value(doc, key)?;
    raw.parse::<i64>().ok()
}

/// Look up a dotted key and return its boolean value.
pub fn get_bool(doc: &str, key: &str) -> Option<bool> {
    match raw_value(doc, key)? {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

/// Look up a dotted key and return the raw JSON text of its value.
///
/// The returned slice covers the whole value: quoted and escaped for
/// strings, brace-to-brace for objects, bracket-to-bracket for arrays.
pub fn raw_value<'a>(doc: &'a str, key: &str) -> Option<&'a str> {
    let mut current = doc;
    for segment in key.split('.') {
        current = member(current, segment)?;
    }
    Some(current)
}

/// Split the raw text of a JSON array into its top-level items.
///
/// Returns `None` when `raw` is not an array. Items are raw value slices,
/// suitable for feeding back into the lookup functions when they are objects.
pub fn array_items(raw: &str) -> Option<Vec<&str>> {
    let s = raw.as_bytes();
    let mut i = skip_ws(s, 0);
    if s.get(i) != Some(&b'[') {
        return None;
    }
    i += 1;
    let mut items = Vec::new();
    loop {
        i = skip_ws(s, i);
        match s.get(i)? {
            b']' => return Some(items),
            b',' => i += 1,
            _ => {
                let end = skip_value(s, i)?;
                items.push(raw[i..end].trim_end());
                i = end;
            }
        }
    }
}

/// Find a member by name in the top level of a JSON object and return the
/// raw text of its value.
fn member<'a>(obj: &'a str, name: &str) -> Option<&'a str> {
    let s = obj.as_bytes();
    let mut i = skip_ws(s, 0);
    if s.get(i) != Some(&b'{') {
        return None;
    }
    i += 1;
    loop {
        i = skip_ws(s, i);
        match s.get(i)? {
            b'}' => return None,
            b',' => i += 1,
            b'"' => {
                let key_end = string_end(s, i)?;
                let key_raw = &obj[i + 1..key_end - 1];
                let mut j = skip_ws(s, key_end);
                if s.get(j) != Some(&b':') {
                    return None;
                }
                j = skip_ws(s, j + 1);
                let value_end = skip_value(s, j)?;
                if key_raw == name {
                    return Some(obj[j..value_end].trim_end());
                }
                i = value_end;
            }
            _ => return None,
        }
    }
}

fn skip_ws(s: &[u8], mut i: usize) -> usize {
    while matches!(s.get(i), Some(b' ' | b'\t' | b'\n' | b'\r')) {
        i += 1;
    }
    i
}

/// Index one past the closing quote of the string starting at `i`.
fn string_end(s: &[u8], i: usize) -> Option<usize> {
    debug_assert_eq!(s.get(i), Some(&b'"'));
    let mut j = i + 1;
    loop {
        match s.get(j)? {
            b'\\' => j += 2,
            b'"' => return Some(j + 1),
            _ => j += 1,
        }
    }
}

/// Index one past the end of the value starting at `i`.
fn skip_value(s: &[u8], i: usize) -> Option<usize> {
    match s.get(i)? {
        b'"' => string_end(s, i),
        b'{' | b'[' => {
            let mut depth = 0usize;
            let mut j = i;
            loop {
                match s.get(j)? {
                    b'"' => j = string_end(s, j)?,
                    b'{' | b'[' => {
                        depth += 1;
                        j += 1;
                    }
                    b'}' | b']' => {
                        depth -= 1;
                        j += 1;
                        if depth == 0 {
                            return Some(j);
                        }
                    }
                    _ => j += 1,
                }
            }
        }
        _ => {
            // Number or literal: runs until a structural delimiter.
            let mut j = i;
            while let Some(c) = s.get(j) {
                if matches!(c, b',' | b'}' | b']' | b' ' | b'\t' | b'\n' | b'\r') {
                    break;
                }
                j += 1;
            }
            Some(j)
        }
    }
}

// ---------------------------------------------------------------------------
// Escaping
// ---------------------------------------------------------------------------

/// Escape a string for embedding in a JSON document.
///
/// Quotes, backslashes, and the named control characters use their two-byte
/// escapes; remaining control bytes become `\uXXXX`. Everything else,
/// including multi-byte UTF-8, passes through unchanged.
pub fn escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\u{8}' => out.push_str("\\b"),
            '\u{c}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out
}

/// Decode the escape sequences produced by [`escape`].
///
/// `\uXXXX` escapes decode to the named character when it is ASCII;
/// non-ASCII code points are approximated with `?`, which is all the host
/// MUDs' terminals can render anyway.
pub fn unescape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some('b') => out.push('\u{8}'),
            Some('f') => out.push('\u{c}'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                match u32::from_str_radix(&hex, 16) {
                    Ok(v) if v < 128 => out.push(char::from(v as u8)),
                    Ok(_) => out.push('?'),
                    Err(_) => {
                        out.push('u');
                        out.push_str(&hex);
                    }
                }
            }
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Emitter
// ---------------------------------------------------------------------------

/// Incremental JSON object emitter.
///
/// Field order is the insertion order, so emitted envelopes are byte-stable.
#[derive(Debug, Clone)]
pub struct ObjectBuilder {
    buf: String,
    first: bool,
}

impl ObjectBuilder {
    pub fn new() -> Self {
        Self {
            buf: String::from("{"),
            first: true,
        }
    }

    pub fn string(mut self, key: &str, value: &str) -> Self {
        self.key(key);
        self.buf.push('"');
        self.buf.push_str(&escape(value));
        self.buf.push('"');
        self
    }

    pub fn int(mut self, key: &str, value: i64) -> Self {
        self.key(key);
        self.buf.push_str(&value.to_string());
        self
    }

    pub fn bool(mut self, key: &str, value: bool) -> Self {
        self.key(key);
        self.buf.push_str(if value { "true" } else { "false" });
        self
    }

    /// Nest a finished sub-object under `key`.
    pub fn object(self, key: &str, nested: ObjectBuilder) -> Self {
        let raw = nested.finish();
        self.raw(key, &raw)
    }

    /// Insert pre-serialized JSON (an array or object) under `key`.
    pub fn raw(mut self, key: &str, raw: &str) -> Self {
        self.key(key);
        self.buf.push_str(raw);
        self
    }

    pub fn finish(mut self) -> String {
        self.buf.push('}');
        self.buf
    }

    fn key(&mut self, key: &str) {
        if !self.first {
            self.buf.push(',');
        }
        self.first = false;
        self.buf.push('"');
        self.buf.push_str(&escape(key));
        self.buf.push_str("\":");
    }
}

impl Default for ObjectBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Incremental JSON array emitter, for `payload.users` style lists.
#[derive(Debug, Clone)]
pub struct ArrayBuilder {
    buf: String,
    first: bool,
}

impl ArrayBuilder {
    pub fn new() -> Self {
        Self {
            buf: String::from("["),
            first: true,
        }
    }

    pub fn push_object(&mut self, item: ObjectBuilder) {
        self.separate();
        self.buf.push_str(&item.finish());
    }

    pub fn push_string(&mut self, item: &str) {
        self.separate();
        self.buf.push('"');
        self.buf.push_str(&escape(item));
        self.buf.push('"');
    }

    pub fn finish(mut self) -> String {
        self.buf.push(']');
        self.buf
    }

    fn separate(&mut self) {
        if !self.first {
            self.buf.push(',');
        }
        self.first = false;
    }
}

impl Default for ArrayBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_string_walks_dotted_keys() {
        let doc = r#"{"from":{"mud":"Beta","user":"Alice"},"type":"tell"}"#;
        assert_eq!(get_string(doc, "from.mud").as_deref(), Some("Beta"));
        assert_eq!(get_string(doc, "from.user").as_deref(), Some("Alice"));
        assert_eq!(get_string(doc, "type").as_deref(), Some("tell"));
        assert_eq!(get_string(doc, "from.missing"), None);
        assert_eq!(get_string(doc, "to.user"), None);
    }

    #[test]
    fn lookup_tolerates_whitespace() {
        let doc = "{ \"payload\" : { \"message\" : \"hi there\" ,\n\t\"code\" : 42 } }";
        assert_eq!(
            get_string(doc, "payload.message").as_deref(),
            Some("hi there")
        );
        assert_eq!(get_int(doc, "payload.code"), Some(42));
    }

    #[test]
    fn lookup_does_not_match_keys_in_nested_objects() {
        // "user" exists only inside "from"; a top-level lookup must miss it.
        let doc = r#"{"from":{"user":"Alice"},"tail":"x"}"#;
        assert_eq!(get_string(doc, "user"), None);
        assert_eq!(get_string(doc, "tail").as_deref(), Some("x"));
    }

    #[test]
    fn lookup_skips_braces_inside_string_values() {
        let doc = r#"{"a":"{\"user\":\"fake}","b":"real"}"#;
        assert_eq!(get_string(doc, "b").as_deref(), Some("real"));
        assert_eq!(get_string(doc, "user"), None);
    }

    #[test]
    fn get_int_and_bool() {
        let doc = r#"{"metadata":{"priority":5,"ttl":-1},"ok":true,"bad":false}"#;
        assert_eq!(get_int(doc, "metadata.priority"), Some(5));
        assert_eq!(get_int(doc, "metadata.ttl"), Some(-1));
        assert_eq!(get_bool(doc, "ok"), Some(true));
        assert_eq!(get_bool(doc, "bad"), Some(false));
        assert_eq!(get_int(doc, "ok"), None);
        assert_eq!(get_bool(doc, "metadata.priority"), None);
    }

    #[test]
    fn array_items_splits_objects_and_strings() {
        let doc = r#"{"payload":{"users":[{"name":"Bob"},{"name":"Carol"}],"tags":["a","b"]}}"#;
        let users = array_items(raw_value(doc, "payload.users").unwrap()).unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(get_string(users[1], "name").as_deref(), Some("Carol"));

        let tags = array_items(raw_value(doc, "payload.tags").unwrap()).unwrap();
        assert_eq!(tags, vec!["\"a\"", "\"b\""]);
    }

    #[test]
    fn escape_unescape_round_trips_control_and_quote_set() {
        let nasty = "say \"hi\"\\\n\r\t\u{8}\u{c}\u{1}\u{1f} done";
        assert_eq!(unescape(&escape(nasty)), nasty);
    }

    #[test]
    fn escape_matches_wire_forms() {
        assert_eq!(escape("a\"b"), "a\\\"b");
        assert_eq!(escape("line\nbreak"), "line\\nbreak");
        assert_eq!(escape("\u{1}"), "\\u0001");
    }

    #[test]
    fn unescape_approximates_non_ascii_unicode() {
        assert_eq!(unescape("caf\\u00e9"), "caf?");
        assert_eq!(unescape("ok\\u0041"), "okA");
    }

    #[test]
    fn builder_emits_parseable_nesting() {
        let doc = ObjectBuilder::new()
            .string("type", "tell")
            .object(
                "from",
                ObjectBuilder::new().string("mud", "Alpha").string("user", "Bob"),
            )
            .int("n", 7)
            .bool("flag", true)
            .finish();
        assert_eq!(get_string(&doc, "type").as_deref(), Some("tell"));
        assert_eq!(get_string(&doc, "from.user").as_deref(), Some("Bob"));
        assert_eq!(get_int(&doc, "n"), Some(7));
        assert_eq!(get_bool(&doc, "flag"), Some(true));
    }

    #[test]
    fn builder_escapes_string_values() {
        let doc = ObjectBuilder::new().string("m", "a\"b\nc").finish();
        assert_eq!(doc, "{\"m\":\"a\\\"b\\nc\"}");
        assert_eq!(get_string(&doc, "m").as_deref(), Some("a\"b\nc"));
    }

    #[test]
    fn emitted_json_is_valid_per_serde() {
        // serde_json as an independent referee for the emitter's output.
        let mut users = ArrayBuilder::new();
        users.push_object(ObjectBuilder::new().string("name", "Bob").int("level", 3));
        users.push_string("plain");
        let doc = ObjectBuilder::new()
            .string("kind", "who")
            .raw("users", &users.finish())
            .finish();
        let parsed: serde_json::Value = serde_json::from_str(&doc).expect("valid JSON");
        assert_eq!(parsed["users"][0]["name"], "Bob");
        assert_eq!(parsed["users"][1], "plain");
    }
}
