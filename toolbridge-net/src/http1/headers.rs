/// Headers whose values are kept whole even when they contain commas.
const UNSPLIT_HEADERS: &[&str] = &[
    "authorization",
    "content-disposition",
    "content-type",
    "cookie",
    "date",
    "expires",
    "host",
    "if-modified-since",
    "if-range",
    "if-unmodified-since",
    "last-modified",
    "proxy-authorization",
    "referer",
    "retry-after",
    "set-cookie",
    "user-agent",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderEntry {
    pub name: String,
    pub values: Vec<String>,
}

/// Ordered, case-insensitive multi-map of header names to values.
///
/// Entries keep the position of the first occurrence of their name. Values
/// added through [`HeaderCollection::append`] are split on top-level commas
/// unless the header is one that is never split (`Cookie`, `Host`, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderCollection {
    entries: Vec<HeaderEntry>,
}

impl HeaderCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HeaderEntry> {
        self.entries.iter()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.position(name)
            .map(|index| self.entries[index].values.as_slice())
    }

    pub fn get_first(&self, name: &str) -> Option<&str> {
        self.get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    pub fn get_joined(&self, name: &str) -> Option<String> {
        self.get(name).map(|values| values.join(","))
    }

    /// True when any value of `name` equals `token`, ignoring ASCII case.
    pub fn contains_token(&self, name: &str, token: &str) -> bool {
        self.get(name).is_some_and(|values| {
            values.iter().any(|value| {
                value
                    .split(',')
                    .any(|part| part.trim().eq_ignore_ascii_case(token))
            })
        })
    }

    pub fn append(&mut self, name: &str, value: &str) {
        let values = if is_unsplit(name) {
            vec![value.trim().to_string()]
        } else {
            split_values(value)
        };
        match self.position(name) {
            Some(index) => self.entries[index].values.extend(values),
            None => self.entries.push(HeaderEntry {
                name: name.to_string(),
                values,
            }),
        }
    }

    /// Replaces every value of `name` with `value`, verbatim.
    pub fn set(&mut self, name: &str, value: &str) {
        match self.position(name) {
            Some(index) => self.entries[index].values = vec![value.to_string()],
            None => self.entries.push(HeaderEntry {
                name: name.to_string(),
                values: vec![value.to_string()],
            }),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Vec<String>> {
        let index = self.position(name)?;
        Some(self.entries.remove(index).values)
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.name.eq_ignore_ascii_case(name))
    }
}

fn is_unsplit(name: &str) -> bool {
    UNSPLIT_HEADERS
        .iter()
        .any(|candidate| candidate.eq_ignore_ascii_case(name))
}

/// Splits on commas that are not inside a quoted string. Empty elements are
/// dropped, but a value that is empty as a whole stays a single empty value.
fn split_values(value: &str) -> Vec<String> {
    let mut values = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    let mut escaped = false;

    for (index, byte) in value.bytes().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match byte {
            b'\\' if quoted => escaped = true,
            b'"' => quoted = !quoted,
            b',' if !quoted => {
                push_trimmed(&mut values, &value[start..index]);
                start = index + 1;
            }
            _ => {}
        }
    }
    push_trimmed(&mut values, &value[start..]);

    if values.is_empty() {
        values.push(String::new());
    }
    values
}

fn push_trimmed(values: &mut Vec<String>, part: &str) {
    let part = part.trim();
    if !part.is_empty() {
        values.push(part.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::HeaderCollection;

    #[test]
    fn splits_on_top_level_commas() {
        let mut headers = HeaderCollection::new();
        headers.append("Accept", "text/html, application/json ,*/*");

        assert_eq!(
            headers.get("accept").unwrap(),
            &["text/html", "application/json", "*/*"]
        );
    }

    #[test]
    fn keeps_quoted_commas_together() {
        let mut headers = HeaderCollection::new();
        headers.append("If-None-Match", "\"a,b\", \"c\"");

        assert_eq!(headers.get("if-none-match").unwrap(), &["\"a,b\"", "\"c\""]);
    }

    #[test]
    fn never_splits_listed_headers() {
        let mut headers = HeaderCollection::new();
        headers.append("Cookie", "a=1, b=2");
        headers.append("User-Agent", "Mozilla/5.0 (X11, Linux)");

        assert_eq!(headers.get("cookie").unwrap(), &["a=1, b=2"]);
        assert_eq!(headers.get("user-agent").unwrap().len(), 1);
    }

    #[test]
    fn merges_repeated_names_in_first_position() {
        let mut headers = HeaderCollection::new();
        headers.append("X-One", "1");
        headers.append("X-Two", "2");
        headers.append("x-one", "3");

        let names: Vec<_> = headers.iter().map(|entry| entry.name.as_str()).collect();
        assert_eq!(names, vec!["X-One", "X-Two"]);
        assert_eq!(headers.get_joined("X-ONE").unwrap(), "1,3");
    }

    #[test]
    fn finds_tokens_case_insensitively() {
        let mut headers = HeaderCollection::new();
        headers.append("Connection", "keep-alive, Upgrade");

        assert!(headers.contains_token("connection", "upgrade"));
        assert!(!headers.contains_token("connection", "close"));
    }

    #[test]
    fn set_and_remove_replace_values() {
        let mut headers = HeaderCollection::new();
        headers.append("Server", "a, b");
        headers.set("server", "toolbridge");
        assert_eq!(headers.get("Server").unwrap(), &["toolbridge"]);

        assert_eq!(headers.remove("SERVER"), Some(vec!["toolbridge".to_string()]));
        assert!(headers.is_empty());
    }

    #[test]
    fn keeps_empty_values() {
        let mut headers = HeaderCollection::new();
        headers.append("X-Empty", "");

        assert_eq!(headers.get("x-empty").unwrap(), &[""]);
    }
}
