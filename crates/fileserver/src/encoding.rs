//! URL encoding of relative media paths

/// Residual escapes some proxies leave behind after one round of decoding
const RESIDUAL_ESCAPES: [(&str, char); 7] = [
    ("%5B", '['),
    ("%5D", ']'),
    ("%28", '('),
    ("%29", ')'),
    ("%21", '!'),
    ("%2A", '*'),
    ("%27", '\''),
];

/// Percent-encode each segment of a relative path, keeping `/` separators
///
/// Everything outside `A-Z a-z 0-9 - _ . ~` is escaped, which covers the
/// `()[]!*'` characters that some proxies mangle.
pub fn encode_path(relative: &str) -> String {
    relative
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Decode escapes still present in a path the router already decoded once
pub fn decode_path(path: &str) -> String {
    let mut decoded = String::with_capacity(path.len());
    let mut rest = path;

    'outer: while !rest.is_empty() {
        if let Some(head) = rest.get(..3).filter(|head| head.starts_with('%')) {
            for (escape, replacement) in RESIDUAL_ESCAPES {
                if head.eq_ignore_ascii_case(escape) {
                    decoded.push(replacement);
                    rest = &rest[3..];
                    continue 'outer;
                }
            }
        }

        let mut chars = rest.chars();
        if let Some(c) = chars.next() {
            decoded.push(c);
        }
        rest = chars.as_str();
    }

    decoded
}
