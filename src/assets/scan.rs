//! Small scanners that pull asset URLs out of captured markup and styles.
//!
//! These replace what is usually done with regexes; the inputs have precise
//! grammars (`srcset` per the HTML spec, `image-set()` per CSS Images) and
//! tiny state machines track them exactly.

/// One candidate from a `srcset` attribute.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SrcsetCandidate {
    pub url: String,
    /// The width/density descriptor (`2x`, `640w`), when present.
    pub descriptor: Option<String>,
}

/// Parses a `srcset` attribute value into its candidates.
///
/// Commas separate candidates, but a comma directly attached to a URL (as
/// in data URIs or `foo,bar.png`) only ends the candidate when followed by
/// whitespace per the HTML parsing rules: URLs cannot start or end with a
/// comma.
pub fn parse_srcset(value: &str) -> Vec<SrcsetCandidate> {
    let mut out = Vec::new();
    let bytes = value.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        // skip whitespace and stray commas before the URL
        while i < bytes.len() && (bytes[i].is_ascii_whitespace() || bytes[i] == b',') {
            i += 1;
        }
        if i >= bytes.len() {
            break;
        }

        let url_start = i;
        while i < bytes.len() && !bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        let mut url = &value[url_start..i];
        // trailing commas belong to the separator, not the URL
        let mut ended_candidate = false;
        while url.ends_with(',') {
            url = &url[..url.len() - 1];
            ended_candidate = true;
        }
        if url.is_empty() {
            continue;
        }

        if ended_candidate {
            out.push(SrcsetCandidate { url: url.to_string(), descriptor: None });
            continue;
        }

        // descriptor runs to the next comma
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        let desc_start = i;
        while i < bytes.len() && bytes[i] != b',' {
            i += 1;
        }
        let descriptor = value[desc_start..i].trim();
        out.push(SrcsetCandidate {
            url: url.to_string(),
            descriptor: if descriptor.is_empty() { None } else { Some(descriptor.to_string()) },
        });
        i += 1;
    }

    out
}

/// Extracts the URLs of a CSS `image-set(...)` / `-webkit-image-set(...)`
/// value, looking through nested `url(...)` notation and bare strings.
pub fn parse_image_set(value: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut search = value;

    while let Some(idx) = find_image_set_open(search) {
        let after = &search[idx..];
        let Some(open) = after.find('(') else { break };
        let body_start = open + 1;
        let mut depth = 1usize;
        let bytes = after.as_bytes();
        let mut i = body_start;
        while i < bytes.len() && depth > 0 {
            match bytes[i] {
                b'(' => depth += 1,
                b')' => depth -= 1,
                _ => {}
            }
            i += 1;
        }
        let body = &after[body_start..i.saturating_sub(1).max(body_start)];
        collect_image_set_urls(body, &mut out);
        search = &after[i.min(after.len())..];
    }

    out
}

fn find_image_set_open(value: &str) -> Option<usize> {
    let lower = value.to_ascii_lowercase();
    ["-webkit-image-set(", "image-set("]
        .iter()
        .filter_map(|needle| lower.find(needle))
        .min()
}

fn collect_image_set_urls(body: &str, out: &mut Vec<String>) {
    let bytes = body.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        // type("image/avif") groups carry MIME types, not URLs
        if bytes.len() - i >= 5 && bytes[i..i + 5].eq_ignore_ascii_case(b"type(") {
            i += 5;
            while i < bytes.len() && bytes[i] != b')' {
                i += 1;
            }
            i += 1;
            continue;
        }
        if c == b'"' || c == b'\'' {
            let quote = c;
            let start = i + 1;
            i += 1;
            while i < bytes.len() && bytes[i] != quote {
                i += 1;
            }
            if i > start {
                out.push(body[start..i].to_string());
            }
            i += 1;
        } else if bytes.len() - i >= 4 && bytes[i..i + 4].eq_ignore_ascii_case(b"url(") {
            i += 4;
            let mut end = i;
            while end < bytes.len() && bytes[end] != b')' {
                end += 1;
            }
            let inner = body[i..end].trim().trim_matches(['"', '\'']);
            if !inner.is_empty() {
                out.push(inner.to_string());
            }
            i = end + 1;
        } else {
            i += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_srcset() {
        let candidates = parse_srcset("small.jpg 1x, large.jpg 2x");
        assert_eq!(
            candidates,
            vec![
                SrcsetCandidate { url: "small.jpg".to_string(), descriptor: Some("1x".to_string()) },
                SrcsetCandidate { url: "large.jpg".to_string(), descriptor: Some("2x".to_string()) },
            ]
        );
    }

    #[test]
    fn parses_width_descriptors_and_bare_urls() {
        let candidates = parse_srcset("a.png 640w,\n  b.png 1280w, c.png");
        assert_eq!(candidates.len(), 3);
        assert_eq!(candidates[1].descriptor.as_deref(), Some("1280w"));
        assert_eq!(candidates[2].url, "c.png");
        assert_eq!(candidates[2].descriptor, None);
    }

    #[test]
    fn trailing_comma_ends_a_descriptorless_candidate() {
        let candidates = parse_srcset("a.png, b.png 2x");
        assert_eq!(candidates[0].url, "a.png");
        assert_eq!(candidates[0].descriptor, None);
        assert_eq!(candidates[1].url, "b.png");
        assert_eq!(candidates[1].descriptor.as_deref(), Some("2x"));
    }

    #[test]
    fn embedded_commas_stay_in_the_url() {
        // data URIs and comma-bearing URLs survive because only trailing
        // commas separate candidates
        let candidates = parse_srcset("data:image/png;base64,AAAA 1x");
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].url, "data:image/png;base64,AAAA");
    }

    #[test]
    fn empty_srcset_yields_nothing() {
        assert!(parse_srcset("  ,  ").is_empty());
    }

    #[test]
    fn parses_image_set_urls() {
        let urls = parse_image_set(r#"image-set(url("one.png") 1x, url(two.png) 2x)"#);
        assert_eq!(urls, vec!["one.png", "two.png"]);
    }

    #[test]
    fn parses_webkit_prefix_and_skips_type_groups() {
        let urls = parse_image_set(r#"-webkit-image-set("a.avif" type("image/avif"), "a.png" 1x)"#);
        assert_eq!(urls, vec!["a.avif", "a.png"]);
    }

    #[test]
    fn ignores_values_without_image_set() {
        assert!(parse_image_set("url(plain.png)").is_empty());
    }
}
