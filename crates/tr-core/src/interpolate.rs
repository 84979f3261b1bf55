//! Variable interpolator (C2, §4.2).
//!
//! Substitutes `${{ name }}` placeholders (surrounding whitespace ignored).
//! Undefined names are left intact. Never mutates its input; always
//! returns an owned copy.

use std::collections::BTreeMap;

use regex::Regex;

fn placeholder_re() -> Regex {
    Regex::new(r"\$\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}").expect("placeholder regex is a fixed valid pattern")
}

/// Replace every `${{ name }}` in `input` with `vars[name]`, leaving any
/// placeholder whose name is absent from `vars` unchanged.
pub fn interpolate(input: &str, vars: &BTreeMap<String, String>) -> String {
    let re = placeholder_re();
    let mut out = String::with_capacity(input.len());
    let mut last = 0usize;
    for cap in re.captures_iter(input) {
        let whole = cap.get(0).expect("capture group 0 always matches");
        let key = cap.get(1).expect("capture group 1 is required by the pattern").as_str();
        out.push_str(&input[last..whole.start()]);
        match vars.get(key) {
            Some(value) => out.push_str(value),
            None => out.push_str(whole.as_str()),
        }
        last = whole.end();
    }
    out.push_str(&input[last..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn replaces_known_placeholder() {
        let v = vars(&[("name", "World")]);
        assert_eq!(interpolate("hello ${{ name }}", &v), "hello World");
    }

    #[test]
    fn tolerates_missing_whitespace() {
        let v = vars(&[("name", "World")]);
        assert_eq!(interpolate("hello ${{name}}", &v), "hello World");
    }

    #[test]
    fn leaves_undefined_placeholder_intact() {
        let v = vars(&[]);
        assert_eq!(interpolate("hello ${{ ghost }}", &v), "hello ${{ ghost }}");
    }

    #[test]
    fn idempotent_with_no_placeholders() {
        let v = vars(&[("x", "y")]);
        let input = "plain text, no tokens here";
        assert_eq!(interpolate(input, &v), input);
        assert_eq!(interpolate(&interpolate(input, &v), &v), input);
    }

    #[test]
    fn second_pass_over_undefined_token_is_unchanged() {
        let v = vars(&[]);
        let once = interpolate("x=${{ ghost }}", &v);
        let twice = interpolate(&once, &v);
        assert_eq!(once, twice);
    }
}
