//! `marasi.strings` — Unicode-rune semantics for `reverse`/`substring`, byte length
//! for `len` (spec.md §4.8).

pub fn upper(s: &str) -> String {
    s.to_uppercase()
}

pub fn lower(s: &str) -> String {
    s.to_lowercase()
}

pub fn reverse(s: &str) -> String {
    s.chars().rev().collect()
}

pub fn len(s: &str) -> i64 {
    s.len() as i64
}

pub fn replace(s: &str, from: &str, to: &str) -> String {
    s.replace(from, to)
}

pub fn contains(s: &str, needle: &str) -> bool {
    s.contains(needle)
}

pub fn has_prefix(s: &str, prefix: &str) -> bool {
    s.starts_with(prefix)
}

pub fn has_suffix(s: &str, suffix: &str) -> bool {
    s.ends_with(suffix)
}

pub fn split(s: &str, sep: &str) -> Vec<rhai::Dynamic> {
    s.split(sep).map(|part| rhai::Dynamic::from(part.to_string())).collect()
}

pub fn trim(s: &str) -> String {
    s.trim().to_string()
}

pub fn substring(s: &str, start: i64, len: i64) -> String {
    let chars: Vec<char> = s.chars().collect();
    let total = chars.len() as i64;
    let start = start.clamp(0, total) as usize;
    let end = (start as i64 + len).clamp(0, total) as usize;
    if start >= end {
        return String::new();
    }
    chars[start..end].iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reverse_uses_unicode_rune_semantics() {
        assert_eq!(reverse("héllo"), "olléh");
    }

    #[test]
    fn len_uses_byte_length() {
        assert_eq!(len("héllo"), "héllo".len() as i64);
        assert_ne!(len("héllo"), 5);
    }

    #[test]
    fn substring_is_rune_indexed() {
        assert_eq!(substring("héllo", 1, 3), "éll");
    }
}
