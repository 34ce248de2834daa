//! `marasi.random` (spec.md §4.8) — cryptographically-seeded random values.

use rand::Rng;

const DEFAULT_CHARSET: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

pub fn int(min: i64, max: i64) -> i64 {
    if min >= max {
        return min;
    }
    rand::thread_rng().gen_range(min..=max)
}

pub fn string(len: i64, charset: &str) -> String {
    let alphabet: Vec<char> = if charset.is_empty() {
        DEFAULT_CHARSET.chars().collect()
    } else {
        charset.chars().collect()
    };
    if alphabet.is_empty() {
        return String::new();
    }
    let mut rng = rand::thread_rng();
    (0..len.max(0))
        .map(|_| alphabet[rng.gen_range(0..alphabet.len())])
        .collect()
}
