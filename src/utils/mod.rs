pub mod time;

const ID_ALPHABET: [char; 36] = [
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r', 's', 't', 'u', 'v',
    'w', 'x', 'y', 'z',
];

/// 21 character id for edges.
pub fn longid() -> String {
    nanoid::nanoid!(21, &ID_ALPHABET)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_longid_shape() {
        let id = longid();
        assert_eq!(id.len(), 21);
        assert!(id.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        assert_ne!(id, longid());
    }
}
