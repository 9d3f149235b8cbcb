use sha2::{Digest, Sha256};

/// One-way key for a raw platform meeting id.
pub fn meeting_key(raw_meeting_id: &str) -> String {
    hex::encode(Sha256::digest(raw_meeting_id.trim().as_bytes()))
}

/// Lock name scoped to a single session key.
pub fn lock_name(meeting_key: &str) -> String {
    format!("lock:session:{}", hex::encode(Sha256::digest(meeting_key.as_bytes())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meeting_key_is_stable_hex() {
        let key = meeting_key("85412345678");
        assert_eq!(key.len(), 64);
        assert_eq!(key, meeting_key(" 85412345678 "));
        assert_ne!(key, meeting_key("85412345679"));
        assert!(!key.contains("85412345678"));
    }

    #[test]
    fn lock_names_differ_per_key() {
        let a = lock_name(&meeting_key("1"));
        let b = lock_name(&meeting_key("2"));
        assert_ne!(a, b);
        assert!(a.starts_with("lock:session:"));
    }
}
