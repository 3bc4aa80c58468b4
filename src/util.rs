//! Credential generation, bindhost allocation, and mask matching.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use ipnet::Ipv4Net;
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::{Digest, Sha256};

/// Characters allowed anywhere in a ZNC username.
const VALID_USER_CHARS: &str =
    "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789@.-_";

/// Draws from the address pool before a collision is treated as
/// exhaustion.
pub const BINDHOST_ATTEMPTS: usize = 50;

/// Generated password length.
const PASSWORD_LEN: usize = 16;

/// Generate an alphanumeric account password.
pub fn gen_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(PASSWORD_LEN)
        .map(char::from)
        .collect()
}

/// Draw one random address from the pool.
pub fn gen_bindhost(net: Ipv4Net) -> Ipv4Addr {
    let size = 1u64 << (32 - net.prefix_len());
    let offset = rand::thread_rng().gen_range(0..size) as u32;
    Ipv4Addr::from(u32::from(net.network()).wrapping_add(offset))
}

/// Pick a bindhost not yet assigned to any account.
///
/// Samples the pool a bounded number of times; `None` means the pool is
/// effectively exhausted and the invoking command must decline.
pub fn allocate_bindhost(
    net: Ipv4Net,
    users: &BTreeMap<String, Option<String>>,
) -> Option<String> {
    for _ in 0..BINDHOST_ATTEMPTS {
        let host = gen_bindhost(net).to_string();
        if !users.values().flatten().any(|h| *h == host) {
            return Some(host);
        }
    }
    None
}

/// Whether `name` is usable as a ZNC username verbatim.
pub fn is_username_valid(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    name.chars().all(|c| VALID_USER_CHARS.contains(c))
}

/// Map an arbitrary nick to a valid username.
///
/// Valid names pass through unchanged. Otherwise invalid characters are
/// replaced and a short digest-derived suffix is appended so distinct
/// nicks cannot sanitize to the same username.
pub fn sanitize_username(name: &str) -> String {
    if is_username_valid(name) {
        return name.to_string();
    }

    let mut out = String::with_capacity(name.len() + 9);
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => out.push(c),
        _ => out.push('-'),
    }
    for c in chars {
        if VALID_USER_CHARS.contains(c) {
            out.push(c);
        } else {
            out.push('-');
        }
    }

    let digest = Sha256::digest(name.as_bytes());
    let suffix: String = digest.iter().take(4).map(|b| format!("{b:02x}")).collect();
    out.push('@');
    out.push_str(&suffix);
    out
}

/// Case-insensitive shell-style glob match of a full `nick!user@host`
/// mask against each configured admin pattern; any single match
/// authorizes.
pub fn mask_matches_any(mask: &str, patterns: &[String]) -> bool {
    let mask = mask.to_lowercase();
    patterns.iter().any(|pat| {
        glob::Pattern::new(&pat.to_lowercase())
            .map(|p| p.matches(&mask))
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_is_alphanumeric_and_sized() {
        let pass = gen_password();
        assert_eq!(pass.len(), 16);
        assert!(pass.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn bindhost_lands_in_pool() {
        let net: Ipv4Net = "127.0.0.0/16".parse().unwrap();
        for _ in 0..100 {
            let host = gen_bindhost(net);
            assert!(net.contains(&host), "{host} outside {net}");
        }
    }

    #[test]
    fn allocator_skips_assigned_hosts() {
        // A /31 pool has two addresses; with one taken, allocation must
        // land on the other.
        let net: Ipv4Net = "127.0.0.0/31".parse().unwrap();
        let mut users = BTreeMap::new();
        users.insert("a".to_string(), Some("127.0.0.0".to_string()));
        let host = allocate_bindhost(net, &users).unwrap();
        assert_eq!(host, "127.0.0.1");
    }

    #[test]
    fn allocator_gives_up_when_pool_is_exhausted() {
        let net: Ipv4Net = "127.0.0.0/31".parse().unwrap();
        let mut users = BTreeMap::new();
        users.insert("a".to_string(), Some("127.0.0.0".to_string()));
        users.insert("b".to_string(), Some("127.0.0.1".to_string()));
        assert_eq!(allocate_bindhost(net, &users), None);
    }

    #[test]
    fn username_validity() {
        assert!(is_username_valid("alice"));
        assert!(is_username_valid("alice.bnc-01_x@y"));
        assert!(!is_username_valid("1alice"));
        assert!(!is_username_valid("-alice"));
        assert!(!is_username_valid("al ice"));
        assert!(!is_username_valid(""));
    }

    #[test]
    fn sanitize_passes_valid_names_through() {
        assert_eq!(sanitize_username("alice"), "alice");
    }

    #[test]
    fn sanitize_replaces_and_disambiguates() {
        let a = sanitize_username("al ice");
        let b = sanitize_username("al|ice");
        assert!(a.starts_with("al-ice@"));
        assert!(b.starts_with("al-ice@"));
        assert_ne!(a, b);
    }

    #[test]
    fn admin_mask_matching_is_case_insensitive_glob() {
        let patterns = vec!["*!*@staff.example.org".to_string()];
        assert!(mask_matches_any("Alice!a@Staff.Example.Org", &patterns));
        assert!(mask_matches_any("bob!b@staff.example.org", &patterns));
        assert!(!mask_matches_any("mallory!m@users.example.org", &patterns));
        assert!(!mask_matches_any("mallory!m@users.example.org", &[]));
    }
}
