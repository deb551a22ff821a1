//! String-side hostname checks that run before any DNS lookup.

use super::classify::classify_literal;

const LOCALHOST_ALIASES: &[&str] = &["localhost", "ip6-localhost", "ip6-loopback"];

/// Suffixes that only ever resolve inside a private network: RFC 6761
/// loopback, mDNS, private-use names and reverse-DNS zones.
const INTERNAL_SUFFIXES: &[&str] = &[".localhost", ".local", ".internal", ".arpa"];

/// Returns `true` when `host` is a localhost alias, an obfuscated IPv4
/// encoding, or an IP literal outside public space.
///
/// A `false` result only means the static heuristics found nothing; the
/// name still has to pass DNS preflight before it is trusted.
pub fn is_blocked_hostname(host: &str) -> bool {
    let lower = host.trim().to_ascii_lowercase();
    let name = lower.trim_end_matches('.');
    if name.is_empty() || LOCALHOST_ALIASES.contains(&name) {
        return true;
    }
    if INTERNAL_SUFFIXES.iter().any(|suffix| name.ends_with(suffix)) {
        return true;
    }
    if is_decimal_encoded(name) || is_octal_encoded(name) || is_hex_encoded(name) {
        return true;
    }

    classify_literal(name).is_some_and(|class| !class.is_public())
}

/// `2130706433` is `127.0.0.1` to most HTTP stacks.
fn is_decimal_encoded(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| b.is_ascii_digit())
}

/// `^0\d+\.`, e.g. `0177.0.0.1`.
fn is_octal_encoded(name: &str) -> bool {
    let Some(rest) = name.strip_prefix('0') else {
        return false;
    };
    let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
    digits > 0 && rest.as_bytes().get(digits) == Some(&b'.')
}

/// `^0x[0-9a-f]+$`, e.g. `0x7f000001`.
fn is_hex_encoded(name: &str) -> bool {
    name.strip_prefix("0x")
        .is_some_and(|hex| !hex.is_empty() && hex.bytes().all(|b| b.is_ascii_hexdigit()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_localhost_aliases() {
        for host in [
            "localhost",
            "LOCALHOST",
            "localhost.",
            "ip6-localhost",
            "IP6-Loopback",
            "evil.localhost",
            "a.b.localhost.",
            "localhost..",
            "IP6-LOCALHOST...",
        ] {
            assert!(is_blocked_hostname(host), "should block: {host}");
        }
    }

    #[test]
    fn blocks_private_network_suffixes() {
        for host in [
            "printer.local",
            "nas.LOCAL.",
            "metadata.google.internal",
            "1.0.0.127.in-addr.arpa",
            "x.ip6.arpa",
        ] {
            assert!(is_blocked_hostname(host), "should block: {host}");
        }
        for host in ["local.example.com", "internal.example", "arpa.net"] {
            assert!(!is_blocked_hostname(host), "should allow: {host}");
        }
    }

    #[test]
    fn blocks_encoded_ipv4() {
        for host in [
            "2130706433",
            "0177.0.0.1",
            "0x7f000001",
            "0X7F000001",
            "017700000001.",
            "00.0.0.0",
        ] {
            assert!(is_blocked_hostname(host), "should block: {host}");
        }
    }

    #[test]
    fn blocks_private_ip_literals() {
        for host in [
            "127.0.0.1",
            "10.0.0.1",
            "169.254.169.254",
            "0.0.0.0",
            "[::1]",
            "[::ffff:127.0.0.1]",
            "[fd00::1]",
            "fe80::1",
        ] {
            assert!(is_blocked_hostname(host), "should block: {host}");
        }
    }

    #[test]
    fn allows_public_names_and_literals() {
        for host in [
            "example.com",
            "localhost.example.com",
            "0x.example.com",
            "01-net.example",
            "8.8.8.8",
            "[2001:4860:4860::8888]",
            "api.0xproject.io",
        ] {
            assert!(!is_blocked_hostname(host), "should allow: {host}");
        }
    }

    #[test]
    fn blocks_empty_host() {
        assert!(is_blocked_hostname(""));
        assert!(is_blocked_hostname("   "));
        assert!(is_blocked_hostname(".."));
    }
}
