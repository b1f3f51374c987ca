//! Host-name mangling: turns untrusted task/framework names into DNS-safe
//! labels and domain fragments.
//!
//! Two character tables are supported: [`HostNameSpec::rfc952`] (labels may
//! never start with a digit, max 24 chars — the conservative historical
//! rule) and [`HostNameSpec::rfc1123`] (digits allowed first, max 63 chars).

/// A character table plus a maximum label length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostNameSpec {
    allow_leading_digit: bool,
    max_len: usize,
}

impl HostNameSpec {
    /// RFC 952 label rules: no leading digit, 24 character labels.
    pub const fn rfc952() -> Self {
        HostNameSpec {
            allow_leading_digit: false,
            max_len: 24,
        }
    }

    /// RFC 1123 label rules: leading digit allowed, 63 character labels.
    pub const fn rfc1123() -> Self {
        HostNameSpec {
            allow_leading_digit: true,
            max_len: 63,
        }
    }

    /// Mangle a single segment into a DNS-safe label.
    ///
    /// Letters are lowercased. `-`, `.`, `_` map to `-`, but a `-` is only
    /// kept if it lands between two alphanumerics (never first or last).
    /// Everything else is dropped. The result is truncated to `max_len`
    /// characters and any trailing `-` introduced by truncation is trimmed
    /// by rewinding to the last alphanumeric.
    pub fn mangle(&self, s: &str) -> String {
        let mut out = String::with_capacity(s.len().min(self.max_len));
        // Index (in `out`) of the last character that was alphanumeric.
        let mut last_alnum: Option<usize> = None;

        for ch in s.chars() {
            if out.len() >= self.max_len {
                break;
            }

            let mapped = if ch.is_ascii_alphabetic() {
                Some(ch.to_ascii_lowercase())
            } else if ch.is_ascii_digit() {
                if out.is_empty() && !self.allow_leading_digit {
                    None
                } else {
                    Some(ch)
                }
            } else if ch == '-' || ch == '.' || ch == '_' {
                if out.is_empty() || last_alnum != Some(out.chars().count().saturating_sub(1)) {
                    None
                } else {
                    Some('-')
                }
            } else {
                None
            };

            if let Some(c) = mapped {
                if c == '-' {
                    out.push(c);
                } else {
                    out.push(c);
                    last_alnum = Some(out.chars().count() - 1);
                }
            }
        }

        match last_alnum {
            Some(idx) => out.chars().take(idx + 1).collect(),
            None => String::new(),
        }
    }

    /// Split `s` on `.`, mangle each segment, and rejoin the surviving
    /// non-empty segments with `.`.
    pub fn as_domain_frag(&self, s: &str) -> String {
        s.split('.')
            .map(|seg| self.mangle(seg))
            .filter(|seg| !seg.is_empty())
            .collect::<Vec<_>>()
            .join(".")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mangle_lowercases_and_replaces_separators() {
        let spec = HostNameSpec::rfc1123();
        assert_eq!(spec.mangle("Foo_Bar.Baz"), "foo-bar-baz");
    }

    #[test]
    fn mangle_drops_leading_digit_under_rfc952() {
        let spec = HostNameSpec::rfc952();
        assert_eq!(spec.mangle("123abc"), "abc");
    }

    #[test]
    fn mangle_allows_leading_digit_under_rfc1123() {
        let spec = HostNameSpec::rfc1123();
        assert_eq!(spec.mangle("123abc"), "123abc");
    }

    #[test]
    fn mangle_strips_trailing_dash() {
        let spec = HostNameSpec::rfc1123();
        assert_eq!(spec.mangle("abc$$$"), "abc");
        assert_eq!(spec.mangle("abc-_."), "abc");
    }

    #[test]
    fn mangle_truncates_to_max_len() {
        let spec = HostNameSpec::rfc952();
        let long = "a".repeat(100);
        assert_eq!(spec.mangle(&long).len(), 24);
    }

    #[test]
    fn mangle_empty_when_nothing_survives() {
        let spec = HostNameSpec::rfc1123();
        assert_eq!(spec.mangle("$$$---..."), "");
    }

    #[test]
    fn as_domain_frag_example_from_scenario_c() {
        let spec = HostNameSpec::rfc952();
        assert_eq!(
            spec.as_domain_frag("pod_123$abc.marathon-0.6.0-dev.mesos"),
            "pod-123abc.marathon-0.dev.mesos"
        );
    }

    // Property: for all strings, mangle() returns only lowercase
    // letters/digits/'-', never starts/ends with '-', len <= max, and
    // (rfc952) never starts with a digit.
    #[test]
    fn mangle_invariants_hold_over_sample_inputs() {
        let samples = [
            "",
            "-",
            "___",
            "a.b.c",
            "A1_b-C.d",
            "9999999999999999999999999999999999",
            "\u{1F600}emoji",
            "UPPER-CASE_mixed.123",
        ];
        for spec in [HostNameSpec::rfc952(), HostNameSpec::rfc1123()] {
            for s in samples {
                let m = spec.mangle(s);
                assert!(m.len() <= spec.max_len);
                assert!(!m.starts_with('-'));
                assert!(!m.ends_with('-'));
                assert!(m
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
                if !spec.allow_leading_digit {
                    if let Some(first) = m.chars().next() {
                        assert!(!first.is_ascii_digit());
                    }
                }
            }
        }
    }
}
