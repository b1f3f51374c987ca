//! Port-range expansion: parses Mesos's bracketed multi-range port syntax
//! (`"[31000-31001, 31005-31005]"`) into an ordered sequence of individual
//! port numbers.
//!
//! A malformed term is skipped (logged) rather than aborting the whole
//! expansion — see the Open Question in spec.md §9, resolved in
//! DESIGN.md in favor of the skip-range policy.

/// Expand a bracketed port-range spec into individual ports, in enumeration
/// order. Malformed range terms are skipped with a logged error; an empty
/// or literal `"[]"` input yields an empty vector.
pub fn expand_port_ranges(spec: &str) -> Vec<u16> {
    let Some(start) = spec.find('[') else {
        return Vec::new();
    };
    let Some(end) = spec[start..].find(']') else {
        return Vec::new();
    };
    let inner = &spec[start + 1..start + end];

    let mut ports = Vec::new();
    for term in inner.split(',') {
        let term = term.trim();
        if term.is_empty() {
            continue;
        }
        match parse_range(term) {
            Some((lo, hi)) if lo <= hi => {
                ports.extend(lo..=hi);
            }
            Some((lo, hi)) => {
                log::error!("malformed port range '{}': lo {} > hi {}", term, lo, hi);
            }
            None => {
                log::error!("malformed port range term: '{}'", term);
            }
        }
    }
    ports
}

fn parse_range(term: &str) -> Option<(u16, u16)> {
    let mut parts = term.splitn(2, '-');
    let lo = parts.next()?.trim().parse().ok()?;
    let hi = parts.next()?.trim().parse().ok()?;
    Some((lo, hi))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_single_range() {
        assert_eq!(expand_port_ranges("[31000-31001]"), vec![31000, 31001]);
    }

    #[test]
    fn expands_scenario_d() {
        assert_eq!(
            expand_port_ranges("[31111-31111, 31115-31117]"),
            vec![31111, 31115, 31116, 31117]
        );
    }

    #[test]
    fn empty_brackets_yield_empty() {
        assert_eq!(expand_port_ranges("[]"), Vec::<u16>::new());
        assert_eq!(expand_port_ranges(""), Vec::<u16>::new());
    }

    #[test]
    fn malformed_term_is_skipped_not_fatal() {
        assert_eq!(expand_port_ranges("[abc-def, 10-12]"), vec![10, 11, 12]);
    }

    #[test]
    fn exact_count_property() {
        for (lo, hi) in [(1u16, 1u16), (100, 110), (31000, 31000)] {
            let spec = format!("[{}-{}]", lo, hi);
            let expanded = expand_port_ranges(&spec);
            assert_eq!(expanded.len() as u32, (hi - lo) as u32 + 1);
            assert!(expanded.windows(2).all(|w| w[0] < w[1]));
        }
    }
}
