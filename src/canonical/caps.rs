//! Capability list canonicalization.

/// Canonical capability set: lower-cased, `cap_` prefix dropped, deduplicated
/// and sorted.
pub fn canonical_caps<I, S>(caps: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = caps
        .into_iter()
        .map(|c| {
            let lower = c.as_ref().trim().to_ascii_lowercase();
            lower.strip_prefix("cap_").map(str::to_string).unwrap_or(lower)
        })
        .filter(|c| !c.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}

/// Compares a desired capability list against the live one.
///
/// Capabilities listed in `implicit` are ones the engine adds on its own;
/// they are ignored on the live side unless the caller asked for them.
pub fn capabilities_equivalent(desired: &[String], live: &[String], implicit: &[&str]) -> bool {
    let desired = canonical_caps(desired);
    let implicit = canonical_caps(implicit);
    let live: Vec<String> = canonical_caps(live)
        .into_iter()
        .filter(|c| !implicit.contains(c) || desired.contains(c))
        .collect();
    desired == live
}
