//! User canonicalization.

const ROOT_ALIASES: &[&str] = &["", "root", "0", "0:0", "root:root"];

/// Collapses every spelling of the root user into `root`.
pub fn canonical_user(user: Option<&str>) -> String {
    let user = user.unwrap_or_default().trim();
    if ROOT_ALIASES.contains(&user) {
        "root".to_string()
    } else {
        user.to_string()
    }
}
