//! Text rendering utilities for human-friendly diagnostics.
//!
//! Graph-construction failures are hard to localize, so every error the
//! engine reports is rendered through these helpers: cycle chains,
//! resolution traces and suggestion lists.

/// Separator placed between the links of a rendered chain.
pub const CHAIN_ARROW: &str = " → ";

/// Renders a chain of labels joined by arrows.
///
/// # Examples
/// ```
/// use wasfa_support::rendering::render_chain;
///
/// let chain = vec!["Service", "Repository", "Service"];
/// assert_eq!(render_chain(&chain), "Service → Repository → Service");
/// ```
pub fn render_chain(chain: &[impl AsRef<str>]) -> String {
    let mut out = String::new();
    for (i, link) in chain.iter().enumerate() {
        if i > 0 {
            out.push_str(CHAIN_ARROW);
        }
        out.push_str(link.as_ref());
    }
    out
}

/// Renders a bulleted list, one item per line, indented under a heading.
///
/// Returns an empty string for an empty list so callers can append the
/// result unconditionally.
///
/// ```
/// use wasfa_support::rendering::render_list;
///
/// let rendered = render_list("Matching bindings:", &["A", "B"]);
/// assert_eq!(rendered, "\n  Matching bindings:\n    - A\n    - B");
/// ```
pub fn render_list(heading: &str, items: &[impl AsRef<str>]) -> String {
    if items.is_empty() {
        return String::new();
    }
    let mut out = format!("\n  {heading}");
    for item in items {
        out.push_str("\n    - ");
        out.push_str(item.as_ref());
    }
    out
}

/// Shortens a fully qualified type name for display.
///
/// Path prefixes are dropped from every segment, generics included.
///
/// ```
/// use wasfa_support::rendering::shorten_type_name;
///
/// assert_eq!(shorten_type_name("app::services::user::UserService"), "UserService");
/// assert_eq!(
///     shorten_type_name("alloc::sync::Arc<dyn app::traits::Logger>"),
///     "Arc<dyn Logger>"
/// );
/// ```
pub fn shorten_type_name(full_name: &str) -> String {
    let mut result = String::with_capacity(full_name.len());
    let mut segment = String::new();
    let mut chars = full_name.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            ':' if chars.peek() == Some(&':') => {
                chars.next();
                segment.clear();
            }
            '<' | '>' | ',' | ' ' | '(' | ')' | '[' | ']' | ';' | '&' => {
                result.push_str(&segment);
                result.push(ch);
                segment.clear();
            }
            _ => segment.push(ch),
        }
    }

    result.push_str(&segment);
    result
}

/// Edit distance between two strings, case-sensitive.
pub fn edit_distance(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// Suggests registered names close to `requested`.
///
/// Candidates are scored on their shortened names: substring containment
/// wins, then small edit distances. At most `max_suggestions` names are
/// returned, best first, without duplicates.
pub fn suggest_similar(requested: &str, available: &[&str], max_suggestions: usize) -> Vec<String> {
    let wanted = shorten_type_name(requested).to_lowercase();
    if wanted.is_empty() || max_suggestions == 0 {
        return Vec::new();
    }

    let mut scored: Vec<(usize, &str)> = available
        .iter()
        .filter(|name| **name != requested)
        .filter_map(|&name| {
            let short = shorten_type_name(name).to_lowercase();
            if short.is_empty() {
                return None;
            }
            if short.contains(&wanted) || wanted.contains(&short) {
                return Some((0, name));
            }
            let distance = edit_distance(&short, &wanted);
            let budget = (wanted.len().max(short.len()) / 3).max(1);
            (distance <= budget).then_some((distance, name))
        })
        .collect();

    scored.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)));
    scored.dedup_by(|a, b| a.1 == b.1);
    scored
        .into_iter()
        .take(max_suggestions)
        .map(|(_, name)| name.to_string())
        .collect()
}
