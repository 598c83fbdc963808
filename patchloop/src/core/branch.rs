//! Branch naming for a run.
//!
//! The planner proposes a branch; we only keep it if it survives
//! sanitization. Otherwise (or when the name is taken) a random fallback
//! derived from the goal is used.

use rand::Rng;
use rand::distributions::Alphanumeric;

/// Namespace for generated branches.
pub const FALLBACK_PREFIX: &str = "patchloop";

const MAX_BRANCH_LEN: usize = 60;
const MAX_SLUG_LEN: usize = 30;
const SUFFIX_LEN: usize = 6;

/// Turn a model-proposed branch into a git-safe name, or `None` if nothing
/// usable remains.
///
/// Keeps `[a-z0-9._/-]`, lowercases, collapses runs of separators and strips
/// leading/trailing separators from each path segment.
pub fn sanitize_branch(raw: &str) -> Option<String> {
    let lowered = raw.trim().to_ascii_lowercase();
    let segments: Vec<String> = lowered
        .split('/')
        .map(sanitize_segment)
        .filter(|s| !s.is_empty())
        .collect();
    if segments.is_empty() {
        return None;
    }
    let mut name = segments.join("/");
    if name.len() > MAX_BRANCH_LEN {
        name.truncate(MAX_BRANCH_LEN);
        name = name
            .trim_end_matches(['-', '.', '/'])
            .to_string();
    }
    if name.is_empty() || name.contains("..") || name.ends_with(".lock") {
        return None;
    }
    Some(name)
}

fn sanitize_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    let mut last_dash = false;
    for c in segment.chars() {
        let mapped = if c.is_ascii_alphanumeric() || c == '.' || c == '_' {
            c
        } else {
            '-'
        };
        if mapped == '-' {
            if last_dash {
                continue;
            }
            last_dash = true;
        } else {
            last_dash = false;
        }
        out.push(mapped);
    }
    out.trim_matches(['-', '.']).to_string()
}

/// Lowercase slug of the goal, for use inside a branch name.
pub fn goal_slug(goal: &str) -> String {
    let slug = sanitize_segment(&goal.to_ascii_lowercase().replace(['.', '_'], "-"));
    let mut slug: String = slug.chars().take(MAX_SLUG_LEN).collect();
    slug = slug.trim_end_matches('-').to_string();
    if slug.is_empty() {
        "change".to_string()
    } else {
        slug
    }
}

/// `patchloop/<goal-slug>-<suffix>` with the given suffix.
pub fn fallback_branch_with_suffix(goal: &str, suffix: &str) -> String {
    format!("{FALLBACK_PREFIX}/{}-{suffix}", goal_slug(goal))
}

/// `patchloop/<goal-slug>-<6 random chars>`.
pub fn fallback_branch<R: Rng>(goal: &str, rng: &mut R) -> String {
    let suffix: String = rng
        .sample_iter(&Alphanumeric)
        .take(SUFFIX_LEN)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();
    fallback_branch_with_suffix(goal, &suffix)
}

/// Path-safe directory name for a branch (`feat/x` -> `feat--x`).
pub fn branch_dir_name(branch: &str) -> String {
    branch.replace('/', "--")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn sanitize_keeps_reasonable_names() {
        assert_eq!(
            sanitize_branch("feat/add-health-endpoint"),
            Some("feat/add-health-endpoint".to_string())
        );
    }

    #[test]
    fn sanitize_rewrites_spaces_and_case() {
        assert_eq!(
            sanitize_branch("  Feature/Add Health  Endpoint!! "),
            Some("feature/add-health-endpoint".to_string())
        );
    }

    #[test]
    fn sanitize_rejects_garbage() {
        assert_eq!(sanitize_branch("///"), None);
        assert_eq!(sanitize_branch("!!!"), None);
        assert_eq!(sanitize_branch(""), None);
        assert_eq!(sanitize_branch("feat/x.lock"), None);
    }

    #[test]
    fn sanitize_caps_length() {
        let long = "a".repeat(200);
        let name = sanitize_branch(&long).expect("name");
        assert_eq!(name.len(), MAX_BRANCH_LEN);
    }

    #[test]
    fn fallback_uses_goal_slug_and_suffix() {
        assert_eq!(
            fallback_branch_with_suffix("add a /health endpoint", "abc123"),
            "patchloop/add-a-health-endpoint-abc123"
        );
    }

    #[test]
    fn fallback_suffix_is_lowercase_alphanumeric() {
        let mut rng = StdRng::seed_from_u64(7);
        let branch = fallback_branch("Fix the bug", &mut rng);
        let suffix = branch.rsplit('-').next().expect("suffix");
        assert!(branch.starts_with("patchloop/fix-the-bug-"));
        assert_eq!(suffix.len(), SUFFIX_LEN);
        assert!(
            suffix
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        );
        assert!(sanitize_branch(&branch).is_some());
    }

    #[test]
    fn empty_goal_still_yields_a_slug() {
        assert_eq!(goal_slug("???"), "change");
    }

    #[test]
    fn branch_dir_flattens_slashes() {
        assert_eq!(branch_dir_name("feat/health"), "feat--health");
    }
}
