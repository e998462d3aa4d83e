//! Classification of tool text and external-service failures.
//!
//! Tool results carry a typed status internally; the markers below only exist
//! on the model-facing channel. External collaborators (git remotes, the PR
//! host) report failures as free text, so those are classified here by known
//! substrings into a small closed set.

/// Prefix on every rendered successful tool result.
pub const SUCCESS_MARKER: &str = "[ok]";
/// Prefix on every rendered failed tool result.
pub const FAILURE_MARKER: &str = "[error]";

/// Coarse classification of an external-service failure message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalFailure {
    /// The resource already exists; callers treat this as success.
    AlreadyExists,
    /// Credentials were rejected or a credential prompt was required.
    Auth,
    /// The operation exceeded its timeout.
    Timeout,
    /// The remote rejected the update (e.g. non-fast-forward).
    Rejected,
    /// Anything else.
    Other,
}

const ALREADY_EXISTS_PATTERNS: &[&str] = &["already exists"];

const AUTH_PATTERNS: &[&str] = &[
    "403",
    "401",
    "permission denied",
    "authentication failed",
    "could not read username",
    "could not read password",
    "terminal prompts disabled",
    "invalid username or password",
    "gh auth login",
    "bad credentials",
];

const TIMEOUT_PATTERNS: &[&str] = &["timed out", "timeout"];

const REJECTED_PATTERNS: &[&str] = &["[rejected]", "non-fast-forward", "failed to push some refs"];

/// Classify a failure message by substring (case-insensitive).
///
/// Checks are ordered: auth wins over rejection because a rejected push caused
/// by missing credentials must surface the credential remediation.
pub fn classify_external_failure(message: &str) -> ExternalFailure {
    classify(message, true)
}

/// Classify a failed push. A push is never "already done": an existing ref on
/// the remote (`! [rejected] v1 -> v1 (already exists)`) is a rejection.
pub fn classify_push_failure(message: &str) -> ExternalFailure {
    classify(message, false)
}

fn classify(message: &str, already_exists_is_success: bool) -> ExternalFailure {
    let lower = message.to_lowercase();
    let contains_any = |patterns: &[&str]| patterns.iter().any(|p| lower.contains(p));
    let already_exists = contains_any(ALREADY_EXISTS_PATTERNS);
    if already_exists && already_exists_is_success {
        ExternalFailure::AlreadyExists
    } else if contains_any(AUTH_PATTERNS) {
        ExternalFailure::Auth
    } else if contains_any(TIMEOUT_PATTERNS) {
        ExternalFailure::Timeout
    } else if already_exists || contains_any(REJECTED_PATTERNS) {
        ExternalFailure::Rejected
    } else {
        ExternalFailure::Other
    }
}

/// Remediation text the model should act on for a classified failure.
pub fn remediation(kind: ExternalFailure) -> &'static str {
    match kind {
        ExternalFailure::AlreadyExists => "The resource already exists; treat this step as done.",
        ExternalFailure::Auth => {
            "Authentication with the remote failed. Credentials must be fixed outside the agent \
             (token or SSH key for the remote, or `gh auth login`). Do not retry with a different \
             branch name."
        }
        ExternalFailure::Timeout => {
            "The operation timed out. Retry once; if it times out again, report the problem with \
             task_complete."
        }
        ExternalFailure::Rejected => {
            "The remote rejected the update. Make sure you are pushing the branch created by \
             init_workspace."
        }
        ExternalFailure::Other => "Read the error output above and correct the call.",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_already_exists_before_anything_else() {
        let msg = "a pull request for branch \"feature/x\" into branch \"main\" already exists";
        assert_eq!(classify_external_failure(msg), ExternalFailure::AlreadyExists);
    }

    #[test]
    fn push_collisions_are_rejections_not_success() {
        let msg = " ! [rejected]        v1 -> v1 (already exists)\nerror: failed to push some refs";
        assert_eq!(classify_push_failure(msg), ExternalFailure::Rejected);
        assert_ne!(
            remediation(classify_push_failure(msg)),
            remediation(ExternalFailure::AlreadyExists)
        );
        assert_eq!(
            classify_push_failure("fatal: Authentication failed for 'https://example.com/r.git/'"),
            ExternalFailure::Auth
        );
    }

    #[test]
    fn classifies_auth_failures() {
        for msg in [
            "remote: Permission to org/repo.git denied to bot.\nfatal: unable to access: The requested URL returned error: 403",
            "fatal: could not read Username for 'https://github.com': terminal prompts disabled",
            "fatal: Authentication failed for 'https://example.com/repo.git/'",
            "To get started with GitHub CLI, please run:  gh auth login",
        ] {
            assert_eq!(classify_external_failure(msg), ExternalFailure::Auth, "{msg}");
        }
    }

    #[test]
    fn classifies_timeouts_and_rejections() {
        assert_eq!(
            classify_external_failure("git push timed out after 120s"),
            ExternalFailure::Timeout
        );
        assert_eq!(
            classify_external_failure(" ! [rejected]        main -> main (non-fast-forward)"),
            ExternalFailure::Rejected
        );
        assert_eq!(
            classify_external_failure("fatal: not a git repository"),
            ExternalFailure::Other
        );
    }
}
