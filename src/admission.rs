use crate::classify;

/// Structural admission gate: decides whether a summarised tool event is
/// worth storing at all. Rejections are expected behaviour, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admit,
    Reject(&'static str),
}

impl Admission {
    pub fn admitted(self) -> bool {
        matches!(self, Admission::Admit)
    }
}

/// Tools that are always admitted regardless of content.
const HIGH_SIGNAL_TOOLS: [&str; 4] = ["Write", "Edit", "WebFetch", "WebSearch"];

/// Navigation-noise commands (matched on the first token).
const NAVIGATION_COMMANDS: [&str; 12] = [
    "ls", "cd", "pwd", "cat", "head", "tail", "echo", "wc", "which", "find", "tree", "file",
];

/// Read-only git subcommands, also navigation noise.
const GIT_READ_SUBCOMMANDS: [&str; 7] =
    ["status", "log", "diff", "branch", "show", "remote", "stash list"];

/// Commands that force admission: test runners, builders, git mutations,
/// container/infra commands, package-management mutations.
const MEANINGFUL_PREFIXES: [&str; 26] = [
    "cargo test",
    "cargo build",
    "cargo run",
    "npm test",
    "npm run",
    "yarn test",
    "pnpm test",
    "pytest",
    "go test",
    "go build",
    "make",
    "tsc",
    "jest",
    "vitest",
    "git commit",
    "git push",
    "git merge",
    "git rebase",
    "git cherry-pick",
    "git revert",
    "git tag",
    "docker build",
    "docker run",
    "docker compose",
    "kubectl apply",
    "terraform apply",
];

/// Dependency churn: successful installs produce "added N packages" noise,
/// never decisions.
const INSTALL_PREFIXES: [&str; 6] = [
    "npm install",
    "npm i ",
    "yarn add",
    "pnpm add",
    "pip install",
    "cargo add",
];

const MAX_PLAIN_CONTENT: usize = 5_000;

const DECISION_KEYWORDS: [&str; 8] = [
    "error", "failed", "exception", "bug", "decided", "chose", "because", "instead of",
];

pub fn admit(tool: &str, content: &str, command: Option<&str>, success: bool) -> Admission {
    if content.trim().is_empty() {
        return Admission::Reject("empty");
    }

    // Defence in depth: the dispatcher already drops these.
    if classify::is_self_reference(tool) {
        return Admission::Reject("self-reference");
    }

    if HIGH_SIGNAL_TOOLS.contains(&tool) {
        return Admission::Admit;
    }

    if tool == "Bash" && success {
        if let Some(cmd) = command {
            let cmd = cmd.trim();
            if is_meaningful_command(cmd) {
                return Admission::Admit;
            }
            if is_install_command(cmd) {
                return Admission::Reject("package-install noise");
            }
            if is_navigation_command(cmd) {
                return Admission::Reject("navigation noise");
            }
        }
    }

    if content.len() > MAX_PLAIN_CONTENT && !contains_decision_keyword(content) {
        return Admission::Reject("oversized dump");
    }

    Admission::Admit
}

pub fn is_meaningful_command(cmd: &str) -> bool {
    MEANINGFUL_PREFIXES.iter().any(|p| cmd.starts_with(p))
}

pub fn is_install_command(cmd: &str) -> bool {
    INSTALL_PREFIXES
        .iter()
        .any(|p| cmd.starts_with(p) || cmd == p.trim_end())
}

pub fn is_navigation_command(cmd: &str) -> bool {
    let first = cmd.split_whitespace().next().unwrap_or("");
    if NAVIGATION_COMMANDS.contains(&first) {
        return true;
    }
    if let Some(rest) = cmd.strip_prefix("git ") {
        let rest = rest.trim();
        return GIT_READ_SUBCOMMANDS
            .iter()
            .any(|sub| rest == *sub || rest.starts_with(&format!("{sub} ")));
    }
    false
}

fn contains_decision_keyword(content: &str) -> bool {
    let lower = content.to_lowercase();
    DECISION_KEYWORDS.iter().any(|k| lower.contains(k))
}
