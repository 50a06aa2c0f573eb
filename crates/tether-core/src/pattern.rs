//! Shell command patterns for "always allow" decisions.
//!
//! A pattern is either a literal command or a prefix followed by ` *`,
//! which matches the prefix alone or the prefix plus any arguments.

/// Known command prefixes that collapse to `<prefix> *`.
///
/// Lookup picks the longest matching prefix, so `python -m pip install`
/// wins over `python`.
const COMMAND_PREFIXES: &[&str] = &[
    // Package managers
    "npm install",
    "npm i",
    "npm add",
    "npm remove",
    "npm uninstall",
    "npm update",
    "npm run",
    "npm test",
    "npx",
    "yarn add",
    "yarn remove",
    "yarn install",
    "yarn run",
    "pnpm install",
    "pnpm add",
    "pnpm remove",
    "pnpm run",
    "pip install",
    "pip3 install",
    "python -m pip install",
    "python3 -m pip install",
    // Version control
    "git add",
    "git commit",
    "git push",
    "git pull",
    "git fetch",
    "git checkout",
    "git switch",
    "git branch",
    "git merge",
    "git rebase",
    "git reset",
    "git stash",
    "git tag",
    "git clone",
    "git diff",
    "git log",
    "git show",
    // Containers
    "docker run",
    "docker build",
    "docker exec",
    "docker logs",
    "docker stop",
    "docker start",
    "docker rm",
    "docker rmi",
    "docker pull",
    "docker push",
    "docker compose",
    // Build tools
    "make",
    "cargo build",
    "cargo run",
    "cargo test",
    "cargo check",
    "cargo install",
    "cargo fmt",
    "cargo clippy",
    "go build",
    "go run",
    "go test",
    "go mod",
    "mvn compile",
    "mvn test",
    "mvn package",
    "gradle build",
    "gradle test",
    "tsc",
    "eslint",
    "prettier",
    // Compilers and runtimes
    "rustc",
    "gcc",
    "g++",
    "clang",
    "node",
    "python",
    "python3",
    "deno run",
    "bun run",
    // Network and archives
    "curl",
    "wget",
    "ssh",
    "scp",
    "rsync",
    "tar",
    "zip",
    "unzip",
];

/// Returns true if `command` starts with `prefix` as a whole word sequence.
fn has_prefix(command: &str, prefix: &str) -> bool {
    command == prefix
        || command
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with(' '))
}

/// Derives the display/storage pattern for a shell command.
///
/// `git commit -m "x"` becomes `git commit *`; a command with no table
/// entry (e.g. `ls -la`) comes back trimmed but otherwise unchanged.
pub fn command_pattern(command: &str) -> String {
    let command = command.trim();

    COMMAND_PREFIXES
        .iter()
        .filter(|prefix| has_prefix(command, prefix))
        .max_by_key(|prefix| prefix.len())
        .map(|prefix| format!("{prefix} *"))
        .unwrap_or_else(|| command.to_string())
}

/// Returns true if `command` is covered by `pattern`.
pub fn pattern_matches(pattern: &str, command: &str) -> bool {
    let command = command.trim();
    match pattern.strip_suffix(" *") {
        Some(prefix) => has_prefix(command, prefix),
        None => pattern == command,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_prefix_becomes_wildcard() {
        assert_eq!(command_pattern("git commit -m \"x\""), "git commit *");
        assert_eq!(command_pattern("npm i lodash"), "npm i *");
        assert_eq!(command_pattern("make"), "make *");
    }

    #[test]
    fn test_unknown_command_stays_literal() {
        assert_eq!(command_pattern("ls -la"), "ls -la");
        assert_eq!(command_pattern("  echo hi  "), "echo hi");
    }

    #[test]
    fn test_longest_prefix_wins() {
        assert_eq!(
            command_pattern("python -m pip install requests"),
            "python -m pip install *"
        );
        assert_eq!(command_pattern("python script.py"), "python *");
    }

    #[test]
    fn test_prefix_requires_word_boundary() {
        // "npm install" must not be read as "npm i"
        assert_eq!(command_pattern("npm install serde"), "npm install *");
        // "makefile-lint" is not "make"
        assert_eq!(command_pattern("makefile-lint ."), "makefile-lint .");
    }

    #[test]
    fn test_pattern_matching() {
        assert!(pattern_matches("npm i *", "npm i lodash"));
        assert!(pattern_matches("npm i *", "npm i"));
        assert!(!pattern_matches("npm i *", "npm install lodash"));
        assert!(pattern_matches("ls -la", "ls -la"));
        assert!(!pattern_matches("ls -la", "ls -la /etc"));
    }
}
