use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, RwLock};

/// Predicate over a fully expanded argv. `true` means the command must not run.
pub type BlockFunc = Arc<dyn Fn(&[String]) -> bool + Send + Sync>;

/// Block any command whose `argv[0]` is one of `names`.
///
/// Matching is on the literal first word, so `/usr/bin/curl` is not caught by
/// a `curl` entry.
pub fn commands_blocker<I, S>(names: I) -> BlockFunc
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let banned: HashSet<String> = names.into_iter().map(Into::into).collect();
    Arc::new(move |argv: &[String]| argv.first().is_some_and(|name| banned.contains(name)))
}

/// Block `cmd` when its leading positionals equal `args` and every entry of
/// `flags` appears among its flags.
///
/// `arguments_blocker("git", ["push"], ["--force"])` blocks
/// `git push origin main --force` but not `git push origin main`.
pub fn arguments_blocker<A, F>(cmd: impl Into<String>, args: A, flags: F) -> BlockFunc
where
    A: IntoIterator,
    A::Item: Into<String>,
    F: IntoIterator,
    F::Item: Into<String>,
{
    let cmd = cmd.into();
    let args: Vec<String> = args.into_iter().map(Into::into).collect();
    let flags: Vec<String> = flags.into_iter().map(Into::into).collect();

    Arc::new(move |argv: &[String]| {
        let Some((name, rest)) = argv.split_first() else {
            return false;
        };
        if *name != cmd {
            return false;
        }

        let (positionals, present) = split_args_flags(rest);
        if positionals.len() < args.len() || present.len() < flags.len() {
            return false;
        }

        positionals[..args.len()] == args[..] && flags.iter().all(|f| present.contains(f))
    })
}

/// Split tokens into positionals and flag identities, keeping order.
///
/// A flag is any token starting with `-`; its identity is the part before the
/// first `=`, so `--output=x` yields `--output`.
pub fn split_args_flags(tokens: &[String]) -> (Vec<String>, Vec<String>) {
    let mut args = Vec::with_capacity(tokens.len());
    let mut flags = Vec::with_capacity(tokens.len());
    for token in tokens {
        if token.starts_with('-') {
            let identity = token.split_once('=').map_or(token.as_str(), |(f, _)| f);
            flags.push(identity.to_string());
        } else {
            args.push(token.clone());
        }
    }
    (args, flags)
}

/// Ordered, shared list of block predicates.
///
/// Clones share the same list, so replacing the predicates on a session is
/// seen by every interceptor built from it.
#[derive(Clone, Default)]
pub struct Blocklist {
    funcs: Arc<RwLock<Vec<BlockFunc>>>,
}

impl Blocklist {
    pub fn new(funcs: Vec<BlockFunc>) -> Self {
        Self {
            funcs: Arc::new(RwLock::new(funcs)),
        }
    }

    pub fn replace(&self, funcs: Vec<BlockFunc>) {
        let mut guard = self.funcs.write().unwrap_or_else(|e| e.into_inner());
        *guard = funcs;
    }

    pub fn len(&self) -> usize {
        self.funcs.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True if any predicate matches. An empty argv is never blocked.
    pub fn is_blocked(&self, argv: &[String]) -> bool {
        if argv.is_empty() {
            return false;
        }
        let funcs = self.funcs.read().unwrap_or_else(|e| e.into_inner());
        funcs.iter().any(|f| f(argv))
    }
}

impl fmt::Debug for Blocklist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Blocklist").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(s: &str) -> Vec<String> {
        s.split_whitespace().map(String::from).collect()
    }

    #[test]
    fn test_commands_blocker_exact_name() {
        let block = commands_blocker(["curl", "wget"]);
        assert!(block(&argv("curl https://x")));
        assert!(block(&argv("wget -q x")));
        assert!(!block(&argv("curlx")));
        assert!(!block(&argv("/usr/bin/curl x")));
        assert!(!block(&[]));
    }

    #[test]
    fn test_arguments_blocker_subcommand_and_flag() {
        let block = arguments_blocker("git", ["push"], ["--force"]);
        assert!(block(&argv("git push origin main --force")));
        assert!(block(&argv("git --force push")));
        assert!(!block(&argv("git push origin main")));
        assert!(!block(&argv("git pull --force")));
        assert!(!block(&argv("hg push --force")));
    }

    #[test]
    fn test_arguments_blocker_flag_with_value() {
        let block = arguments_blocker("npm", ["config", "set"], ["--global"]);
        assert!(block(&argv("npm config set --global=true x")));
        assert!(!block(&argv("npm config get --global")));
    }

    #[test]
    fn test_arguments_blocker_without_flags() {
        let block = arguments_blocker("brew", ["install"], Vec::<String>::new());
        assert!(block(&argv("brew install jq")));
        assert!(!block(&argv("brew list")));
    }

    #[test]
    fn test_split_args_flags_keeps_order() {
        let (args, flags) = split_args_flags(&argv("a -x b --out=f c --"));
        assert_eq!(args, vec!["a", "b", "c"]);
        assert_eq!(flags, vec!["-x", "--out", "--"]);
    }

    #[test]
    fn test_blocklist_any_match_and_replace() {
        let list = Blocklist::new(vec![commands_blocker(["sudo"])]);
        let shared = list.clone();
        assert!(shared.is_blocked(&argv("sudo ls")));
        assert!(!shared.is_blocked(&argv("ls")));

        list.replace(vec![commands_blocker(["ls"])]);
        assert!(shared.is_blocked(&argv("ls -la")));
        assert!(!shared.is_blocked(&argv("sudo ls")));
        assert_eq!(shared.len(), 1);
    }
}
