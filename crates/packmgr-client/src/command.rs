//! Command vocabulary of the package manager service.
//!
//! Wire keys and command names are fixed by the server and must match exactly.

/// Request and response parameter keys.
pub struct Keys;

impl Keys {
    pub const CMD: &'static str = "cmd";
    pub const FORCE: &'static str = "force";
    pub const PACKAGE: &'static str = "package";
    pub const SUCCESS: &'static str = "success";
    pub const MESSAGE: &'static str = "msg";
    pub const PATH: &'static str = "path";
    pub const RECURSIVE: &'static str = "recursive";
    pub const AUTOSAVE: &'static str = "autosave";
    pub const AC_HANDLING: &'static str = "acHandling";
}

/// A command understood by the service's control endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Contents,
    Install,
    Uninstall,
    Upload,
    Build,
    Rewrap,
    DryRun,
    Delete,
    Replicate,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Contents => "contents",
            Command::Install => "install",
            Command::Uninstall => "uninstall",
            Command::Upload => "upload",
            Command::Build => "build",
            Command::Rewrap => "rewrap",
            Command::DryRun => "dryrun",
            Command::Delete => "delete",
            Command::Replicate => "replicate",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "contents" => Some(Command::Contents),
            "install" => Some(Command::Install),
            "uninstall" => Some(Command::Uninstall),
            "upload" => Some(Command::Upload),
            "build" => Some(Command::Build),
            "rewrap" => Some(Command::Rewrap),
            "dryrun" => Some(Command::DryRun),
            "delete" => Some(Command::Delete),
            "replicate" => Some(Command::Replicate),
            _ => None,
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How the server reconciles access-control entries while installing.
///
/// When no policy is given the parameter is omitted and the server applies
/// the policy stored in the package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AcHandling {
    Ignore,
    Overwrite,
    Merge,
    MergePreserve,
    Clear,
}

impl AcHandling {
    pub fn as_str(&self) -> &'static str {
        match self {
            AcHandling::Ignore => "ignore",
            AcHandling::Overwrite => "overwrite",
            AcHandling::Merge => "merge",
            AcHandling::MergePreserve => "merge_preserve",
            AcHandling::Clear => "clear",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "ignore" => Some(AcHandling::Ignore),
            "overwrite" => Some(AcHandling::Overwrite),
            "merge" => Some(AcHandling::Merge),
            "merge_preserve" => Some(AcHandling::MergePreserve),
            "clear" => Some(AcHandling::Clear),
            _ => None,
        }
    }
}

impl std::fmt::Display for AcHandling {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_names() {
        assert_eq!(Command::DryRun.as_str(), "dryrun");
        assert_eq!(Command::Contents.to_string(), "contents");
        assert_eq!(Command::from_str("replicate"), Some(Command::Replicate));
        assert_eq!(Command::from_str("DRYRUN"), None);
    }

    #[test]
    fn test_ac_handling_parses_case_insensitively() {
        assert_eq!(AcHandling::from_str("MERGE_PRESERVE"), Some(AcHandling::MergePreserve));
        assert_eq!(AcHandling::Overwrite.as_str(), "overwrite");
        assert_eq!(AcHandling::from_str("append"), None);
    }
}
