//! SSH client command line construction.
//!
//! A [`CommandLine`] is a list of discrete arguments. It is never joined into
//! a string for execution; the `Display` form (`exec ssh ... 'host'`) exists
//! for logs and tests only.

use std::fmt;

use crate::ssh::spec::{DialSpec, Target};
use crate::utils::shell_quote;

/// Default ssh client binary.
pub const SSH_PROGRAM: &str = "ssh";

/// Default password feeder binary.
pub const SSHPASS_PROGRAM: &str = "sshpass";

/// Verbosity passed to the client unless configured otherwise.
///
/// The connector reads the client's debug output during the handshake.
pub const DEFAULT_VERBOSITY: &str = "-vv";

/// One argument of a command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Fixed program name or flag.
    Literal(String),
    /// Value that came from input or configuration.
    Opaque(String),
    /// Opaque value that must not appear in logs.
    Secret(String),
}

impl Token {
    pub fn as_str(&self) -> &str {
        match self {
            Token::Literal(s) | Token::Opaque(s) | Token::Secret(s) => s,
        }
    }

    fn literal(s: impl Into<String>) -> Self {
        Token::Literal(s.into())
    }

    fn opaque(s: impl Into<String>) -> Self {
        Token::Opaque(s.into())
    }
}

/// Ordered argv for the process to spawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    tokens: Vec<Token>,
}

impl CommandLine {
    /// Build a command line from raw tokens.
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens }
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    /// The program to execute (first token).
    pub fn program(&self) -> Option<&str> {
        self.tokens.first().map(Token::as_str)
    }

    /// Arguments after the program.
    pub fn args(&self) -> impl Iterator<Item = &str> {
        self.tokens.iter().skip(1).map(Token::as_str)
    }

    /// All tokens as plain strings, program first.
    pub fn argv(&self) -> Vec<String> {
        self.tokens.iter().map(|t| t.as_str().to_string()).collect()
    }

    /// Derive the per-connection command that relays stdio to `target`.
    pub fn with_forwarding(&self, target: &Target) -> CommandLine {
        let mut tokens = self.tokens.clone();
        tokens.push(Token::literal("-W"));
        tokens.push(Token::opaque(target.to_string()));
        CommandLine { tokens }
    }

    /// Display form with secrets masked, safe for logging.
    pub fn redacted(&self) -> String {
        self.render(true)
    }

    fn render(&self, redact: bool) -> String {
        let mut out = String::from("exec");
        for token in &self.tokens {
            out.push(' ');
            match token {
                Token::Literal(s) => out.push_str(s),
                Token::Opaque(s) => out.push_str(&shell_quote(s)),
                Token::Secret(_) if redact => out.push_str("'***'"),
                Token::Secret(s) => out.push_str(&shell_quote(s)),
            }
        }
        out
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(false))
    }
}

/// Renders a [`DialSpec`] into the ssh client invocation.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    ssh_program: String,
    sshpass_program: String,
    verbosity_flags: Vec<String>,
    extra_options: Vec<String>,
}

impl Default for CommandBuilder {
    fn default() -> Self {
        Self {
            ssh_program: SSH_PROGRAM.to_string(),
            sshpass_program: SSHPASS_PROGRAM.to_string(),
            verbosity_flags: vec![DEFAULT_VERBOSITY.to_string()],
            extra_options: Vec::new(),
        }
    }
}

impl CommandBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ssh_program(mut self, program: impl Into<String>) -> Self {
        self.ssh_program = program.into();
        self
    }

    pub fn sshpass_program(mut self, program: impl Into<String>) -> Self {
        self.sshpass_program = program.into();
        self
    }

    pub fn verbosity_flags<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.verbosity_flags = flags.into_iter().map(Into::into).collect();
        self
    }

    /// Additional `-o` client options, e.g. `ConnectTimeout=10`.
    pub fn extra_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_options = options.into_iter().map(Into::into).collect();
        self
    }

    pub fn build(&self, spec: &DialSpec) -> CommandLine {
        let mut tokens = Vec::new();

        match &spec.pass {
            Some(pass) => {
                // sshpass answers the password prompt, so BatchMode must stay off
                tokens.push(Token::literal(&self.sshpass_program));
                tokens.push(Token::literal("-p"));
                tokens.push(Token::Secret(pass.clone()));
                tokens.push(Token::literal(&self.ssh_program));
                tokens.extend(self.verbosity_flags.iter().map(Token::literal));
            }
            None => {
                tokens.push(Token::literal(&self.ssh_program));
                tokens.extend(self.verbosity_flags.iter().map(Token::literal));
                tokens.push(Token::literal("-o"));
                tokens.push(Token::literal("BatchMode=yes"));
            }
        }

        for option in &self.extra_options {
            tokens.push(Token::literal("-o"));
            tokens.push(Token::opaque(option));
        }

        if let Some(port) = spec.explicit_port() {
            tokens.push(Token::literal("-p"));
            tokens.push(Token::literal(port.to_string()));
        }

        tokens.push(Token::opaque(spec.destination()));

        CommandLine { tokens }
    }
}

/// Build the base client command for `spec` with the default programs.
pub fn build(spec: &DialSpec, verbosity_flags: &[&str], extra_options: &[&str]) -> CommandLine {
    CommandBuilder::new()
        .verbosity_flags(verbosity_flags.iter().copied())
        .extra_options(extra_options.iter().copied())
        .build(spec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::spec::{parse, parse_target};

    fn render(spec: &str) -> String {
        CommandBuilder::new().build(&parse(spec).unwrap()).to_string()
    }

    #[test]
    fn test_host_only() {
        assert_eq!(render("host"), "exec ssh -vv -o BatchMode=yes 'host'");
    }

    #[test]
    fn test_default_port_not_rendered() {
        assert_eq!(render("host:22"), "exec ssh -vv -o BatchMode=yes 'host'");
    }

    #[test]
    fn test_user_and_custom_port() {
        assert_eq!(
            render("user@host:2222"),
            "exec ssh -vv -o BatchMode=yes -p 2222 'user@host'"
        );
    }

    #[test]
    fn test_password_uses_sshpass_without_batch_mode() {
        let rendered = render("user:pass@host");
        assert_eq!(rendered, "exec sshpass -p 'pass' ssh -vv 'user@host'");
        assert!(!rendered.contains("BatchMode"));
    }

    #[test]
    fn test_password_with_port() {
        assert_eq!(
            render("user:pass@host:2222"),
            "exec sshpass -p 'pass' ssh -vv -p 2222 'user@host'"
        );
    }

    #[test]
    fn test_quotes_embedded_single_quote() {
        let spec = parse("us%27er:pa%27ss@host").unwrap();
        let command = CommandBuilder::new().build(&spec);
        assert_eq!(
            command.to_string(),
            "exec sshpass -p 'pa'\\''ss' ssh -vv 'us'\\''er@host'"
        );
        assert_eq!(command.argv().last().unwrap(), "us'er@host");
    }

    #[test]
    fn test_argv_keeps_tokens_discrete() {
        let spec = parse("user:p a s s@host:2222").unwrap();
        let command = CommandBuilder::new().build(&spec);
        assert_eq!(
            command.argv(),
            vec!["sshpass", "-p", "p a s s", "ssh", "-vv", "-p", "2222", "user@host"]
        );
        assert_eq!(command.program(), Some("sshpass"));
        assert_eq!(command.args().count(), 7);
    }

    #[test]
    fn test_port_precedes_destination() {
        let command = CommandBuilder::new()
            .extra_options(["ConnectTimeout=5"])
            .build(&parse("host:2200").unwrap());
        let argv = command.argv();
        let len = argv.len();
        assert_eq!(&argv[len - 3..], &["-p", "2200", "host"]);
        assert_eq!(
            command.to_string(),
            "exec ssh -vv -o BatchMode=yes -o 'ConnectTimeout=5' -p 2200 'host'"
        );
    }

    #[test]
    fn test_custom_verbosity_and_programs() {
        let command = CommandBuilder::new()
            .ssh_program("/usr/local/bin/ssh")
            .verbosity_flags(Vec::<String>::new())
            .build(&parse("host").unwrap());
        assert_eq!(
            command.to_string(),
            "exec /usr/local/bin/ssh -o BatchMode=yes 'host'"
        );
    }

    #[test]
    fn test_build_function() {
        let command = build(&parse("host").unwrap(), &["-v"], &[]);
        assert_eq!(command.to_string(), "exec ssh -v -o BatchMode=yes 'host'");
    }

    #[test]
    fn test_with_forwarding() {
        let base = CommandBuilder::new().build(&parse("user@host").unwrap());
        let command = base.with_forwarding(&parse_target("example.com:80").unwrap());
        assert_eq!(
            command.to_string(),
            "exec ssh -vv -o BatchMode=yes 'user@host' -W 'example.com:80'"
        );
        // base is left untouched
        assert_eq!(base.to_string(), "exec ssh -vv -o BatchMode=yes 'user@host'");
    }

    #[test]
    fn test_redacted_masks_password() {
        let command = CommandBuilder::new().build(&parse("user:hunter2@host").unwrap());
        let redacted = command.redacted();
        assert_eq!(redacted, "exec sshpass -p '***' ssh -vv 'user@host'");
        assert!(!redacted.contains("hunter2"));
    }
}
