use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Description of a process to launch under the debugger.
#[derive(Debug, Clone)]
pub struct Command {
    /// Program to launch.
    ///
    /// A bare file name is searched in the current directory, then in `PATH`.
    pub program: PathBuf,

    /// Program arguments.
    pub args: Vec<String>,

    /// Environment variables of the process.
    pub env: CommandEnv,

    /// Working directory of the process.
    pub current_dir: Option<PathBuf>,
}

impl Command {
    /// Constructs a new `Command` for launching the program at path
    /// `program`, without arguments, inheriting the environment and the
    /// working directory of the debugger.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: CommandEnv::Inherit(BTreeMap::new()),
            current_dir: None,
        }
    }

    /// Adds an argument to pass to the program.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Adds multiple arguments to pass to the program.
    pub fn args<I, S>(self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        args.into_iter().fold(self, |cmd, arg| cmd.arg(arg))
    }

    /// Inserts or updates an environment variable of the process.
    pub fn env<K, V>(mut self, key: K, val: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        match self.env {
            CommandEnv::Inherit(ref mut env) => {
                env.insert(key.into(), Some(val.into()));
            }
            CommandEnv::NoInherit(ref mut env) => {
                env.insert(key.into(), val.into());
            }
        }

        self
    }

    /// Removes an environment variable, even if it would be inherited.
    pub fn env_remove(mut self, key: impl Into<String>) -> Self {
        match self.env {
            CommandEnv::Inherit(ref mut env) => {
                env.insert(key.into(), None);
            }
            CommandEnv::NoInherit(ref mut env) => {
                env.remove(&key.into());
            }
        }

        self
    }

    /// Prevents the process from inheriting any environment variable.
    pub fn env_clear(mut self) -> Self {
        self.env = CommandEnv::NoInherit(BTreeMap::new());
        self
    }

    /// Sets the working directory of the process.
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Builds the command line of the process.
    ///
    /// Each element is quoted so that `CommandLineToArgvW` (and the MSVC
    /// runtime) splits it back into the original arguments.
    pub fn to_command_line(&self) -> String {
        let program = self.program.to_string_lossy();

        std::iter::once(program.as_ref())
            .chain(self.args.iter().map(String::as_str))
            .map(escape_arg)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Environment variables attached to a [Command].
#[derive(Debug, Clone)]
pub enum CommandEnv {
    /// Variables set (`Some`) or removed (`None`) on top of the inherited
    /// environment.
    Inherit(BTreeMap<String, Option<String>>),

    /// The complete environment of the process.
    NoInherit(BTreeMap<String, String>),
}

impl CommandEnv {
    /// Captures the current environment with the specified changes applied.
    ///
    /// Returns `None` if the environment is inherited unchanged.
    pub fn captured(&self) -> Option<BTreeMap<String, String>> {
        match self {
            Self::Inherit(env) if env.is_empty() => None,
            Self::Inherit(env) => {
                let mut captured_env = std::env::vars().collect::<BTreeMap<_, _>>();

                for (k, v) in env {
                    match v {
                        Some(v) => captured_env.insert(k.clone(), v.clone()),
                        None => captured_env.remove(k),
                    };
                }

                Some(captured_env)
            }
            Self::NoInherit(env) => Some(env.clone()),
        }
    }
}

fn escape_arg(arg: &str) -> Cow<'_, str> {
    if arg.is_empty() {
        return Cow::Borrowed("\"\"");
    }

    let has_space = arg.contains([' ', '\t']);

    if !has_space && !arg.contains('"') {
        return Cow::Borrowed(arg);
    }

    let mut escaped = String::with_capacity(arg.len() + 2);

    if has_space {
        escaped.push('"');
    }

    // backslashes are literal unless they precede a double quote
    let mut slashes = 0;

    for c in arg.chars() {
        match c {
            '\\' => {
                slashes += 1;
                escaped.push(c);
            }
            '"' => {
                escaped.extend(std::iter::repeat_n('\\', slashes + 1));
                escaped.push(c);
                slashes = 0;
            }
            c => {
                slashes = 0;
                escaped.push(c);
            }
        }
    }

    if has_space {
        escaped.extend(std::iter::repeat_n('\\', slashes));
        escaped.push('"');
    }

    Cow::Owned(escaped)
}

#[cfg(test)]
mod tests {
    use super::{Command, escape_arg};

    #[test]
    fn escape_plain_args() {
        assert_eq!(escape_arg(""), "\"\"");
        assert_eq!(escape_arg("hello"), "hello");
        assert_eq!(escape_arg(r"C:\dir\file"), r"C:\dir\file");
    }

    #[test]
    fn escape_spaces_and_quotes() {
        assert_eq!(escape_arg("a b"), "\"a b\"");
        assert_eq!(escape_arg("a\tb"), "\"a\tb\"");
        assert_eq!(escape_arg(r#"say "hi""#), r#""say \"hi\"""#);
        assert_eq!(escape_arg(r#"a\"b"#), r#"a\\\"b"#);
        assert_eq!(escape_arg(r"C:\my dir\"), r#""C:\my dir\\""#);
    }

    #[test]
    fn command_line() {
        let cmd = Command::new(r"C:\Program Files\app.exe")
            .arg("--flag")
            .arg("two words")
            .arg("");

        assert_eq!(
            cmd.to_command_line(),
            r#""C:\Program Files\app.exe" --flag "two words" """#
        );
    }

    #[test]
    fn captured_env() {
        assert!(Command::new("a").env.captured().is_none());

        let env = Command::new("a")
            .env_clear()
            .env("FOO", "1")
            .env("BAR", "2")
            .env_remove("BAR")
            .env
            .captured()
            .unwrap();

        assert_eq!(env.len(), 1);
        assert_eq!(env.get("FOO").map(String::as_str), Some("1"));

        let env = Command::new("a")
            .env("TRAPDOOR_TEST_VAR", "x")
            .env
            .captured()
            .unwrap();

        assert_eq!(
            env.get("TRAPDOOR_TEST_VAR").map(String::as_str),
            Some("x")
        );
    }
}
