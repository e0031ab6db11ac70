// ABOUTME: Application descriptor types parsed from flat key=value conf files.
// ABOUTME: All numeric ranges and path rules are validated once at load time.

mod checks;
mod kv;

pub use checks::{CheckEndpoint, CheckMethod, CheckSpec, parse_checks};
pub use kv::{parse_kv, parse_kv_file, write_kv_file};

use crate::error::{Error, Result};
use nonempty::NonEmpty;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

const MAXFILES_RANGE: (u64, u64) = (128, 65536);
// upper bound mirrors kernel threads-max on the production hosts
const MAXPROCS_RANGE: (u64, u64) = (1024, 515190);
const TIMEOUT_RANGE: (u64, u64) = (5, 180);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// The configured launcher: a relative path plus pre-tokenized arguments.
#[derive(Debug, Clone)]
pub struct Launcher {
    pub file: PathBuf,
    pub args: Vec<String>,
}

impl Launcher {
    /// Full command line, launcher resolved against the application basedir.
    pub fn command(&self, basedir: &Path) -> NonEmpty<String> {
        let mut command = NonEmpty::new(basedir.join(&self.file).to_string_lossy().into_owned());
        for arg in &self.args {
            command.push(arg.clone());
        }
        command
    }
}

/// Statically validated application configuration.
///
/// Parsed once from the flat `key=value` descriptor; accessors never fail.
#[derive(Debug, Clone)]
pub struct AppDescriptor {
    pub launcher: Option<Launcher>,
    /// Daemon pidfile, relative to the application basedir. Presence selects
    /// the pidfile discovery strategy.
    pub pidfile: Option<PathBuf>,
    pub process_regex: Option<Regex>,
    pub maxfiles: Option<u64>,
    pub maxprocs: Option<u64>,
    pub start_timeout: Duration,
    pub stop_timeout: Duration,
    pub env: Vec<(String, String)>,
    pub bootstart: bool,
    pub checks: BTreeMap<String, CheckSpec>,
    instructions: BTreeMap<String, String>,
}

impl AppDescriptor {
    pub fn load(path: &Path) -> Result<Self> {
        let conf = parse_kv_file(path)?;
        Self::from_kv(&conf)
    }

    pub fn from_kv(conf: &BTreeMap<String, String>) -> Result<Self> {
        let launcher = match conf.get("launcher.file") {
            Some(file) => {
                if file.starts_with('/') || file.contains("..") {
                    return Err(Error::Config(format!(
                        "launcher.file must be specified relative to application root dir. Found: {file}"
                    )));
                }
                let args = match conf.get("launcher.args") {
                    Some(args) => split_shell_words(args)?,
                    None => Vec::new(),
                };
                Some(Launcher {
                    file: PathBuf::from(file),
                    args,
                })
            }
            None => None,
        };

        let pidfile = match conf.get("launcher.daemon.pidfile") {
            Some(file) => {
                if file.starts_with('/') {
                    return Err(Error::Config(format!(
                        "launcher.daemon.pidfile must be specified relative to application root dir. Found: {file}"
                    )));
                }
                Some(PathBuf::from(file))
            }
            None => None,
        };

        let process_regex = match conf.get("process.regex") {
            Some(pattern) => Some(Regex::new(pattern).map_err(|e| {
                Error::Config(format!("Invalid regular expression \"{pattern}\": {e}"))
            })?),
            None => None,
        };

        let env = conf
            .iter()
            .filter_map(|(key, value)| {
                key.strip_prefix("env.")
                    .map(|name| (name.to_string(), value.clone()))
            })
            .collect();

        let instructions = conf
            .iter()
            .filter(|(key, _)| key.starts_with("knowhow."))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        let bootstart = conf
            .get("bootstart")
            .map(|v| !v.eq_ignore_ascii_case("false"))
            .unwrap_or(true);

        Ok(AppDescriptor {
            launcher,
            pidfile,
            process_regex,
            maxfiles: bounded_option(conf, "process.maxfiles", MAXFILES_RANGE)?,
            maxprocs: bounded_option(conf, "process.maxprocs", MAXPROCS_RANGE)?,
            start_timeout: timeout(conf, "timeout.start")?,
            stop_timeout: timeout(conf, "timeout.stop")?,
            env,
            bootstart,
            checks: parse_checks(conf)?,
            instructions,
        })
    }

    /// Whether the application detaches and reports itself via a pidfile.
    pub fn daemonizes(&self) -> bool {
        self.pidfile.is_some()
    }

    /// Absolute pidfile path for a given application basedir.
    pub fn pidfile_path(&self, basedir: &Path) -> Option<PathBuf> {
        self.pidfile.as_ref().map(|p| basedir.join(p))
    }

    /// The `knowhow.*` entries of the descriptor.
    pub fn special_instructions(&self) -> &BTreeMap<String, String> {
        &self.instructions
    }
}

fn bounded_option(
    conf: &BTreeMap<String, String>,
    key: &str,
    (lo, hi): (u64, u64),
) -> Result<Option<u64>> {
    let Some(raw) = conf.get(key) else {
        return Ok(None);
    };
    let value: u64 = raw
        .parse()
        .map_err(|e| Error::Config(format!("invalid {key}: {e}")))?;
    if value < lo || value > hi {
        return Err(Error::Config(format!(
            "invalid {key}: allowable range is {lo}..{hi}"
        )));
    }
    Ok(Some(value))
}

fn timeout(conf: &BTreeMap<String, String>, key: &str) -> Result<Duration> {
    match bounded_option(conf, key, TIMEOUT_RANGE)? {
        Some(secs) => Ok(Duration::from_secs(secs)),
        None => Ok(DEFAULT_TIMEOUT),
    }
}

/// Minimal POSIX-style tokenizer for `launcher.args`: whitespace splits,
/// single and double quotes group, backslash escapes.
pub fn split_shell_words(input: &str) -> Result<Vec<String>> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(c) => current.push(c),
                        None => {
                            return Err(Error::Config(format!("unbalanced quote in \"{input}\"")));
                        }
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(escaped) => current.push(escaped),
                            None => {
                                return Err(Error::Config(format!(
                                    "unbalanced quote in \"{input}\""
                                )));
                            }
                        },
                        Some(c) => current.push(c),
                        None => {
                            return Err(Error::Config(format!("unbalanced quote in \"{input}\"")));
                        }
                    }
                }
            }
            '\\' => {
                in_word = true;
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            }
            c => {
                in_word = true;
                current.push(c);
            }
        }
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conf(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn empty_descriptor_uses_defaults() {
        let d = AppDescriptor::from_kv(&BTreeMap::new()).unwrap();
        assert!(d.launcher.is_none());
        assert!(!d.daemonizes());
        assert_eq!(d.start_timeout, Duration::from_secs(10));
        assert_eq!(d.stop_timeout, Duration::from_secs(10));
        assert!(d.bootstart);
    }

    #[test]
    fn absolute_launcher_is_rejected() {
        let err = AppDescriptor::from_kv(&conf(&[("launcher.file", "/bin/true")])).unwrap_err();
        assert!(
            err.to_string()
                .contains("launcher.file must be specified relative to application root dir")
        );
    }

    #[test]
    fn parent_segments_in_launcher_are_rejected() {
        let err =
            AppDescriptor::from_kv(&conf(&[("launcher.file", "bin/../../run.sh")])).unwrap_err();
        assert!(err.to_string().contains("relative to application root dir"));
    }

    #[test]
    fn launcher_command_resolves_against_basedir() {
        let d = AppDescriptor::from_kv(&conf(&[
            ("launcher.file", "bin/run.sh"),
            ("launcher.args", "--port 8080 'hello world'"),
        ]))
        .unwrap();
        let command = d
            .launcher
            .unwrap()
            .command(Path::new("/srv/berth/apps/demo"));
        assert_eq!(command.first(), "/srv/berth/apps/demo/bin/run.sh");
        assert_eq!(command.tail(), &["--port", "8080", "hello world"]);
    }

    #[test]
    fn maxfiles_bounds_are_inclusive() {
        assert!(AppDescriptor::from_kv(&conf(&[("process.maxfiles", "128")])).is_ok());
        assert!(AppDescriptor::from_kv(&conf(&[("process.maxfiles", "65536")])).is_ok());

        let err = AppDescriptor::from_kv(&conf(&[("process.maxfiles", "127")])).unwrap_err();
        assert!(
            err.to_string()
                .contains("invalid process.maxfiles: allowable range is 128..65536")
        );
        let err = AppDescriptor::from_kv(&conf(&[("process.maxfiles", "65537")])).unwrap_err();
        assert!(err.to_string().contains("allowable range is 128..65536"));
    }

    #[test]
    fn maxprocs_bounds_are_inclusive() {
        assert!(AppDescriptor::from_kv(&conf(&[("process.maxprocs", "1024")])).is_ok());
        assert!(AppDescriptor::from_kv(&conf(&[("process.maxprocs", "515190")])).is_ok());

        let err = AppDescriptor::from_kv(&conf(&[("process.maxprocs", "1023")])).unwrap_err();
        assert!(
            err.to_string()
                .contains("invalid process.maxprocs: allowable range is 1024..515190")
        );
    }

    #[test]
    fn non_numeric_limit_is_rejected() {
        let err = AppDescriptor::from_kv(&conf(&[("process.maxfiles", "lots")])).unwrap_err();
        assert!(err.to_string().contains("invalid process.maxfiles"));
    }

    #[test]
    fn timeout_bounds_are_enforced() {
        let d = AppDescriptor::from_kv(&conf(&[("timeout.start", "5")])).unwrap();
        assert_eq!(d.start_timeout, Duration::from_secs(5));
        let d = AppDescriptor::from_kv(&conf(&[("timeout.stop", "180")])).unwrap();
        assert_eq!(d.stop_timeout, Duration::from_secs(180));

        let err = AppDescriptor::from_kv(&conf(&[("timeout.start", "4")])).unwrap_err();
        assert!(
            err.to_string()
                .contains("invalid timeout.start: allowable range is 5..180")
        );
        let err = AppDescriptor::from_kv(&conf(&[("timeout.stop", "181")])).unwrap_err();
        assert!(err.to_string().contains("invalid timeout.stop"));
    }

    #[test]
    fn bad_process_regex_is_rejected() {
        let err = AppDescriptor::from_kv(&conf(&[("process.regex", "ja(va")])).unwrap_err();
        assert!(
            err.to_string()
                .contains("Invalid regular expression \"ja(va\"")
        );
    }

    #[test]
    fn env_entries_are_extracted() {
        let d = AppDescriptor::from_kv(&conf(&[
            ("env.JAVA_HOME", "/opt/java"),
            ("env.LANG", "C"),
            ("timeout.start", "30"),
        ]))
        .unwrap();
        assert_eq!(
            d.env,
            vec![
                ("JAVA_HOME".to_string(), "/opt/java".to_string()),
                ("LANG".to_string(), "C".to_string()),
            ]
        );
    }

    #[test]
    fn bootstart_false_is_recognized() {
        let d = AppDescriptor::from_kv(&conf(&[("bootstart", "False")])).unwrap();
        assert!(!d.bootstart);
        let d = AppDescriptor::from_kv(&conf(&[("bootstart", "true")])).unwrap();
        assert!(d.bootstart);
    }

    #[test]
    fn knowhow_entries_are_collected() {
        let d = AppDescriptor::from_kv(&conf(&[
            ("knowhow.app.start", "https://wiki/start-howto"),
            ("knowhow.tx.deploy", "https://wiki/deploy-howto"),
        ]))
        .unwrap();
        assert_eq!(d.special_instructions().len(), 2);
        assert!(d.special_instructions().contains_key("knowhow.app.start"));
    }

    #[test]
    fn unbalanced_quotes_are_rejected() {
        let err = split_shell_words("--name 'unterminated").unwrap_err();
        assert!(err.to_string().contains("unbalanced quote"));
    }
}
