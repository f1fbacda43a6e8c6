//! # Configuration: data model, INI parsing, validation, expansion.
//!
//! The daemon reads an INI-style file with three section shapes:
//!
//! ```ini
//! [procvisor]
//! socket = /tmp/procvisor.sock
//! pidfile = procvisor.pid
//! loglevel = INFO
//! shutdown_timeout = 30
//!
//! [program:web]
//! command = /usr/bin/myserver --port 8080
//! numprocs = 2
//! autostart = true
//! autorestart = true
//! startsecs = 1
//! startretries = 3
//! stopsignal = TERM
//! stopwaitsecs = 10
//! stdout_logfile = /var/log/web.%(process_num)s.out
//! environment = PATH=/usr/bin,MODE="prod east"
//! healthcheck_type = tcp
//! healthcheck_port = 8080
//!
//! [group:backend]
//! programs = web, worker
//! ```
//!
//! Parsing produces a validated [`DaemonConfig`]; everything downstream
//! receives immutable records. Validation failures carry the offending
//! program name so operators can act on the message alone.
//!
//! Programs with `numprocs = n > 1` expand into instances `name:00` ..
//! `name:(n-1)`; log paths substitute `%(process_num)s` per instance.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::sys::signal::Signal;

use crate::error::ConfigError;

/// Health check variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HealthCheckKind {
    /// No probing; the process is never forced UNHEALTHY.
    #[default]
    None,
    /// TCP connect to `host:port`.
    Tcp,
    /// External command; exit 0 means healthy.
    Script,
}

/// Per-program health check configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthCheckConfig {
    /// Which prober to build.
    pub kind: HealthCheckKind,
    /// Delay between probes.
    pub interval: Duration,
    /// Per-probe timeout.
    pub timeout: Duration,
    /// Consecutive failures before the process is marked UNHEALTHY.
    pub retries: u32,
    /// Grace period after RUNNING before the first probe.
    pub start_period: Duration,
    /// TCP: host to connect to.
    pub host: String,
    /// TCP: port to connect to (required for `tcp`).
    pub port: Option<u16>,
    /// Script: command to run (required for `script`).
    pub command: Option<String>,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            kind: HealthCheckKind::None,
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(10),
            retries: 3,
            start_period: Duration::from_secs(10),
            host: "127.0.0.1".to_string(),
            port: None,
            command: None,
        }
    }
}

/// Static definition of one supervised program.
///
/// Constructed once by config parsing and immutable thereafter. For
/// `numprocs > 1` the program is specialized per instance via
/// [`ProgramConfig::instances`].
#[derive(Debug, Clone, PartialEq)]
pub struct ProgramConfig {
    /// Unique name; instance names append `:NN`.
    pub name: String,
    /// Argv after shell-style splitting; never empty.
    pub command: Vec<String>,
    /// Number of instances to run.
    pub numprocs: u32,
    /// Start when the daemon starts.
    pub autostart: bool,
    /// Restart after exits and health failures.
    pub autorestart: bool,
    /// Minimum uptime for a start to count as successful.
    pub startsecs: Duration,
    /// Failed starts tolerated before FATAL.
    pub startretries: u32,
    /// Signal name sent to the process group on stop (default TERM).
    pub stopsignal: String,
    /// Wait after `stopsignal` before escalating to SIGKILL.
    pub stopwaitsecs: Duration,
    /// Child stdout target (optional, `%(process_num)s` substituted).
    pub stdout_logfile: Option<String>,
    /// Child stderr target (optional, `%(process_num)s` substituted).
    pub stderr_logfile: Option<String>,
    /// Child environment; **replaces** the inherited environment.
    pub environment: HashMap<String, String>,
    /// Working directory for the child.
    pub directory: Option<PathBuf>,
    /// Run the child as this user (setgroups/setgid/setuid before exec).
    pub user: Option<String>,
    /// Explicit group; programs without one form an implicit singleton
    /// group named after the program.
    pub group: Option<String>,
    /// Instance index in `0..numprocs`.
    pub process_num: u32,
    /// Health probe configuration.
    pub healthcheck: HealthCheckConfig,
}

impl ProgramConfig {
    /// Minimal program for construction in code (tests, embedding).
    pub fn new(name: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            name: name.into(),
            command,
            numprocs: 1,
            autostart: true,
            autorestart: true,
            startsecs: Duration::from_secs(1),
            startretries: 3,
            stopsignal: "TERM".to_string(),
            stopwaitsecs: Duration::from_secs(10),
            stdout_logfile: None,
            stderr_logfile: None,
            environment: HashMap::new(),
            directory: None,
            user: None,
            group: None,
            process_num: 0,
            healthcheck: HealthCheckConfig::default(),
        }
    }

    /// Expands this program into its per-instance configs.
    ///
    /// `numprocs = 1` yields the bare name; otherwise instances are named
    /// `name:00`, `name:01`, ... and carry their index.
    pub fn instances(&self) -> Vec<ProgramConfig> {
        if self.numprocs <= 1 {
            return vec![self.clone()];
        }
        (0..self.numprocs)
            .map(|i| {
                let mut inst = self.clone();
                inst.name = format!("{}:{:02}", self.name, i);
                inst.process_num = i;
                inst
            })
            .collect()
    }

    /// The group this program's processes belong to: the explicit group,
    /// or the implicit singleton group named after the program.
    pub fn effective_group(&self) -> &str {
        self.group.as_deref().unwrap_or_else(|| self.base_name())
    }

    /// Program name without the instance suffix.
    pub fn base_name(&self) -> &str {
        match self.name.split_once(':') {
            Some((base, _)) => base,
            None => &self.name,
        }
    }

    /// Resolves `stopsignal` to a concrete signal.
    ///
    /// Validation guarantees this cannot fail after parse; the TERM
    /// fallback only covers hand-built configs.
    pub fn stop_signal(&self) -> Signal {
        signal_from_name(&self.stopsignal).unwrap_or(Signal::SIGTERM)
    }
}

/// Whole-daemon configuration record.
#[derive(Debug, Clone, PartialEq)]
pub struct DaemonConfig {
    /// Daemon log file (empty = stderr only).
    pub logfile: Option<PathBuf>,
    /// PID / singleton lock file.
    pub pidfile: PathBuf,
    /// Log level name (validated).
    pub loglevel: String,
    /// Control socket path.
    pub socket_path: PathBuf,
    /// Whole-system graceful shutdown deadline.
    pub shutdown_timeout: Duration,
    /// Program definitions, in file order.
    pub programs: Vec<ProgramConfig>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            logfile: None,
            pidfile: PathBuf::from("procvisor.pid"),
            loglevel: "INFO".to_string(),
            socket_path: PathBuf::from("/tmp/procvisor.sock"),
            shutdown_timeout: Duration::from_secs(30),
            programs: Vec::new(),
        }
    }
}

/// Substitutes the `%(process_num)s` placeholder in a log path.
pub fn expand_logfile(path: &str, process_num: u32) -> String {
    path.replace("%(process_num)s", &process_num.to_string())
}

/// Resolves a POSIX signal name, accepting an optional `SIG` prefix.
pub fn signal_from_name(name: &str) -> Option<Signal> {
    let upper = name.trim().to_ascii_uppercase();
    let normalized = if upper.starts_with("SIG") {
        upper
    } else {
        format!("SIG{upper}")
    };
    Signal::iterator().find(|s| s.as_str() == normalized)
}

/// Splits a command line into argv, honoring single and double quotes.
///
/// Backslash escapes the next character outside single quotes. An
/// unterminated quote is an error.
pub fn shell_split(input: &str) -> Result<Vec<String>, String> {
    let mut argv = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = input.chars();

    'outer: loop {
        let ch = match chars.next() {
            Some(c) => c,
            None => break,
        };
        match ch {
            c if c.is_whitespace() => {
                if in_word {
                    argv.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => continue 'outer,
                        Some(c) => current.push(c),
                        None => return Err("unterminated single quote".to_string()),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => continue 'outer,
                        Some('\\') => match chars.next() {
                            Some(c) => current.push(c),
                            None => return Err("trailing backslash in quotes".to_string()),
                        },
                        Some(c) => current.push(c),
                        None => return Err("unterminated double quote".to_string()),
                    }
                }
            }
            '\\' => {
                in_word = true;
                match chars.next() {
                    Some(c) => current.push(c),
                    None => return Err("trailing backslash".to_string()),
                }
            }
            c => {
                in_word = true;
                current.push(c);
            }
        }
    }
    if in_word {
        argv.push(current);
    }
    Ok(argv)
}

/// Parses the `environment` value: `KEY=val,KEY2="quoted, val"`.
fn parse_env(value: &str) -> HashMap<String, String> {
    let mut env = HashMap::new();
    let bytes: Vec<char> = value.chars().collect();
    let n = bytes.len();
    let mut i = 0;

    while i < n {
        while i < n && (bytes[i] == ' ' || bytes[i] == '\t') {
            i += 1;
        }
        if i >= n {
            break;
        }

        let key_start = i;
        while i < n && bytes[i] != '=' {
            i += 1;
        }
        if i >= n {
            break;
        }
        let key: String = bytes[key_start..i].iter().collect::<String>().trim().to_string();
        i += 1;

        while i < n && (bytes[i] == ' ' || bytes[i] == '\t') {
            i += 1;
        }
        if i >= n {
            env.insert(key, String::new());
            break;
        }

        if bytes[i] == '"' || bytes[i] == '\'' {
            let quote = bytes[i];
            i += 1;
            let val_start = i;
            while i < n && bytes[i] != quote {
                i += 1;
            }
            env.insert(key, bytes[val_start..i].iter().collect());
            if i < n {
                i += 1;
            }
            while i < n && (bytes[i] == ',' || bytes[i] == ' ' || bytes[i] == '\t') {
                i += 1;
            }
        } else {
            let val_start = i;
            while i < n && bytes[i] != ',' {
                i += 1;
            }
            let val: String = bytes[val_start..i].iter().collect::<String>().trim().to_string();
            env.insert(key, val);
            if i < n {
                i += 1;
            }
        }
    }

    env
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

// ---------------------------------------------------------------------------
// INI reading
// ---------------------------------------------------------------------------

struct Section {
    name: String,
    entries: Vec<(String, String)>,
}

impl Section {
    fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn get_u64(&self, key: &str, default: u64, program: &str) -> Result<u64, ConfigError> {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw.parse::<u64>().map_err(|_| ConfigError::Validation {
                program: program.to_string(),
                message: format!("{key} must be a non-negative integer, got '{raw}'"),
            }),
        }
    }

    fn get_bool(&self, key: &str, default: bool) -> bool {
        self.get(key).map(parse_bool).unwrap_or(default)
    }
}

fn read_sections(text: &str) -> Result<Vec<Section>, ConfigError> {
    let mut sections: Vec<Section> = Vec::new();

    for (idx, raw_line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if let Some(header) = line.strip_prefix('[') {
            let name = header.strip_suffix(']').ok_or(ConfigError::Syntax {
                line: line_no,
                message: "unterminated section header".to_string(),
            })?;
            sections.push(Section {
                name: name.trim().to_string(),
                entries: Vec::new(),
            });
            continue;
        }

        let (key, value) = line.split_once('=').ok_or(ConfigError::Syntax {
            line: line_no,
            message: format!("expected 'key = value', got '{line}'"),
        })?;
        let section = sections.last_mut().ok_or(ConfigError::Syntax {
            line: line_no,
            message: "key outside of any section".to_string(),
        })?;
        section
            .entries
            .push((key.trim().to_ascii_lowercase(), value.trim().to_string()));
    }

    Ok(sections)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn invalid(program: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        program: program.to_string(),
        message: message.into(),
    }
}

fn validate_user(user: &str, program: &str) -> Result<(), ConfigError> {
    match nix::unistd::User::from_name(user) {
        Ok(Some(_)) => Ok(()),
        Ok(None) => Err(invalid(program, format!("user '{user}' does not exist"))),
        Err(err) => Err(invalid(
            program,
            format!("cannot resolve user '{user}': {err}"),
        )),
    }
}

fn validate_directory(dir: &Path, program: &str) -> Result<(), ConfigError> {
    if !dir.exists() {
        return Err(invalid(
            program,
            format!("directory '{}' does not exist", dir.display()),
        ));
    }
    if !dir.is_dir() {
        return Err(invalid(
            program,
            format!("'{}' is not a directory", dir.display()),
        ));
    }
    Ok(())
}

fn validate_logfile(logfile: &str, program: &str) -> Result<(), ConfigError> {
    let substituted = expand_logfile(logfile, 0);
    let parent = Path::new(&substituted)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    if !parent.exists() {
        return Err(invalid(
            program,
            format!("log directory '{}' does not exist", parent.display()),
        ));
    }
    Ok(())
}

fn validate_healthcheck(hc: &HealthCheckConfig, program: &str) -> Result<(), ConfigError> {
    if hc.interval.is_zero() {
        return Err(invalid(program, "healthcheck_interval must be at least 1"));
    }
    match hc.kind {
        HealthCheckKind::None => Ok(()),
        HealthCheckKind::Tcp => match hc.port {
            None => Err(invalid(
                program,
                "healthcheck_port is required for tcp health checks",
            )),
            Some(0) => Err(invalid(
                program,
                "healthcheck_port must be between 1 and 65535",
            )),
            Some(_) => Ok(()),
        },
        HealthCheckKind::Script => {
            if hc.command.as_deref().unwrap_or("").is_empty() {
                Err(invalid(
                    program,
                    "healthcheck_command is required for script checks",
                ))
            } else {
                Ok(())
            }
        }
    }
}

fn validate_program(prog: &ProgramConfig) -> Result<(), ConfigError> {
    if prog.command.is_empty() {
        return Err(invalid(&prog.name, "missing command"));
    }
    if prog.numprocs == 0 {
        return Err(invalid(&prog.name, "numprocs must be at least 1"));
    }
    if signal_from_name(&prog.stopsignal).is_none() {
        return Err(invalid(
            &prog.name,
            format!("invalid stopsignal '{}'", prog.stopsignal),
        ));
    }
    if let Some(user) = &prog.user {
        validate_user(user, &prog.name)?;
    }
    if let Some(dir) = &prog.directory {
        validate_directory(dir, &prog.name)?;
    }
    if let Some(logfile) = &prog.stdout_logfile {
        validate_logfile(logfile, &prog.name)?;
    }
    if let Some(logfile) = &prog.stderr_logfile {
        validate_logfile(logfile, &prog.name)?;
    }
    validate_healthcheck(&prog.healthcheck, &prog.name)
}

const VALID_LOGLEVELS: &[&str] = &["TRACE", "DEBUG", "INFO", "WARN", "WARNING", "ERROR"];

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Reads and validates a configuration file.
pub fn load(path: &Path) -> Result<DaemonConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    from_ini_str(&text)
}

/// Parses and validates configuration text.
pub fn from_ini_str(text: &str) -> Result<DaemonConfig, ConfigError> {
    let sections = read_sections(text)?;
    let mut cfg = DaemonConfig::default();

    for section in &sections {
        if section.name == "procvisor" {
            parse_daemon_section(section, &mut cfg)?;
        }
    }

    for section in &sections {
        if let Some(name) = section.name.strip_prefix("program:") {
            let prog = parse_program_section(name, section)?;
            if cfg.programs.iter().any(|p| p.name == prog.name) {
                return Err(invalid(name, "duplicate program section"));
            }
            cfg.programs.push(prog);
        }
    }

    for section in &sections {
        if let Some(group_name) = section.name.strip_prefix("group:") {
            let members: Vec<String> = section
                .get("programs")
                .unwrap_or("")
                .split(',')
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect();
            for prog in cfg.programs.iter_mut() {
                if members.iter().any(|m| m == &prog.name) {
                    prog.group = Some(group_name.trim().to_string());
                }
            }
        }
    }

    Ok(cfg)
}

fn parse_daemon_section(section: &Section, cfg: &mut DaemonConfig) -> Result<(), ConfigError> {
    if let Some(logfile) = section.get("logfile") {
        cfg.logfile = Some(PathBuf::from(logfile));
    }
    if let Some(pidfile) = section.get("pidfile") {
        cfg.pidfile = PathBuf::from(pidfile);
    }
    if let Some(socket) = section.get("socket") {
        cfg.socket_path = PathBuf::from(socket);
    }
    if let Some(level) = section.get("loglevel") {
        let upper = level.to_ascii_uppercase();
        if !VALID_LOGLEVELS.contains(&upper.as_str()) {
            return Err(ConfigError::Daemon {
                message: format!(
                    "invalid loglevel '{level}', valid levels: {}",
                    VALID_LOGLEVELS.join(", ")
                ),
            });
        }
        cfg.loglevel = upper;
    }
    if let Some(raw) = section.get("shutdown_timeout") {
        let secs = raw.parse::<u64>().map_err(|_| ConfigError::Daemon {
            message: format!("shutdown_timeout must be an integer, got '{raw}'"),
        })?;
        if secs == 0 {
            return Err(ConfigError::Daemon {
                message: "shutdown_timeout must be positive".to_string(),
            });
        }
        cfg.shutdown_timeout = Duration::from_secs(secs);
    }
    Ok(())
}

fn parse_program_section(name: &str, section: &Section) -> Result<ProgramConfig, ConfigError> {
    let raw_command = section.get("command").unwrap_or("");
    let command = shell_split(raw_command).map_err(|err| invalid(name, err))?;

    let hc_kind = match section
        .get("healthcheck_type")
        .unwrap_or("none")
        .to_ascii_lowercase()
        .as_str()
    {
        "tcp" => HealthCheckKind::Tcp,
        "script" => HealthCheckKind::Script,
        _ => HealthCheckKind::None,
    };

    let port = match section.get("healthcheck_port") {
        None => None,
        Some(raw) => Some(raw.parse::<u16>().map_err(|_| {
            invalid(name, "healthcheck_port must be between 1 and 65535")
        })?),
    };

    let healthcheck = HealthCheckConfig {
        kind: hc_kind,
        interval: Duration::from_secs(section.get_u64("healthcheck_interval", 30, name)?),
        timeout: Duration::from_secs(section.get_u64("healthcheck_timeout", 10, name)?),
        retries: section.get_u64("healthcheck_retries", 3, name)? as u32,
        start_period: Duration::from_secs(section.get_u64("healthcheck_start_period", 10, name)?),
        host: section
            .get("healthcheck_host")
            .unwrap_or("127.0.0.1")
            .to_string(),
        port,
        command: section.get("healthcheck_command").map(str::to_string),
    };

    let prog = ProgramConfig {
        name: name.to_string(),
        command,
        numprocs: section.get_u64("numprocs", 1, name)? as u32,
        autostart: section.get_bool("autostart", true),
        autorestart: section.get_bool("autorestart", true),
        startsecs: Duration::from_secs(section.get_u64("startsecs", 1, name)?),
        startretries: section.get_u64("startretries", 3, name)? as u32,
        stopsignal: section.get("stopsignal").unwrap_or("TERM").to_string(),
        stopwaitsecs: Duration::from_secs(section.get_u64("stopwaitsecs", 10, name)?),
        stdout_logfile: section.get("stdout_logfile").map(str::to_string),
        stderr_logfile: section.get("stderr_logfile").map(str::to_string),
        environment: parse_env(section.get("environment").unwrap_or("")),
        directory: section.get("directory").map(PathBuf::from),
        user: section.get("user").map(str::to_string),
        group: None,
        process_num: 0,
        healthcheck,
    };

    validate_program(&prog)?;
    Ok(prog)
}
