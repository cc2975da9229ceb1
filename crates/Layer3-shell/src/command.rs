//! Command descriptors and their argument parser
//!
//! A [`CommandSpec`] declares a command's parameters; it is compiled into a
//! `clap` parser on demand. Parsing turns a token list into [`BoundArgs`] or
//! a [`UsageError`], and `-h/--help` yields the rendered help instead.

use clap::builder::PossibleValuesParser;
use clap::error::ErrorKind;
use clap::{Arg, ArgAction, ArgMatches, ColorChoice, Command};
use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::OnceLock;
use taskline_foundation::{CommandError, Error, Result, UsageError};
use taskline_task::ExecutionMode;

// ============================================================================
// Values
// ============================================================================

/// Coercion applied to raw string arguments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValueType {
    #[default]
    Str,
    Int,
    Float,
}

impl ValueType {
    pub fn coerce(&self, raw: &str) -> std::result::Result<Value, String> {
        match self {
            ValueType::Str => Ok(Value::Str(raw.to_string())),
            ValueType::Int => raw
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| format!("invalid int value: '{}'", raw)),
            ValueType::Float => raw
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| format!("invalid float value: '{}'", raw)),
        }
    }
}

/// A bound argument value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    List(Vec<Value>),
    /// Optional parameter left unset, with no default
    Missing,
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => f.write_str(s),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(x) => write!(f, "{}", x),
            Value::Bool(b) => write!(f, "{}", b),
            Value::List(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                f.write_str(&parts.join(" "))
            }
            Value::Missing => Ok(()),
        }
    }
}

// ============================================================================
// Parameters
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// Required positional
    Positional,
    /// Positional that may be omitted
    Optional,
    /// Named option taking a value (`-x value` / `--name value`)
    Option,
    /// Boolean switch, false unless given
    Flag,
    /// Trailing positionals collected into a list
    VarArgs,
}

impl ParamKind {
    fn is_positional(&self) -> bool {
        matches!(
            self,
            ParamKind::Positional | ParamKind::Optional | ParamKind::VarArgs
        )
    }
}

/// One declared parameter with its annotation
#[derive(Debug, Clone)]
pub struct Param {
    name: String,
    kind: ParamKind,
    help: String,
    abbrev: Option<char>,
    value_type: ValueType,
    choices: Vec<String>,
    metavar: Option<String>,
    default: Option<String>,
}

impl Param {
    fn with_kind(name: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            kind,
            help: String::new(),
            abbrev: None,
            value_type: ValueType::Str,
            choices: Vec::new(),
            metavar: None,
            default: None,
        }
    }

    pub fn positional(name: impl Into<String>) -> Self {
        Self::with_kind(name, ParamKind::Positional)
    }

    pub fn optional(name: impl Into<String>, default: impl ToString) -> Self {
        Self::with_kind(name, ParamKind::Optional).default(default)
    }

    /// Positional that may be omitted, unset when absent
    pub fn maybe(name: impl Into<String>) -> Self {
        Self::with_kind(name, ParamKind::Optional)
    }

    pub fn option(name: impl Into<String>) -> Self {
        Self::with_kind(name, ParamKind::Option)
    }

    pub fn flag(name: impl Into<String>) -> Self {
        Self::with_kind(name, ParamKind::Flag)
    }

    pub fn varargs(name: impl Into<String>) -> Self {
        Self::with_kind(name, ParamKind::VarArgs)
    }

    pub fn help(mut self, help: impl Into<String>) -> Self {
        self.help = help.into();
        self
    }

    pub fn short(mut self, abbrev: char) -> Self {
        self.abbrev = Some(abbrev);
        self
    }

    pub fn value_type(mut self, value_type: ValueType) -> Self {
        self.value_type = value_type;
        self
    }

    pub fn int(self) -> Self {
        self.value_type(ValueType::Int)
    }

    pub fn float(self) -> Self {
        self.value_type(ValueType::Float)
    }

    pub fn choices<I, S>(mut self, choices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.choices = choices.into_iter().map(Into::into).collect();
        self
    }

    pub fn metavar(mut self, metavar: impl Into<String>) -> Self {
        self.metavar = Some(metavar.into());
        self
    }

    pub fn default(mut self, default: impl ToString) -> Self {
        self.default = Some(default.to_string());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ParamKind {
        self.kind
    }

    fn to_arg(&self) -> Arg {
        let mut arg = Arg::new(self.name.clone());
        if !self.help.is_empty() {
            arg = arg.help(self.help.clone());
        }
        if let Some(metavar) = &self.metavar {
            arg = arg.value_name(metavar.clone());
        }

        arg = match self.kind {
            ParamKind::Positional => arg.required(true).action(ArgAction::Set),
            ParamKind::Optional => arg.required(false).action(ArgAction::Set),
            ParamKind::Option => arg.long(self.name.clone()).action(ArgAction::Set),
            ParamKind::Flag => arg.long(self.name.clone()).action(ArgAction::SetTrue),
            ParamKind::VarArgs => arg.num_args(0..).action(ArgAction::Append),
        };
        if let Some(abbrev) = self.abbrev {
            arg = arg.short(abbrev);
        }
        if let (Some(default), false) = (&self.default, self.kind == ParamKind::Flag) {
            arg = arg.default_value(default.clone());
        }
        if !self.choices.is_empty() && self.kind != ParamKind::Flag {
            arg = arg.value_parser(PossibleValuesParser::new(self.choices.clone()));
        }
        arg
    }

    fn extract(&self, matches: &ArgMatches) -> std::result::Result<Value, UsageError> {
        let coerce = |raw: &str| {
            self.value_type
                .coerce(raw)
                .map_err(|e| UsageError::new(format!("argument {}: {}", self.name, e)))
        };

        match self.kind {
            ParamKind::Flag => Ok(Value::Bool(matches.get_flag(&self.name))),
            ParamKind::VarArgs => matches
                .get_many::<String>(&self.name)
                .map(|values| {
                    values
                        .map(|v| coerce(v.as_str()))
                        .collect::<std::result::Result<Vec<Value>, UsageError>>()
                })
                .transpose()
                .map(|list| Value::List(list.unwrap_or_default())),
            _ => match matches.get_one::<String>(&self.name) {
                Some(raw) => coerce(raw.as_str()),
                None => Ok(Value::Missing),
            },
        }
    }
}

// ============================================================================
// CommandSpec
// ============================================================================

/// Declaration of one command: name, help, execution class and parameters
#[derive(Debug, Clone)]
pub struct CommandSpec {
    name: String,
    about: String,
    mode: ExecutionMode,
    params: Vec<Param>,
    kwargs: Option<String>,
}

/// Result of parsing a token list
#[derive(Debug, Clone, PartialEq)]
pub enum Parsed {
    Args(BoundArgs),
    /// `-h/--help` was requested; carries the rendered help
    Help(String),
}

impl CommandSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            about: String::new(),
            mode: ExecutionMode::Sync,
            params: Vec::new(),
            kwargs: None,
        }
    }

    pub fn about(mut self, about: impl Into<String>) -> Self {
        self.about = about.into();
        self
    }

    pub fn mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn threaded(self) -> Self {
        self.mode(ExecutionMode::Threaded)
    }

    pub fn isolated(self) -> Self {
        self.mode(ExecutionMode::Isolated)
    }

    pub fn param(mut self, param: Param) -> Self {
        self.params.push(param);
        self
    }

    /// Accept `name=value` tokens, collected under `name`
    pub fn kwargs(mut self, name: impl Into<String>) -> Self {
        self.kwargs = Some(name.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.about
    }

    pub fn execution_mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    /// Check the declaration for mistakes clap would otherwise hit at parse
    /// time
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(Error::configuration(format!("command {}: {}", self.name, msg)));

        if self.name.is_empty() || self.name.chars().any(char::is_whitespace) {
            return fail(format!("invalid command name {:?}", self.name));
        }

        let mut names = HashSet::new();
        let mut abbrevs = HashSet::new();
        let mut seen_optional = false;
        let mut seen_varargs = false;

        for param in &self.params {
            if !names.insert(param.name.as_str()) {
                return fail(format!("duplicate parameter {}", param.name));
            }
            if param.name == "help" && !param.kind.is_positional() {
                return fail("parameter name 'help' is reserved".to_string());
            }
            if let Some(abbrev) = param.abbrev {
                if abbrev == 'h' {
                    return fail(format!("abbreviation -h of {} is reserved for help", param.name));
                }
                if !abbrevs.insert(abbrev) {
                    return fail(format!("duplicate abbreviation -{}", abbrev));
                }
            }

            if param.kind.is_positional() && seen_varargs {
                return fail(format!("{} follows the variadic positional", param.name));
            }
            match param.kind {
                ParamKind::Positional if seen_optional => {
                    return fail(format!(
                        "required positional {} follows an optional one",
                        param.name
                    ));
                }
                ParamKind::Optional => seen_optional = true,
                ParamKind::VarArgs => seen_varargs = true,
                _ => {}
            }

            if param.kind == ParamKind::Flag {
                if let Some(default) = param.default.as_deref().filter(|d| *d != "false") {
                    return fail(format!(
                        "flag {} has non-boolean default {:?}",
                        param.name, default
                    ));
                }
                continue;
            }
            if let Some(default) = &param.default {
                if !param.choices.is_empty() && !param.choices.contains(default) {
                    return fail(format!(
                        "default {:?} of {} is not one of {:?}",
                        default, param.name, param.choices
                    ));
                }
                if let Err(e) = param.value_type.coerce(default) {
                    return fail(format!("default of {}: {}", param.name, e));
                }
            }
            for choice in &param.choices {
                if let Err(e) = param.value_type.coerce(choice) {
                    return fail(format!("choice of {}: {}", param.name, e));
                }
            }
        }

        if let Some(kwargs) = &self.kwargs {
            if names.contains(kwargs.as_str()) {
                return fail(format!("keyword arguments {} collide with a parameter", kwargs));
            }
        }
        Ok(())
    }

    fn build_parser(&self) -> Command {
        let mut cmd = Command::new(self.name.clone())
            .no_binary_name(true)
            .allow_negative_numbers(true)
            .disable_version_flag(true)
            .color(ColorChoice::Never);
        if !self.about.is_empty() {
            cmd = cmd.about(self.about.clone());
        }
        for param in &self.params {
            cmd = cmd.arg(param.to_arg());
        }
        cmd
    }

    /// Rendered help text
    pub fn help(&self) -> String {
        self.build_parser().render_help().to_string()
    }

    /// Bind `tokens` (the arguments after the command name)
    pub fn parse(&self, tokens: &[String]) -> std::result::Result<Parsed, UsageError> {
        let (tokens, kwargs) = self.split_kwargs(tokens)?;

        let matches = match self.build_parser().try_get_matches_from(tokens) {
            Ok(matches) => matches,
            Err(e) if e.kind() == ErrorKind::DisplayHelp => return Ok(Parsed::Help(e.to_string())),
            Err(e) => return Err(usage_from_clap(&e)),
        };

        let mut values = BTreeMap::new();
        for param in &self.params {
            values.insert(param.name.clone(), param.extract(&matches)?);
        }
        Ok(Parsed::Args(BoundArgs { values, kwargs }))
    }

    /// Pull `name=value` tokens out when the command accepts them
    fn split_kwargs(
        &self,
        tokens: &[String],
    ) -> std::result::Result<(Vec<String>, Vec<(String, String)>), UsageError> {
        let Some(pattern) = self.kwargs.as_ref().and(kwarg_pattern()) else {
            return Ok((tokens.to_vec(), Vec::new()));
        };

        let mut rest = Vec::new();
        let mut kwargs: Vec<(String, String)> = Vec::new();
        for token in tokens {
            match token.split_once('=') {
                Some((name, value)) if pattern.is_match(token) => {
                    kwargs.push((name.to_string(), value.to_string()))
                }
                _ => rest.push(token.clone()),
            }
        }

        let collisions: Vec<&str> = kwargs
            .iter()
            .map(|(name, _)| name.as_str())
            .filter(|name| self.params.iter().any(|p| p.name == *name))
            .collect();
        if !collisions.is_empty() {
            return Err(UsageError::new(format!(
                "colliding keyword arguments: {}",
                collisions.join(" ")
            )));
        }
        Ok((rest, kwargs))
    }
}

fn kwarg_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[a-zA-Z_]\w*=").ok())
        .as_ref()
}

/// First line of a clap error, without its `error: ` tag
fn usage_from_clap(err: &clap::Error) -> UsageError {
    let rendered = err.to_string();
    let first = rendered.lines().next().unwrap_or_default();
    let message = first.strip_prefix("error: ").unwrap_or(first).trim();
    UsageError::new(message).with_exit_code(err.exit_code())
}

// ============================================================================
// BoundArgs
// ============================================================================

/// Parsed arguments, by parameter name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoundArgs {
    values: BTreeMap<String, Value>,
    kwargs: Vec<(String, String)>,
}

fn argument_error(name: &str, expected: &str) -> CommandError {
    CommandError::failed("ArgumentError", format!("argument {}: expected {}", name, expected))
}

impl BoundArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder used when binding arguments by hand
    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.values.insert(name.into(), value);
        self
    }

    pub fn with_kwarg(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.kwargs.push((name.into(), value.into()));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn str(&self, name: &str) -> std::result::Result<&str, CommandError> {
        self.opt_str(name).ok_or_else(|| argument_error(name, "a string"))
    }

    pub fn opt_str(&self, name: &str) -> Option<&str> {
        match self.get(name) {
            Some(Value::Str(s)) => Some(s),
            _ => None,
        }
    }

    pub fn int(&self, name: &str) -> std::result::Result<i64, CommandError> {
        match self.get(name) {
            Some(Value::Int(n)) => Ok(*n),
            _ => Err(argument_error(name, "an integer")),
        }
    }

    pub fn float(&self, name: &str) -> std::result::Result<f64, CommandError> {
        match self.get(name) {
            Some(Value::Float(x)) => Ok(*x),
            Some(Value::Int(n)) => Ok(*n as f64),
            _ => Err(argument_error(name, "a number")),
        }
    }

    pub fn flag(&self, name: &str) -> bool {
        matches!(self.get(name), Some(Value::Bool(true)))
    }

    /// Items of a variadic parameter, rendered as strings
    pub fn list(&self, name: &str) -> Vec<String> {
        match self.get(name) {
            Some(Value::List(items)) => items.iter().map(|v| v.to_string()).collect(),
            Some(Value::Missing) | None => Vec::new(),
            Some(other) => vec![other.to_string()],
        }
    }

    pub fn kwargs(&self) -> &[(String, String)] {
        &self.kwargs
    }
}
