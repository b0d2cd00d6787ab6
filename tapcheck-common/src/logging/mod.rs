// Logging utilities for the tapcheck harness
//
// This module provides the component-based logging used across the workspace:
// - Component-based structured logging with a node (process) id prefix
// - Child loggers that inherit the node id and record their parent component
// - Per-component level overrides applied through env_logger
// - Context for message path tracing inside handlers

use chrono::Local;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::{self, Arguments, Display, Formatter};
use std::io::Write;

/// Predefined components for logging categorization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    Node,
    Hub,
    Registry,
    Dispatcher,
    Convergence,
    Harness,
    CLI,
    Custom(&'static str),
}

impl Component {
    /// Get the string representation of the component
    pub fn as_str(&self) -> &str {
        match self {
            Component::Node => "Node",
            Component::Hub => "Hub",
            Component::Registry => "Registry",
            Component::Dispatcher => "Dispatcher",
            Component::Convergence => "Convergence",
            Component::Harness => "Harness",
            Component::CLI => "CLI",
            Component::Custom(name) => name,
        }
    }

    /// Log target used for this component; per-component filters match on it
    pub fn target(&self) -> &'static str {
        match self {
            Component::Node => "tapcheck::node",
            Component::Hub => "tapcheck::hub",
            Component::Registry => "tapcheck::registry",
            Component::Dispatcher => "tapcheck::dispatcher",
            Component::Convergence => "tapcheck::convergence",
            Component::Harness => "tapcheck::harness",
            Component::CLI => "tapcheck::cli",
            Component::Custom(_) => "tapcheck::custom",
        }
    }
}

// Lightweight Display helpers to avoid prefix String allocations
struct ComponentPrefixDisplay {
    parent: Option<Component>,
    component: Component,
}

impl Display for ComponentPrefixDisplay {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.parent {
            Some(parent) if parent != Component::Node => {
                write!(f, "{}.{}", parent.as_str(), self.component.as_str())
            }
            _ => write!(f, "{}", self.component.as_str()),
        }
    }
}

struct MaybePathDisplay<'a>(Option<&'a str>);

impl Display for MaybePathDisplay<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if let Some(path) = self.0 {
            write!(f, "|path={path}")
        } else {
            Ok(())
        }
    }
}

/// A helper for creating component-specific loggers with node ID tracking
#[derive(Clone, Debug)]
pub struct Logger {
    /// Component this logger is for
    component: Component,
    /// Node (process) ID the log lines belong to
    node_id: String,
    /// Parent component for hierarchical logging (if any)
    parent_component: Option<Component>,
    /// Message path being handled, for handler tracing
    message_path: Option<String>,
}

impl Logger {
    /// Create a new root logger for a specific component and node ID
    pub fn new_root(component: Component, node_id: &str) -> Self {
        Self {
            component,
            node_id: node_id.to_string(),
            parent_component: None,
            message_path: None,
        }
    }

    /// Create a child logger with the same node ID but different component
    pub fn with_component(&self, component: Component) -> Self {
        Self {
            component,
            node_id: self.node_id.clone(),
            parent_component: Some(self.component),
            message_path: self.message_path.clone(),
        }
    }

    /// Create a logger that tags every line with a message path
    pub fn with_message_path(&self, path: impl Into<String>) -> Self {
        Self {
            component: self.component,
            node_id: self.node_id.clone(),
            parent_component: self.parent_component,
            message_path: Some(path.into()),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn component(&self) -> Component {
        self.component
    }

    pub fn message_path(&self) -> Option<&str> {
        self.message_path.as_deref()
    }

    fn is_root_node(&self) -> bool {
        self.component == Component::Node && self.parent_component.is_none()
    }

    fn prefix(&self) -> ComponentPrefixDisplay {
        ComponentPrefixDisplay {
            parent: self.parent_component,
            component: self.component,
        }
    }

    /// Log a debug message; the `log_debug!` macro builds the arguments
    pub fn debug_args(&self, args: Arguments) {
        let target = self.component.target();
        if log::log_enabled!(target: target, log::Level::Debug) {
            if self.is_root_node() {
                debug!(target: target, "[{}] {}", self.node_id, args);
            } else {
                debug!(
                    target: target,
                    "[{}][{}{}] {}",
                    self.node_id,
                    self.prefix(),
                    MaybePathDisplay(self.message_path()),
                    args
                );
            }
        }
    }

    /// Log an info message using fmt::Arguments
    pub fn info_args(&self, args: Arguments) {
        let target = self.component.target();
        if log::log_enabled!(target: target, log::Level::Info) {
            if self.is_root_node() {
                info!(target: target, "[{}] {}", self.node_id, args);
            } else {
                info!(
                    target: target,
                    "[{}][{}{}] {}",
                    self.node_id,
                    self.prefix(),
                    MaybePathDisplay(self.message_path()),
                    args
                );
            }
        }
    }

    /// Log a warning using fmt::Arguments
    pub fn warn_args(&self, args: Arguments) {
        let target = self.component.target();
        if log::log_enabled!(target: target, log::Level::Warn) {
            if self.is_root_node() {
                warn!(target: target, "[{}] {}", self.node_id, args);
            } else {
                warn!(
                    target: target,
                    "[{}][{}{}] {}",
                    self.node_id,
                    self.prefix(),
                    MaybePathDisplay(self.message_path()),
                    args
                );
            }
        }
    }

    /// Log an error using fmt::Arguments
    pub fn error_args(&self, args: Arguments) {
        let target = self.component.target();
        if log::log_enabled!(target: target, log::Level::Error) {
            if self.is_root_node() {
                error!(target: target, "[{}] {}", self.node_id, args);
            } else {
                error!(
                    target: target,
                    "[{}][{}{}] {}",
                    self.node_id,
                    self.prefix(),
                    MaybePathDisplay(self.message_path()),
                    args
                );
            }
        }
    }
}

/// Log levels accepted by [`LoggingConfig`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" | "-" => Ok(LogLevel::Off),
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" | "a" => Ok(LogLevel::Trace),
            other => Err(format!("unknown log level '{other}'")),
        }
    }
}

/// Key used to override the level of one component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentKey {
    Node,
    Hub,
    Registry,
    Dispatcher,
    Convergence,
    Harness,
    CLI,
}

impl std::str::FromStr for ComponentKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "node" => Ok(ComponentKey::Node),
            "hub" => Ok(ComponentKey::Hub),
            "registry" => Ok(ComponentKey::Registry),
            "dispatcher" => Ok(ComponentKey::Dispatcher),
            "convergence" => Ok(ComponentKey::Convergence),
            "harness" => Ok(ComponentKey::Harness),
            "cli" => Ok(ComponentKey::CLI),
            other => Err(format!("unknown component '{other}'")),
        }
    }
}

/// Parse a `component=level` override such as `hub=debug`
pub fn parse_component_level(s: &str) -> Result<(ComponentKey, LogLevel), String> {
    let (component, level) = s
        .split_once('=')
        .ok_or_else(|| format!("expected component=level, got '{s}'"))?;
    Ok((component.trim().parse()?, level.trim().parse()?))
}

impl ComponentKey {
    fn target(self) -> &'static str {
        let component = match self {
            ComponentKey::Node => Component::Node,
            ComponentKey::Hub => Component::Hub,
            ComponentKey::Registry => Component::Registry,
            ComponentKey::Dispatcher => Component::Dispatcher,
            ComponentKey::Convergence => Component::Convergence,
            ComponentKey::Harness => Component::Harness,
            ComponentKey::CLI => Component::CLI,
        };
        component.target()
    }
}

/// Logging configuration: a default level plus per-component overrides
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub default_level: LogLevel,
    pub component_levels: HashMap<ComponentKey, LogLevel>,
    pub timestamps: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl LoggingConfig {
    pub fn new() -> Self {
        Self {
            default_level: LogLevel::Info,
            component_levels: HashMap::new(),
            timestamps: true,
        }
    }

    pub fn with_default_level(mut self, level: LogLevel) -> Self {
        self.default_level = level;
        self
    }

    pub fn with_component_level(mut self, component: ComponentKey, level: LogLevel) -> Self {
        self.component_levels.insert(component, level);
        self
    }

    pub fn with_timestamps(mut self, timestamps: bool) -> Self {
        self.timestamps = timestamps;
        self
    }

    /// Install the configuration as the global logger.
    ///
    /// Only the first call in a process takes effect; later calls are ignored so
    /// that tests can apply a config per test without failing.
    pub fn apply(&self) {
        let mut builder = env_logger::Builder::new();
        builder.filter_level(self.default_level.to_level_filter());
        for (component, level) in &self.component_levels {
            builder.filter_module(component.target(), level.to_level_filter());
        }
        if self.timestamps {
            builder.format(|buf, record| {
                writeln!(
                    buf,
                    "{} {:<5} {}",
                    Local::now().format("%H:%M:%S%.3f"),
                    record.level(),
                    record.args()
                )
            });
        } else {
            builder.format(|buf, record| writeln!(buf, "{:<5} {}", record.level(), record.args()));
        }
        let _ = builder.try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_logger_keeps_node_id() {
        let root = Logger::new_root(Component::Node, "pub-node");
        let child = root.with_component(Component::Dispatcher);
        assert_eq!(child.node_id(), "pub-node");
        assert_eq!(child.component(), Component::Dispatcher);
        assert_eq!(child.prefix().to_string(), "Dispatcher");

        let grandchild = child.with_component(Component::Custom("Copy"));
        assert_eq!(grandchild.prefix().to_string(), "Dispatcher.Copy");
    }

    #[test]
    fn test_message_path_is_carried() {
        let logger = Logger::new_root(Component::Hub, "n1").with_message_path("/pubunistr0/äta");
        assert_eq!(logger.message_path(), Some("/pubunistr0/äta"));
        assert_eq!(
            MaybePathDisplay(logger.message_path()).to_string(),
            "|path=/pubunistr0/äta"
        );
    }

    #[test]
    fn test_log_level_parsing() {
        assert_eq!("debug".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert_eq!("WARN".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!("a".parse::<LogLevel>().unwrap(), LogLevel::Trace);
        assert_eq!("-".parse::<LogLevel>().unwrap(), LogLevel::Off);
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_component_level_overrides() {
        assert_eq!(
            parse_component_level("hub=debug").unwrap(),
            (ComponentKey::Hub, LogLevel::Debug)
        );
        assert_eq!(
            parse_component_level("Dispatcher = off").unwrap(),
            (ComponentKey::Dispatcher, LogLevel::Off)
        );
        assert!(parse_component_level("hub").is_err());
        assert!(parse_component_level("mixer=debug").is_err());
        assert!(parse_component_level("hub=loud").is_err());

        let config = LoggingConfig::new()
            .with_component_level(ComponentKey::Hub, LogLevel::Trace)
            .with_component_level(ComponentKey::Hub, LogLevel::Warn);
        assert_eq!(config.component_levels.len(), 1);
        assert_eq!(config.component_levels[&ComponentKey::Hub], LogLevel::Warn);
        assert_eq!(ComponentKey::Hub.target(), Component::Hub.target());
    }
}
