//! # pmoconfig - YAML configuration for PMOWebRadio
//!
//! The configuration is one YAML tree built in three layers:
//!
//! 1. the defaults embedded in the binary (`pmowebradio.yaml`),
//! 2. the user's `config.yaml`, merged key by key over the defaults,
//! 3. `PMOWEBRADIO_CONFIG__SECTION__KEY=value` environment variables.
//!
//! Keys are case-insensitive: every key is stored lowercase. The merged tree
//! is written back to `config.yaml` so users can see every available setting.
//!
//! ## Usage
//!
//! ```no_run
//! use pmoconfig::get_config;
//!
//! let config = get_config();
//! let chunk = config.get_usize_or(&["webradio", "http", "read_chunk_size"], 16384)?;
//!
//! config.set_value(
//!     &["webradio", "http", "max_redirects"],
//!     serde_yaml::Value::Number(serde_yaml::Number::from(5)),
//! )?;
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! Crates add typed getters through extension traits on [`Config`]
//! (see `pmowebradio::WebRadioConfigExt`).

use anyhow::{anyhow, bail, Context, Result};
use lazy_static::lazy_static;
use serde_yaml::{Mapping, Value};
use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use tracing::{debug, info, warn};

const EMBEDDED_DEFAULTS: &str = include_str!("pmowebradio.yaml");

/// Directory override
const ENV_CONFIG_DIR: &str = "PMOWEBRADIO_CONFIG";
/// Prefix of per-key overrides; `__` separates path components
const ENV_OVERRIDE_PREFIX: &str = "PMOWEBRADIO_CONFIG__";
const CONFIG_DIR_NAME: &str = ".pmowebradio";
const CONFIG_FILE_NAME: &str = "config.yaml";

lazy_static! {
    static ref CONFIG: Arc<Config> =
        Arc::new(Config::load(None).expect("Failed to load PMOWebRadio configuration"));
}

/// Shared, lazily loaded configuration.
///
/// ```no_run
/// let redirects = pmoconfig::get_config()
///     .get_usize_or(&["webradio", "http", "max_redirects"], 10)?;
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn get_config() -> Arc<Config> {
    CONFIG.clone()
}

/// Configuration tree, optionally backed by a `config.yaml` file.
#[derive(Debug)]
pub struct Config {
    dir: Option<PathBuf>,
    tree: Mutex<Value>,
}

impl Clone for Config {
    fn clone(&self) -> Self {
        Self {
            dir: self.dir.clone(),
            tree: Mutex::new(self.tree().clone()),
        }
    }
}

impl Config {
    /// Loads the configuration from `dir`, or from the first usable location:
    /// `$PMOWEBRADIO_CONFIG`, `./.pmowebradio`, `~/.pmowebradio`.
    ///
    /// The directory is created when missing. The merged configuration is
    /// saved back before returning.
    pub fn load(dir: Option<&Path>) -> Result<Self> {
        let dir = match dir {
            Some(dir) => dir.to_path_buf(),
            None => locate_config_dir(),
        };
        prepare_dir(&dir)?;
        info!(config_dir = %dir.display(), "Using config directory");

        let file = dir.join(CONFIG_FILE_NAME);
        let user = match fs::read_to_string(&file) {
            Ok(text) => {
                info!(config_file = %file.display(), "Loaded config file");
                Some(parse_yaml(&text).with_context(|| format!("in {}", file.display()))?)
            }
            Err(_) => {
                info!(config_file = %file.display(), "No config file, using embedded defaults");
                None
            }
        };

        let mut tree = layered(user)?;
        for (path, value) in env_overrides(env::vars()) {
            let path: Vec<&str> = path.iter().map(String::as_str).collect();
            if let Err(err) = insert_at(&mut tree, &path, value) {
                warn!(path = %path.join("."), "Ignoring environment override: {}", err);
            }
        }

        let config = Self {
            dir: Some(dir),
            tree: Mutex::new(tree),
        };
        config.save()?;
        Ok(config)
    }

    /// In-memory configuration: `yaml` merged over the embedded defaults.
    ///
    /// Nothing is read from or written to disk, and the environment is ignored.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let user = if yaml.trim().is_empty() {
            None
        } else {
            Some(parse_yaml(yaml)?)
        };
        Ok(Self {
            dir: None,
            tree: Mutex::new(layered(user)?),
        })
    }

    /// Directory holding `config.yaml`, `None` for in-memory configurations.
    pub fn directory(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Writes the tree to `config.yaml`; a no-op in memory.
    pub fn save(&self) -> Result<()> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };
        let file = dir.join(CONFIG_FILE_NAME);
        let yaml = serde_yaml::to_string(&*self.tree())?;
        fs::write(&file, yaml).with_context(|| format!("writing {}", file.display()))?;
        debug!(config_file = %file.display(), "Saved configuration");
        Ok(())
    }

    /// Sets the value at `path` (e.g. `&["webradio", "http", "max_redirects"]`)
    /// and saves. Missing intermediate sections are created.
    pub fn set_value(&self, path: &[&str], value: Value) -> Result<()> {
        insert_at(&mut self.tree(), path, value)?;
        self.save()
    }

    /// Value at `path`; an error when the path does not exist.
    pub fn get_value(&self, path: &[&str]) -> Result<Value> {
        let tree = self.tree();
        let mut node = &*tree;
        for (depth, key) in path.iter().enumerate() {
            let Value::Mapping(map) = node else {
                bail!("{} is not a section", path[..depth].join("."));
            };
            node = map
                .get(key.to_lowercase().as_str())
                .ok_or_else(|| anyhow!("{} does not exist", path[..=depth].join(".")))?;
        }
        Ok(node.clone())
    }

    /// Unsigned integer at `path`, or `default` when missing or of another type.
    pub fn get_usize_or(&self, path: &[&str], default: usize) -> Result<usize> {
        Ok(match self.get_value(path) {
            Ok(Value::Number(n)) => n
                .as_u64()
                .and_then(|v| usize::try_from(v).ok())
                .unwrap_or(default),
            _ => default,
        })
    }

    pub fn get_bool_or(&self, path: &[&str], default: bool) -> Result<bool> {
        Ok(match self.get_value(path) {
            Ok(Value::Bool(b)) => b,
            _ => default,
        })
    }

    /// String at `path`, or `default` when missing, empty or of another type.
    pub fn get_string_or(&self, path: &[&str], default: &str) -> Result<String> {
        Ok(match self.get_value(path) {
            Ok(Value::String(s)) if !s.is_empty() => s,
            _ => default.to_string(),
        })
    }

    fn tree(&self) -> MutexGuard<'_, Value> {
        self.tree.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn locate_config_dir() -> PathBuf {
    if let Ok(dir) = env::var(ENV_CONFIG_DIR) {
        info!(env_var = ENV_CONFIG_DIR, path = %dir, "Config directory from environment");
        return PathBuf::from(dir);
    }
    let local = PathBuf::from(CONFIG_DIR_NAME);
    if local.is_dir() {
        return local;
    }
    dirs::home_dir()
        .map(|home| home.join(CONFIG_DIR_NAME))
        .filter(|dir| dir.is_dir())
        .unwrap_or(local)
}

/// Creates `dir` if needed and checks that a file can be written in it.
fn prepare_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    if !dir.is_dir() {
        bail!("{} is not a directory", dir.display());
    }
    let probe = dir.join(".write_test");
    fs::write(&probe, b"")
        .and_then(|_| fs::remove_file(&probe))
        .with_context(|| format!("{} is not writable", dir.display()))
}

fn parse_yaml(text: &str) -> Result<Value> {
    Ok(lowercase_keys(serde_yaml::from_str(text)?))
}

/// Embedded defaults with `user` merged over them.
fn layered(user: Option<Value>) -> Result<Value> {
    let mut tree = parse_yaml(EMBEDDED_DEFAULTS)?;
    if let Some(user) = user {
        merge(&mut tree, user);
    }
    Ok(tree)
}

/// Recursive merge: sections are merged key by key, anything else in
/// `over` replaces what is in `base`.
fn merge(base: &mut Value, over: Value) {
    match (base, over) {
        (Value::Mapping(base), Value::Mapping(over)) => {
            for (key, value) in over {
                match base.get_mut(&key) {
                    Some(slot) => merge(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, over) => *base = over,
    }
}

fn insert_at(tree: &mut Value, path: &[&str], value: Value) -> Result<()> {
    let Some((first, rest)) = path.split_first() else {
        *tree = value;
        return Ok(());
    };
    let Value::Mapping(map) = tree else {
        bail!("cannot set {first} inside a value");
    };
    let key = Value::String(first.to_lowercase());
    if rest.is_empty() {
        map.insert(key, value);
        return Ok(());
    }
    let child = map
        .entry(key)
        .or_insert_with(|| Value::Mapping(Mapping::new()));
    insert_at(child, rest, value)
}

/// `PMOWEBRADIO_CONFIG__A__B=v` → (`["a", "b"]`, v). Values are parsed as
/// YAML scalars, so `42` is a number and `true` a boolean.
fn env_overrides(vars: impl Iterator<Item = (String, String)>) -> Vec<(Vec<String>, Value)> {
    vars.filter_map(|(name, raw)| {
        let rest = name.strip_prefix(ENV_OVERRIDE_PREFIX)?;
        let path: Vec<String> = rest.split("__").map(str::to_lowercase).collect();
        let value = serde_yaml::from_str(&raw).unwrap_or(Value::String(raw));
        debug!(env_var = %name, "Configuration override from environment");
        Some((path, value))
    })
    .collect()
}

fn lowercase_keys(value: Value) -> Value {
    match value {
        Value::Mapping(map) => Value::Mapping(
            map.into_iter()
                .map(|(key, value)| {
                    let key = match key {
                        Value::String(s) => Value::String(s.to_lowercase()),
                        other => other,
                    };
                    (key, lowercase_keys(value))
                })
                .collect(),
        ),
        Value::Sequence(seq) => Value::Sequence(seq.into_iter().map(lowercase_keys).collect()),
        other => other,
    }
}
