use anyhow::{Context, Result};
use std::{collections::HashMap, path::{Path, PathBuf}};

pub const CONFIG_FILE: &str = "/etc/drm-cursor.conf";
pub const DEFAULT_LOG_FILE: &str = "/var/log/drm-cursor.log";
pub const DEBUG_FLAG_FILE: &str = "/tmp/.drm_cursor_debug";
pub const DEFAULT_NUM_SURFACES: u32 = 8;

pub const OPT_DEBUG: &str = "debug";
pub const OPT_LOG_FILE: &str = "log-file";
pub const OPT_ALLOW_OVERLAY: &str = "allow-overlay";
pub const OPT_PREFER_AFBC: &str = "prefer-afbc";
pub const OPT_PREFER_PLANE: &str = "prefer-plane";
pub const OPT_PREFER_PLANES: &str = "prefer-planes";
pub const OPT_CRTC_BLOCKLIST: &str = "crtc-blocklist";
pub const OPT_NUM_SURFACES: &str = "num-surfaces";

pub const ENV_DEBUG: &str = "DRM_DEBUG";
pub const ENV_LOG_FILE: &str = "DRM_CURSOR_LOG_FILE";
pub const ENV_PREFER_PLANE: &str = "DRM_CURSOR_PREFER_PLANE";
pub const ENV_PREFER_PLANES: &str = "DRM_CURSOR_PREFER_PLANES";

/// source of named options
pub trait ConfigProvider {
    fn value(&self, key: &str) -> Option<String>;
}

impl ConfigProvider for HashMap<String, String> {
    fn value(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

/// options from a `key=value` text file
///
/// `#` comments out the rest of a line, the first occurrence of a key wins
/// and a value stops at the first whitespace.
#[derive(Debug, Default, Clone)]
pub struct ConfigFile {
    entries: HashMap<String, String>,
}

impl ConfigFile {
    pub fn load(path: impl AsRef<Path>) -> Result<ConfigFile> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Ok(ConfigFile::parse(&text))
    }

    pub fn parse(text: &str) -> ConfigFile {
        let mut entries = HashMap::new();

        let tokens = text
            .lines()
            .map(|line| line.split('#').next().unwrap_or_default())
            .flat_map(str::split_whitespace);

        for token in tokens {
            let Some((key, value)) = token.split_once('=') else {
                continue;
            };
            entries.entry(key.to_owned()).or_insert_with(|| value.to_owned());
        }

        ConfigFile { entries }
    }
}

impl ConfigProvider for ConfigFile {
    fn value(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }
}

/// the process environment
#[derive(Debug, Default, Clone, Copy)]
pub struct Environment;

impl ConfigProvider for Environment {
    fn value(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub debug: bool,
    pub log_file: PathBuf,
    pub allow_overlay: bool,
    pub prefer_afbc: bool,
    /// global preferred plane id, 0 for none
    pub prefer_plane: u32,
    /// preferred plane ids by crtc resource index, 0 for none
    pub prefer_planes: Vec<u32>,
    /// crtc ids never used for cursors
    pub crtc_blocklist: Vec<u32>,
    /// conversion buffers kept per pipe
    pub num_surfaces: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            debug: false,
            log_file: PathBuf::from(DEFAULT_LOG_FILE),
            allow_overlay: false,
            prefer_afbc: cfg!(feature = "prefer-afbc"),
            prefer_plane: 0,
            prefer_planes: vec![],
            crtc_blocklist: vec![],
            num_surfaces: DEFAULT_NUM_SURFACES,
        }
    }
}

impl Config {
    /// configuration of the running process: the system file, then the environment
    pub fn setup() -> Config {
        let file = match ConfigFile::load(CONFIG_FILE) {
            Ok(file) => file,
            Err(_) => ConfigFile::default(),
        };
        let mut config = Config::resolve(&file, &Environment);
        config.debug |= Path::new(DEBUG_FLAG_FILE).exists();
        config
    }

    /// merge both providers, the environment wins for the keys it knows about
    pub fn resolve(file: &impl ConfigProvider, env: &impl ConfigProvider) -> Config {
        let defaults = Config::default();

        let debug = env.value(ENV_DEBUG).is_some() || int(file, OPT_DEBUG, 0) != 0;

        let log_file = env
            .value(ENV_LOG_FILE)
            .or_else(|| file.value(OPT_LOG_FILE))
            .map(PathBuf::from)
            .unwrap_or(defaults.log_file);

        let prefer_plane = match env.value(ENV_PREFER_PLANE) {
            Some(value) => atoi(&value),
            None => int(file, OPT_PREFER_PLANE, 0),
        };

        let prefer_planes = env
            .value(ENV_PREFER_PLANES)
            .or_else(|| file.value(OPT_PREFER_PLANES))
            .map(|list| id_list(&list))
            .unwrap_or_default();

        let crtc_blocklist = file
            .value(OPT_CRTC_BLOCKLIST)
            .map(|list| id_list(&list))
            .unwrap_or_default();

        let num_surfaces = int(file, OPT_NUM_SURFACES, DEFAULT_NUM_SURFACES as i64);

        Config {
            debug,
            log_file,
            allow_overlay: int(file, OPT_ALLOW_OVERLAY, 0) != 0,
            prefer_afbc: int(file, OPT_PREFER_AFBC, defaults.prefer_afbc as i64) != 0,
            prefer_plane: prefer_plane.max(0) as u32,
            prefer_planes,
            crtc_blocklist,
            num_surfaces: num_surfaces.max(1) as u32,
        }
    }

    /// preferred plane of the crtc at `index` in the resource list, the per pipe entry wins
    pub fn preferred_plane(&self, index: usize) -> Option<u32> {
        let id = self.prefer_planes.get(index).copied().unwrap_or(0);
        Some(if id != 0 { id } else { self.prefer_plane }).filter(|id| *id != 0)
    }
}

fn int(provider: &impl ConfigProvider, key: &str, default: i64) -> i64 {
    provider.value(key).map(|value| atoi(&value)).unwrap_or(default)
}

/// leading optional sign and digits, anything unparsable reads as 0
fn atoi(value: &str) -> i64 {
    let value = value.trim_start();
    let (sign, digits) = match value.as_bytes().first() {
        Some(b'-') => (-1, &value[1..]),
        Some(b'+') => (1, &value[1..]),
        _ => (1, value),
    };
    let end = digits.find(|c: char| !c.is_ascii_digit()).unwrap_or(digits.len());
    digits[..end].parse::<i64>().map(|n| sign * n).unwrap_or(0)
}

fn id_list(list: &str) -> Vec<u32> {
    list.split(',').map(|item| atoi(item).max(0) as u32).collect()
}
