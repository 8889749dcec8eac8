use std::env;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::diagnostics::{fuzzy_match, Diagnostics};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Environment variables that override target properties.
pub const ENV_OVERRIDES: &[(&str, &str)] = &[
    ("PRETVM_CORES", "cores"),
    ("PRETVM_PLATFORM", "platform"),
    ("PRETVM_THREAD_POLICY", "thread-policy"),
];

const PROPERTY_NAMES: &[&str] = &[
    "cores",
    "platform",
    "thread-policy",
    "fast",
    "max-time-steps",
    "prune-redundant-edges",
];

// ── Platform ──────────────────────────────────────────────────

/// Target runtime family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformType {
    #[default]
    Auto,
    Arduino,
    Native,
    Nrf52,
    Rp2040,
    Linux,
    Mac,
    Zephyr,
    Riot,
    FlexPret,
    Windows,
}

impl PlatformType {
    pub const ALL: [PlatformType; 11] = [
        PlatformType::Auto,
        PlatformType::Arduino,
        PlatformType::Native,
        PlatformType::Nrf52,
        PlatformType::Rp2040,
        PlatformType::Linux,
        PlatformType::Mac,
        PlatformType::Zephyr,
        PlatformType::Riot,
        PlatformType::FlexPret,
        PlatformType::Windows,
    ];

    /// Name used by the target build system.
    pub fn cmake_name(self) -> &'static str {
        match self {
            PlatformType::Auto => "auto",
            PlatformType::Arduino => "arduino",
            PlatformType::Native => "Native",
            PlatformType::Nrf52 => "nRF52",
            PlatformType::Rp2040 => "Rp2040",
            PlatformType::Linux => "Linux",
            PlatformType::Mac => "Darwin",
            PlatformType::Zephyr => "Zephyr",
            PlatformType::Riot => "RIOT",
            PlatformType::FlexPret => "FlexPRET",
            PlatformType::Windows => "Windows",
        }
    }

    /// Bare-metal and RTOS targets without an OS thread library.
    pub fn is_embedded(self) -> bool {
        matches!(
            self,
            PlatformType::Arduino
                | PlatformType::Nrf52
                | PlatformType::Rp2040
                | PlatformType::Zephyr
                | PlatformType::Riot
                | PlatformType::FlexPret
        )
    }
}

impl fmt::Display for PlatformType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlatformType::Auto => "auto",
            PlatformType::Arduino => "arduino",
            PlatformType::Native => "native",
            PlatformType::Nrf52 => "nrf52",
            PlatformType::Rp2040 => "rp2040",
            PlatformType::Linux => "linux",
            PlatformType::Mac => "mac",
            PlatformType::Zephyr => "zephyr",
            PlatformType::Riot => "riot",
            PlatformType::FlexPret => "flexpret",
            PlatformType::Windows => "windows",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for PlatformType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        PlatformType::ALL
            .into_iter()
            .find(|p| p.to_string() == lower)
            .ok_or_else(|| format!("unknown platform: '{}'", s))
    }
}

// ── Thread policy ─────────────────────────────────────────────

/// OS scheduling class for worker threads on hosted platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ThreadPolicy {
    #[default]
    Normal,
    RtRr,
    RtFifo,
}

impl fmt::Display for ThreadPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThreadPolicy::Normal => write!(f, "normal"),
            ThreadPolicy::RtRr => write!(f, "rt-rr"),
            ThreadPolicy::RtFifo => write!(f, "rt-fifo"),
        }
    }
}

impl FromStr for ThreadPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "normal" => Ok(ThreadPolicy::Normal),
            "rt-rr" => Ok(ThreadPolicy::RtRr),
            "rt-fifo" => Ok(ThreadPolicy::RtFifo),
            other => Err(format!("unknown thread policy: '{}'", other)),
        }
    }
}

// ── Target config ─────────────────────────────────────────────

/// Global compilation settings (target properties).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TargetConfig {
    /// Number of cores to schedule onto. 0 = all available.
    #[serde(default)]
    pub cores: u32,

    #[serde(default)]
    pub platform: PlatformType,

    #[serde(default)]
    pub thread_policy: ThreadPolicy,

    /// Do not wait for physical time to catch up with logical time.
    #[serde(default)]
    pub fast: bool,

    /// Upper bound on time steps per phase.
    #[serde(default = "default_max_time_steps")]
    pub max_time_steps: usize,

    /// Drop zero-delay edges implied by longer paths before scheduling.
    #[serde(default = "default_prune")]
    pub prune_redundant_edges: bool,
}

fn default_max_time_steps() -> usize {
    4096
}

fn default_prune() -> bool {
    true
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            cores: 0,
            platform: PlatformType::default(),
            thread_policy: ThreadPolicy::default(),
            fast: false,
            max_time_steps: default_max_time_steps(),
            prune_redundant_edges: default_prune(),
        }
    }
}

/// Optional per-field overrides, as read from a TOML file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct TargetOverrides {
    pub cores: Option<u32>,
    pub platform: Option<PlatformType>,
    pub thread_policy: Option<ThreadPolicy>,
    pub fast: Option<bool>,
    pub max_time_steps: Option<usize>,
    pub prune_redundant_edges: Option<bool>,
}

impl TargetConfig {
    /// Apply one `key: value` target property. Malformed values are
    /// reported and leave the current value in place, except `cores`,
    /// which falls back to 0.
    pub fn apply_property(&mut self, key: &str, value: &str, diags: &mut Diagnostics) {
        let location = format!("target.{}", key);
        let normalized = key.replace('_', "-");
        match normalized.as_str() {
            "cores" => match value.trim().parse::<u32>() {
                Ok(n) => self.cores = n,
                Err(_) => {
                    diags.warn(&location, None, format!("invalid number of cores: '{}'; using 0", value));
                    self.cores = 0;
                }
            },
            "platform" => match value.parse() {
                Ok(p) => self.platform = p,
                Err(e) => diags.error(&location, None, e),
            },
            "thread-policy" => match value.parse() {
                Ok(p) => self.thread_policy = p,
                Err(e) => diags.error(&location, None, e),
            },
            "fast" => match value.trim().parse() {
                Ok(b) => self.fast = b,
                Err(_) => diags.error(&location, None, format!("expected a boolean, got '{}'", value)),
            },
            "max-time-steps" => match value.trim().parse::<usize>() {
                Ok(n) if n > 0 => self.max_time_steps = n,
                _ => diags.error(&location, None, format!("expected a positive integer, got '{}'", value)),
            },
            "prune-redundant-edges" => match value.trim().parse() {
                Ok(b) => self.prune_redundant_edges = b,
                Err(_) => diags.error(&location, None, format!("expected a boolean, got '{}'", value)),
            },
            other => {
                let msg = format!("unknown target property '{}'", other);
                match fuzzy_match(other, PROPERTY_NAMES.iter().copied()) {
                    Some(hint) => diags.error_with_suggestion(&location, None, msg, hint),
                    None => diags.warn(&location, None, msg),
                }
            }
        }
    }

    pub fn apply_overrides(&mut self, overrides: &TargetOverrides) {
        if let Some(v) = overrides.cores {
            self.cores = v;
        }
        if let Some(v) = overrides.platform {
            self.platform = v;
        }
        if let Some(v) = overrides.thread_policy {
            self.thread_policy = v;
        }
        if let Some(v) = overrides.fast {
            self.fast = v;
        }
        if let Some(v) = overrides.max_time_steps {
            self.max_time_steps = v;
        }
        if let Some(v) = overrides.prune_redundant_edges {
            self.prune_redundant_edges = v;
        }
    }

    /// Apply `PRETVM_*` environment variables (call `load_dotenv()` first).
    pub fn apply_env(&mut self, diags: &mut Diagnostics) {
        self.apply_env_from(env_opt, diags);
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>, diags: &mut Diagnostics) {
        for (var, property) in ENV_OVERRIDES {
            if let Some(value) = lookup(var) {
                tracing::debug!(var, value = %value, "Target property from environment");
                self.apply_property(property, &value, diags);
            }
        }
    }

    /// Core count to schedule onto, given the number of cores available.
    /// Never returns 0 when `available` is positive.
    pub fn resolved_cores(&self, available: usize) -> usize {
        if self.cores > 0 {
            self.cores as usize
        } else {
            available
        }
    }

    /// Core count resolved against the host's available parallelism.
    pub fn resolved_cores_from_host(&self) -> usize {
        self.resolved_cores(
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        )
    }

    pub fn log_summary(&self) {
        tracing::info!("Target config:");
        tracing::info!(
            "  cores:          {}",
            if self.cores == 0 { "all available".to_string() } else { self.cores.to_string() }
        );
        tracing::info!("  platform:       {} ({})", self.platform, self.platform.cmake_name());
        tracing::info!("  thread-policy:  {}", self.thread_policy);
        tracing::info!("  fast:           {}", self.fast);
        tracing::info!("  max-time-steps: {}", self.max_time_steps);
        tracing::info!("  prune-edges:    {}", self.prune_redundant_edges);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = TargetConfig::default();
        assert_eq!(cfg.cores, 0);
        assert_eq!(cfg.platform, PlatformType::Auto);
        assert_eq!(cfg.thread_policy, ThreadPolicy::Normal);
        assert_eq!(cfg.max_time_steps, 4096);
        assert!(cfg.prune_redundant_edges);
    }

    #[test]
    fn zero_cores_means_all_available() {
        let cfg = TargetConfig::default();
        assert_eq!(cfg.resolved_cores(1), 1);
        assert_eq!(cfg.resolved_cores(8), 8);
        let cfg = TargetConfig { cores: 2, ..TargetConfig::default() };
        assert_eq!(cfg.resolved_cores(8), 2);
    }

    #[test]
    fn invalid_core_count_falls_back_to_zero() {
        let mut cfg = TargetConfig { cores: 4, ..TargetConfig::default() };
        let mut diags = Diagnostics::new();
        cfg.apply_property("cores", "lots", &mut diags);
        assert_eq!(cfg.cores, 0);
        assert_eq!(diags.len(), 1);
        assert!(!diags.has_errors());
    }

    #[test]
    fn properties_parse() {
        let mut cfg = TargetConfig::default();
        let mut diags = Diagnostics::new();
        cfg.apply_property("cores", "0", &mut diags);
        cfg.apply_property("platform", "FlexPRET", &mut diags);
        cfg.apply_property("thread_policy", "rt-fifo", &mut diags);
        cfg.apply_property("fast", "true", &mut diags);
        assert!(diags.is_empty());
        assert_eq!(cfg.cores, 0);
        assert_eq!(cfg.platform, PlatformType::FlexPret);
        assert_eq!(cfg.thread_policy, ThreadPolicy::RtFifo);
        assert!(cfg.fast);
    }

    #[test]
    fn unknown_property_gets_a_hint() {
        let mut cfg = TargetConfig::default();
        let mut diags = Diagnostics::new();
        cfg.apply_property("corse", "2", &mut diags);
        assert_eq!(diags.iter().next().unwrap().suggestion.as_deref(), Some("cores"));
        assert_eq!(cfg, TargetConfig::default());
    }

    #[test]
    fn env_lookup_overrides() {
        let mut cfg = TargetConfig::default();
        let mut diags = Diagnostics::new();
        cfg.apply_env_from(
            |key| match key {
                "PRETVM_CORES" => Some("3".to_string()),
                "PRETVM_PLATFORM" => Some("linux".to_string()),
                _ => None,
            },
            &mut diags,
        );
        assert_eq!(cfg.cores, 3);
        assert_eq!(cfg.platform, PlatformType::Linux);
    }

    #[test]
    fn overrides_only_touch_set_fields() {
        let mut cfg = TargetConfig { cores: 2, ..TargetConfig::default() };
        cfg.apply_overrides(&TargetOverrides {
            platform: Some(PlatformType::Zephyr),
            ..TargetOverrides::default()
        });
        assert_eq!(cfg.cores, 2);
        assert_eq!(cfg.platform, PlatformType::Zephyr);
    }

    #[test]
    fn platform_names_round_trip() {
        for p in PlatformType::ALL {
            assert_eq!(p.to_string().parse::<PlatformType>().unwrap(), p);
        }
        assert_eq!(PlatformType::Mac.cmake_name(), "Darwin");
        assert!(PlatformType::FlexPret.is_embedded());
        assert!(!PlatformType::Linux.is_embedded());
    }
}
