//! Benchmark configuration.
//!
//! Defaults are compile-time constants; `BENCH_*` environment variables
//! override them and positional arguments select benchmarks by substring.

use std::time::Duration;

use crate::error::BenchError;

pub const NUM_TEX: usize = 16;
pub const WIDTH: u32 = 1920;
pub const HEIGHT: u32 = 1080;
pub const WARMUP_MS: u64 = 500;
pub const TEST_MS: u64 = 1000;

/// Exit status reported when no usable device exists.
pub const EXIT_SKIP: u8 = 77;

#[derive(Debug, Clone)]
pub struct BenchConfig {
    /// Number of render targets in the frame ring.
    pub num_tex: usize,
    pub width: u32,
    pub height: u32,
    pub warmup: Duration,
    pub test: Duration,
    /// Substring filters on benchmark names; empty runs everything.
    pub filters: Vec<String>,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            num_tex: NUM_TEX,
            width: WIDTH,
            height: HEIGHT,
            warmup: Duration::from_millis(WARMUP_MS),
            test: Duration::from_millis(TEST_MS),
            filters: Vec::new(),
        }
    }
}

impl BenchConfig {
    pub fn from_env() -> Result<Self, BenchError> {
        Self::from_sources(|key| std::env::var(key).ok(), std::env::args().skip(1))
    }

    fn from_sources<E, A>(env: E, args: A) -> Result<Self, BenchError>
    where
        E: Fn(&str) -> Option<String>,
        A: IntoIterator<Item = String>,
    {
        let mut config = Self::default();
        if let Some(v) = parse_var::<usize>(&env, "BENCH_NUM_TEX")? {
            config.num_tex = v;
        }
        if let Some(v) = parse_var::<u32>(&env, "BENCH_WIDTH")? {
            config.width = v;
        }
        if let Some(v) = parse_var::<u32>(&env, "BENCH_HEIGHT")? {
            config.height = v;
        }
        if let Some(v) = parse_var::<u64>(&env, "BENCH_WARMUP_MS")? {
            config.warmup = Duration::from_millis(v);
        }
        if let Some(v) = parse_var::<u64>(&env, "BENCH_TEST_MS")? {
            config.test = Duration::from_millis(v);
        }
        config.filters = args.into_iter().filter(|a| !a.is_empty()).collect();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), BenchError> {
        if self.num_tex == 0 {
            return Err(BenchError::Config("BENCH_NUM_TEX must be at least 1".into()));
        }
        if self.width == 0 || self.height == 0 {
            return Err(BenchError::Config(format!(
                "image size {}x{} is empty",
                self.width, self.height
            )));
        }
        if self.test.is_zero() {
            return Err(BenchError::Config("BENCH_TEST_MS must be > 0".into()));
        }
        Ok(())
    }

    pub fn selects(&self, name: &str) -> bool {
        self.filters.is_empty() || self.filters.iter().any(|f| name.contains(f.as_str()))
    }
}

fn parse_var<T: std::str::FromStr>(
    env: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, BenchError> {
    match env(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| BenchError::Config(format!("{key}={raw:?} is not a valid number"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn build(vars: &[(&str, &str)], args: &[&str]) -> Result<BenchConfig, BenchError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        BenchConfig::from_sources(
            |key| vars.get(key).cloned(),
            args.iter().map(|a| a.to_string()),
        )
    }

    #[test]
    fn defaults_match_constants() {
        let config = build(&[], &[]).unwrap();
        assert_eq!(config.num_tex, 16);
        assert_eq!(config.warmup, Duration::from_millis(500));
        assert_eq!(config.test, Duration::from_millis(1000));
        assert_eq!((config.width, config.height), (1920, 1080));
        assert!(config.selects("anything"));
    }

    #[test]
    fn env_overrides_and_filters() {
        let config = build(
            &[("BENCH_NUM_TEX", "4"), ("BENCH_TEST_MS", " 250 ")],
            &["dither", "hdr"],
        )
        .unwrap();
        assert_eq!(config.num_tex, 4);
        assert_eq!(config.test, Duration::from_millis(250));
        assert!(config.selects("dither_blue"));
        assert!(config.selects("hdr_lut"));
        assert!(!config.selects("bilinear"));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            build(&[("BENCH_NUM_TEX", "0")], &[]),
            Err(BenchError::Config(_))
        ));
        assert!(matches!(
            build(&[("BENCH_WARMUP_MS", "soon")], &[]),
            Err(BenchError::Config(_))
        ));
    }
}
