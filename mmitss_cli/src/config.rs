//! Key/value configuration file shared by the three processes.
//!
//! Lines are `key value`, `#` starts a comment. Socket keys hold
//! `host:port` pairs; serial keys hold a device path.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};

#[derive(Debug, Clone, Default)]
pub struct Config {
    values: HashMap<String, String>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Config> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let mut values = HashMap::new();
        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut toks = line.splitn(2, char::is_whitespace);
            let key = toks
                .next()
                .ok_or_else(|| anyhow!("bad config line {}", lineno + 1))?;
            let value = toks
                .next()
                .ok_or_else(|| anyhow!("missing value for {key} at line {}", lineno + 1))?;
            values.insert(key.to_string(), value.trim().to_string());
        }
        Ok(Config { values })
    }

    pub fn string(&self, key: &str) -> Result<&str> {
        self.values
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| anyhow!("missing config key {key}"))
    }

    pub fn string_or(&self, key: &str, default: &'static str) -> &str {
        self.values.get(key).map_or(default, String::as_str)
    }

    pub fn path(&self, key: &str) -> Result<PathBuf> {
        Ok(PathBuf::from(self.string(key)?))
    }

    pub fn integer(&self, key: &str) -> Result<i64> {
        self.string(key)?
            .parse()
            .with_context(|| format!("config key {key} is not an integer"))
    }

    pub fn integer_or(&self, key: &str, default: i64) -> i64 {
        self.values
            .get(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_keys_and_defaults() {
        let dir = std::env::temp_dir().join("mmitss_config_test");
        std::fs::create_dir_all(&dir).unwrap();
        let file = dir.join("mrp.conf");
        std::fs::write(
            &file,
            "# roadside config\nnmapFile /etc/mmitss/intx.nmap\nspatPort /dev/ttyS0\nbaudRate 38400\nmgrSocket 127.0.0.1:15020\n",
        )
        .unwrap();
        let config = Config::load(&file).unwrap();
        assert_eq!(config.string("nmapFile").unwrap(), "/etc/mmitss/intx.nmap");
        assert_eq!(config.integer("baudRate").unwrap(), 38400);
        assert_eq!(config.integer_or("dsrcTimeout", 2000), 2000);
        assert!(config.string("missing").is_err());
    }
}
