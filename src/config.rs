//! Configuration loading and types for the filer.
//!
//! Configuration is read from a YAML file and deserialized into
//! [`FilerConfig`].  Only `url` is required; everything else has a default.
//!
//! ```yaml
//! url: s3://my-bucket
//! part_size: 8388608
//! threads: 4
//! aws:
//!   region: eu-west-1
//!   key: AKIA...
//! ```

use http::Uri;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::errors::{FilerError, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FilerConfig {
    /// Store URL, e.g. `s3://bucket`.  The host names the bucket.
    pub url: String,

    /// Multipart chunk threshold in bytes.
    #[serde(default = "default_part_size")]
    pub part_size: u64,

    /// Directory for chunk spill files (platform temp dir if unset).
    #[serde(default)]
    pub temp_dir: Option<String>,

    /// Upload worker pool size, shared by every stream of one filer.
    #[serde(default = "default_threads")]
    pub threads: usize,

    /// AWS client settings.
    #[serde(default)]
    pub aws: AwsConfig,
}

/// AWS S3 client configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AwsConfig {
    /// AWS region.
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom S3-compatible endpoint (e.g. MinIO, LocalStack).
    #[serde(default)]
    pub endpoint_url: Option<String>,
    /// Force path-style URL addressing.
    #[serde(default)]
    pub use_path_style: bool,
    /// Explicit access key (falls back to env/credential chain when unset).
    #[serde(default, alias = "access_key_id")]
    pub key: Option<String>,
    /// Secret for `key`.  Prompted for when `key` is set and this is not.
    #[serde(default, alias = "secret_access_key")]
    pub secret: Option<String>,
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            endpoint_url: None,
            use_path_style: false,
            key: None,
            secret: None,
        }
    }
}

/// Supplies secrets that are not present in the configuration.
pub trait SecretPrompt {
    /// Ask for the secret named `name`, displaying `message`.  Input should
    /// not be echoed.
    fn prompt_masked(&self, name: &str, message: &str) -> anyhow::Result<String>;
}

impl<F> SecretPrompt for F
where
    F: Fn(&str, &str) -> anyhow::Result<String>,
{
    fn prompt_masked(&self, name: &str, message: &str) -> anyhow::Result<String> {
        self(name, message)
    }
}

/// A prompt for non-interactive use: every request fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPrompt;

impl SecretPrompt for NoPrompt {
    fn prompt_masked(&self, name: &str, _message: &str) -> anyhow::Result<String> {
        anyhow::bail!("no interactive prompt available for {name}; set it in the configuration")
    }
}

impl FilerConfig {
    /// Configuration with every setting at its default, for `url`.
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            part_size: default_part_size(),
            temp_dir: None,
            threads: default_threads(),
            aws: AwsConfig::default(),
        }
    }

    /// Parse the configured URL.
    pub fn uri(&self) -> Result<Uri> {
        self.url
            .parse::<Uri>()
            .map_err(|e| FilerError::Config(format!("invalid url {:?}: {e}", self.url)))
    }

    /// Bucket name, taken from the URL host.
    pub fn bucket(&self) -> Result<String> {
        self.uri()?
            .host()
            .filter(|h| !h.is_empty())
            .map(str::to_string)
            .ok_or_else(|| FilerError::Config(format!("url {:?} has no bucket host", self.url)))
    }

    /// Spill directory for multipart chunks.
    pub fn temp_dir(&self) -> PathBuf {
        self.temp_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir)
    }

    /// Chunk threshold as a buffer length.
    pub fn part_size(&self) -> Result<usize> {
        match usize::try_from(self.part_size) {
            Ok(0) | Err(_) => Err(FilerError::Config(format!(
                "part_size must be between 1 and {} bytes, got {}",
                usize::MAX,
                self.part_size
            ))),
            Ok(n) => Ok(n),
        }
    }

    /// Explicit credentials, if a key is configured.
    ///
    /// A key without a secret asks `prompt` for `"{key}.secret"`.
    pub fn resolve_credentials(
        &self,
        prompt: &dyn SecretPrompt,
    ) -> Result<Option<(String, String)>> {
        let Some(key) = self.aws.key.clone() else {
            return Ok(None);
        };
        let secret = match self.aws.secret.clone() {
            Some(secret) => secret,
            None => {
                let name = format!("{key}.secret");
                prompt
                    .prompt_masked(&name, &format!("{name}: "))
                    .map_err(|e| FilerError::Config(e.to_string()))?
            }
        };
        Ok(Some((key, secret)))
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_part_size() -> u64 {
    5 * 1024 * 1024 // 5 MiB
}

fn default_threads() -> usize {
    1
}

fn default_region() -> String {
    "us-east-1".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Parse configuration from a YAML string.
pub fn parse_config(contents: &str) -> anyhow::Result<FilerConfig> {
    let config: FilerConfig = serde_yaml::from_str(contents)?;
    Ok(config)
}

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<FilerConfig> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    parse_config(&contents)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = parse_config("url: s3://my-bucket\n").unwrap();
        assert_eq!(config.part_size, 5 * 1024 * 1024);
        assert_eq!(config.threads, 1);
        assert_eq!(config.temp_dir(), std::env::temp_dir());
        assert_eq!(config.aws.region, "us-east-1");
        assert!(config.aws.key.is_none());
        assert_eq!(config.bucket().unwrap(), "my-bucket");
    }

    #[test]
    fn test_full_config() {
        let yaml = r#"
url: s3://data-lake/prefix
part_size: 8388608
temp_dir: /var/tmp/filer
threads: 4
aws:
  region: eu-west-1
  endpoint_url: http://localhost:9000
  use_path_style: true
  access_key_id: AKIDEXAMPLE
  secret_access_key: s3cr3t
"#;
        let config = parse_config(yaml).unwrap();
        assert_eq!(config.part_size().unwrap(), 8 * 1024 * 1024);
        assert_eq!(config.temp_dir(), PathBuf::from("/var/tmp/filer"));
        assert_eq!(config.threads, 4);
        assert_eq!(config.bucket().unwrap(), "data-lake");
        assert_eq!(config.aws.endpoint_url.as_deref(), Some("http://localhost:9000"));
        assert!(config.aws.use_path_style);

        let creds = config.resolve_credentials(&NoPrompt).unwrap();
        assert_eq!(
            creds,
            Some(("AKIDEXAMPLE".to_string(), "s3cr3t".to_string()))
        );
    }

    #[test]
    fn test_missing_url_fails() {
        assert!(parse_config("threads: 2\n").is_err());
    }

    #[test]
    fn test_url_without_host_is_config_error() {
        let config = parse_config("url: /just/a/path\n").unwrap();
        assert!(matches!(config.bucket(), Err(FilerError::Config(_))));
    }

    #[test]
    fn test_zero_part_size_rejected() {
        let config = parse_config("url: s3://b\npart_size: 0\n").unwrap();
        assert!(matches!(config.part_size(), Err(FilerError::Config(_))));
    }

    #[test]
    fn test_no_key_means_default_chain() {
        let config = parse_config("url: s3://b\n").unwrap();
        assert_eq!(config.resolve_credentials(&NoPrompt).unwrap(), None);
    }

    #[test]
    fn test_key_without_secret_prompts() {
        let config = parse_config("url: s3://b\naws:\n  key: AKID\n").unwrap();
        let prompt = |name: &str, message: &str| -> anyhow::Result<String> {
            assert_eq!(name, "AKID.secret");
            assert_eq!(message, "AKID.secret: ");
            Ok("typed".to_string())
        };
        let creds = config.resolve_credentials(&prompt).unwrap();
        assert_eq!(creds, Some(("AKID".to_string(), "typed".to_string())));
    }

    #[test]
    fn test_key_without_secret_and_no_prompt_fails() {
        let config = parse_config("url: s3://b\naws:\n  key: AKID\n").unwrap();
        let err = config.resolve_credentials(&NoPrompt).unwrap_err();
        assert!(matches!(err, FilerError::Config(_)));
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("filer.yaml");
        std::fs::write(&path, "url: s3://from-file\nthreads: 3\n").unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.bucket().unwrap(), "from-file");
        assert_eq!(config.threads, 3);
    }

    #[test]
    fn test_from_url_matches_parsed_defaults() {
        let url = "s3://odd\"bucket#x";
        let config = FilerConfig::from_url(url);
        assert_eq!(config.url, url);
        let parsed = parse_config("url: s3://b\n").unwrap();
        assert_eq!(config.part_size, parsed.part_size);
        assert_eq!(config.threads, parsed.threads);
        assert_eq!(config.temp_dir, parsed.temp_dir);
        assert_eq!(config.aws.region, parsed.aws.region);
        assert!(config.aws.key.is_none());
    }
}
