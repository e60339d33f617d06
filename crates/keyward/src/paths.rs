use directories::ProjectDirs;
use eyre::ContextCompat as _;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct KeywardPaths {
    pub config_dir: PathBuf,
    pub data_dir: PathBuf,
    pub log_file: PathBuf,
}

impl KeywardPaths {
    pub fn discover() -> eyre::Result<Self> {
        // Test/CI override knobs.
        if let (Ok(data_dir), Ok(config_dir)) = (
            std::env::var("KEYWARD_DATA_DIR"),
            std::env::var("KEYWARD_CONFIG_DIR"),
        ) {
            let data_dir = PathBuf::from(data_dir);
            let config_dir = PathBuf::from(config_dir);
            let log_file = data_dir.join("keyward.log.jsonl");
            return Ok(Self {
                config_dir,
                data_dir,
                log_file,
            });
        }

        // Default locations:
        // macOS: ~/Library/Application Support/keyward
        // Linux: ~/.config/keyward
        // Windows: %APPDATA%\\keyward
        let proj = ProjectDirs::from("", "", "keyward").context("failed to resolve project dirs")?;
        let config_dir = proj.config_dir().to_path_buf();
        let data_dir = proj.data_dir().to_path_buf();
        let log_file = data_dir.join("keyward.log.jsonl");

        Ok(Self {
            config_dir,
            data_dir,
            log_file,
        })
    }

    pub fn ensure_private_dirs(&self) -> eyre::Result<()> {
        crate::fsutil::ensure_private_dir(&self.config_dir)?;
        crate::fsutil::ensure_private_dir(&self.data_dir)?;
        Ok(())
    }

    /// The encrypted key-material store (one JSON map of sealed blobs).
    pub fn secrets_path(&self) -> PathBuf {
        self.config_dir.join("secrets.json")
    }

    /// Advisory lock guarding writes to the secret store across processes.
    pub fn store_lock_path(&self) -> PathBuf {
        self.data_dir.join("keyward.lock")
    }
}
