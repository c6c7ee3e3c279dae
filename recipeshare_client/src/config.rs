use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_url: String,
    pub data_dir: PathBuf,
}

impl ClientConfig {
    pub fn from_env() -> Self {
        let api_url = env::var("RECIPESHARE_API_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:5000".to_string());
        let data_dir = env::var("RECIPESHARE_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_data_dir());
        Self { api_url, data_dir }
    }

    pub fn storage_file(&self) -> PathBuf {
        self.data_dir.join("storage.json")
    }
}

fn default_data_dir() -> PathBuf {
    if let Some(home) = dirs::home_dir() {
        home.join(".recipeshare")
    } else {
        PathBuf::from(".recipeshare")
    }
}
