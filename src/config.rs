use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::{AppError, Result};

/// Persisted user preferences; a flat JSON file under the platform
/// config directory. Written with defaults on first run.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub download_path: PathBuf,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub ytdlp_path: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            download_path: std::env::current_dir()
                .map(|dir| dir.join("downloads"))
                .unwrap_or_else(|_| PathBuf::from("downloads")),
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            ytdlp_path: "yt-dlp".to_string(),
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: AppConfig = serde_json::from_str(&content)?;
            Ok(config)
        } else {
            let config = AppConfig::default();
            config.save()?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;
        if let Some(config_dir) = config_path.parent() {
            if !config_dir.exists() {
                std::fs::create_dir_all(config_dir)?;
            }
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| AppError::Config("could not find config directory".to_string()))?;
        Ok(config_dir.join("tubedl").join("config.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_round_trips_through_json() {
        let config = AppConfig {
            download_path: PathBuf::from("/tmp/videos"),
            ffmpeg_path: "/opt/ffmpeg/bin/ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            ytdlp_path: "yt-dlp".to_string(),
        };
        let json = serde_json::to_string(&config).expect("serialize");
        let restored: AppConfig = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(restored.download_path, config.download_path);
        assert_eq!(restored.ffmpeg_path, config.ffmpeg_path);
    }

    #[test]
    fn defaults_point_at_a_downloads_subdirectory() {
        let config = AppConfig::default();
        assert!(config.download_path.ends_with("downloads"));
        assert_eq!(config.ytdlp_path, "yt-dlp");
    }
}
