use std::path::{Path, PathBuf};

use color_eyre::{Result, eyre::eyre};
use serde::Deserialize;

/// Connection settings for the chat-completions endpoint.
#[derive(Clone, Debug, Deserialize)]
pub struct LlmConfig {
	/// API key; usually injected via the LLM_API_KEY env var instead
	#[serde(default)]
	pub api_key: String,
	#[serde(default = "default_llm_base_url")]
	pub base_url: String,
	#[serde(default = "default_llm_model")]
	pub model: String,
}

impl Default for LlmConfig {
	fn default() -> Self {
		Self {
			api_key: String::new(),
			base_url: default_llm_base_url(),
			model: default_llm_model(),
		}
	}
}

#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
	#[serde(default)]
	pub username: String,
	#[serde(default)]
	pub password: String,
	/// Portal origin to start login from; derived from the target URL when unset
	#[serde(default)]
	pub base_url: Option<String>,
	#[serde(default)]
	pub llm: LlmConfig,
	/// Number of retries for transient API errors (500, rate limit, etc) (default: 3)
	#[serde(default = "default_api_retries")]
	pub api_retries: u32,
	/// Base delay in ms between API retries, multiplied by attempt number (default: 1000)
	#[serde(default = "default_api_retry_delay_ms")]
	pub api_retry_delay_ms: u64,
	/// Number of retries for browser button clicks (default: 5)
	#[serde(default = "default_button_click_retries")]
	pub button_click_retries: u32,
	/// Hard cap on the whole run, in seconds (default: 3600)
	#[serde(default = "default_run_timeout_secs")]
	pub run_timeout_secs: u64,
	/// Safety cap on activity-loop iterations (default: 200)
	#[serde(default = "default_max_activities")]
	pub max_activities: u32,
	/// Page text that marks the end of the course and stops the loop
	#[serde(default = "default_completion_marker")]
	pub completion_marker: String,
	/// Activity titles containing any of these are skipped without answering
	#[serde(default = "default_skip_keywords")]
	pub skip_keywords: Vec<String>,
	/// Free-text comment written into every feedback textarea
	#[serde(default = "default_feedback_comment")]
	pub feedback_comment: String,
	#[serde(default = "default_quiz_log_path")]
	pub quiz_log_path: PathBuf,
	#[serde(default = "default_screenshot_dir")]
	pub screenshot_dir: PathBuf,
	/// Run with visible browser window (non-headless mode)
	#[serde(default)]
	pub visible: bool,
}

fn default_llm_base_url() -> String {
	"https://api.openai.com/v1".to_string()
}

fn default_llm_model() -> String {
	"gpt-4o-mini".to_string()
}

fn default_api_retries() -> u32 {
	3
}

fn default_api_retry_delay_ms() -> u64 {
	1000
}

fn default_button_click_retries() -> u32 {
	5
}

fn default_run_timeout_secs() -> u64 {
	3600
}

fn default_max_activities() -> u32 {
	200
}

fn default_completion_marker() -> String {
	"Course Completed".to_string()
}

fn default_skip_keywords() -> Vec<String> {
	vec!["video".to_string(), "webinar".to_string(), "survey preview".to_string()]
}

fn default_feedback_comment() -> String {
	"The course was well structured and the material was easy to follow.".to_string()
}

fn default_quiz_log_path() -> PathBuf {
	PathBuf::from("quiz_log.json")
}

fn default_screenshot_dir() -> PathBuf {
	PathBuf::from("screenshots")
}

impl AppConfig {
	/// Load config from a TOML file, then let environment variables override secrets.
	///
	/// With an explicit `path` the file must exist. Without one,
	/// `campus_headless.toml` is used when present, otherwise pure defaults.
	pub fn load(path: Option<&Path>) -> Result<Self> {
		let mut config: AppConfig = match path {
			Some(p) => {
				let raw = std::fs::read_to_string(p).map_err(|e| eyre!("Failed to read config file {}: {e}", p.display()))?;
				toml::from_str(&raw).map_err(|e| eyre!("Failed to parse config file {}: {e}", p.display()))?
			}
			None => {
				let default_path = Path::new("campus_headless.toml");
				if default_path.exists() {
					let raw = std::fs::read_to_string(default_path).map_err(|e| eyre!("Failed to read config file: {e}"))?;
					toml::from_str(&raw).map_err(|e| eyre!("Failed to parse config file: {e}"))?
				} else {
					toml::from_str("").map_err(|e| eyre!("Failed to build default config: {e}"))?
				}
			}
		};
		config.apply_env();
		Ok(config)
	}

	fn apply_env(&mut self) {
		if let Ok(v) = std::env::var("CAMPUS_USERNAME") {
			self.username = v;
		}
		if let Ok(v) = std::env::var("CAMPUS_PASSWORD") {
			self.password = v;
		}
		if let Ok(v) = std::env::var("LLM_API_KEY") {
			self.llm.api_key = v;
		}
		if let Ok(v) = std::env::var("LLM_BASE_URL") {
			self.llm.base_url = v;
		}
		if let Ok(v) = std::env::var("LLM_MODEL") {
			self.llm.model = v;
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn empty_config_uses_defaults() {
		let config: AppConfig = toml::from_str("").unwrap();
		assert_eq!(config.api_retries, 3);
		assert_eq!(config.button_click_retries, 5);
		assert_eq!(config.completion_marker, "Course Completed");
		assert_eq!(config.quiz_log_path, PathBuf::from("quiz_log.json"));
		assert_eq!(config.llm.base_url, "https://api.openai.com/v1");
		assert!(!config.visible);
	}

	#[test]
	fn partial_config_overrides() {
		let raw = r#"
			username = "student42"
			completion_marker = "You have finished"
			skip_keywords = ["video"]

			[llm]
			model = "gpt-4o"
		"#;
		let config: AppConfig = toml::from_str(raw).unwrap();
		assert_eq!(config.username, "student42");
		assert_eq!(config.completion_marker, "You have finished");
		assert_eq!(config.skip_keywords, vec!["video"]);
		assert_eq!(config.llm.model, "gpt-4o");
		// untouched fields keep their defaults
		assert_eq!(config.llm.base_url, "https://api.openai.com/v1");
		assert_eq!(config.run_timeout_secs, 3600);
	}
}
