//! Flat append-only record of every quiz question processed this run.
//!
//! The log is a single JSON array on disk. It is wiped at run start and the
//! whole in-memory array is rewritten after each quiz submission, so a crash
//! loses at most the questions of the attempt in flight.

use std::path::{Path, PathBuf};

use color_eyre::{Result, eyre::eyre};
use serde::{Deserialize, Serialize};

/// One processed question. Records are created once and never mutated.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct QuizLogRecord {
	pub question: String,
	/// Option texts in page order
	pub options: Vec<String>,
	/// Letter the model suggested, if the call succeeded
	pub suggested_letter: Option<String>,
	/// Answer text the model suggested
	pub suggested_answer: Option<String>,
	/// Index of the option actually clicked; `None` when left blank
	pub selected_index: Option<usize>,
	/// Label text of the option actually clicked
	pub selected_text: Option<String>,
	pub timestamp: chrono::DateTime<chrono::Utc>,
}

pub struct QuizLog {
	path: PathBuf,
	records: Vec<QuizLogRecord>,
}

impl QuizLog {
	/// Open the log, deleting any file left over from a previous run.
	pub fn start_fresh(path: impl Into<PathBuf>) -> Result<Self> {
		let path = path.into();
		match std::fs::remove_file(&path) {
			Ok(()) => tracing::info!("Removed previous quiz log at {}", path.display()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
			Err(e) => return Err(eyre!("Failed to remove previous quiz log {}: {e}", path.display())),
		}
		Ok(Self { path, records: Vec::new() })
	}

	pub fn append(&mut self, record: QuizLogRecord) {
		self.records.push(record);
	}

	/// Rewrite the full array to disk.
	pub fn flush(&self) -> Result<()> {
		if let Some(parent) = self.path.parent()
			&& !parent.as_os_str().is_empty()
		{
			std::fs::create_dir_all(parent).map_err(|e| eyre!("Failed to create quiz log dir: {e}"))?;
		}
		let json = serde_json::to_string_pretty(&self.records)?;
		std::fs::write(&self.path, json).map_err(|e| eyre!("Failed to write quiz log {}: {e}", self.path.display()))?;
		Ok(())
	}

	pub fn records(&self) -> &[QuizLogRecord] {
		&self.records
	}

	pub fn path(&self) -> &Path {
		&self.path
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn record(question: &str, selected: Option<usize>) -> QuizLogRecord {
		QuizLogRecord {
			question: question.to_string(),
			options: vec!["Mars".into(), "Jupiter".into()],
			suggested_letter: Some("B".into()),
			suggested_answer: Some("Jupiter".into()),
			selected_index: selected,
			selected_text: selected.map(|_| "Jupiter".to_string()),
			timestamp: chrono::Utc::now(),
		}
	}

	#[test]
	fn start_fresh_deletes_previous_file() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("quiz_log.json");
		std::fs::write(&path, "[stale]").unwrap();

		let log = QuizLog::start_fresh(&path).unwrap();
		assert!(!path.exists());
		assert!(log.records().is_empty());
	}

	#[test]
	fn flush_writes_readable_json_array() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("quiz_log.json");

		let mut log = QuizLog::start_fresh(&path).unwrap();
		log.append(record("Which planet is largest?", Some(1)));
		log.append(record("Which planet is red?", None));
		log.flush().unwrap();

		let raw = std::fs::read_to_string(&path).unwrap();
		let reloaded: Vec<QuizLogRecord> = serde_json::from_str(&raw).unwrap();
		assert_eq!(reloaded.len(), 2);
		assert_eq!(reloaded[0].selected_index, Some(1));
		assert_eq!(reloaded[0].selected_text.as_deref(), Some("Jupiter"));
		assert!(reloaded[1].selected_index.is_none());
	}

	#[test]
	fn flush_creates_parent_directories() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("nested/logs/quiz_log.json");

		let mut log = QuizLog::start_fresh(&path).unwrap();
		log.append(record("q", Some(0)));
		log.flush().unwrap();
		assert!(path.exists());
	}

	#[test]
	fn reflush_overwrites_with_full_array() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("quiz_log.json");

		let mut log = QuizLog::start_fresh(&path).unwrap();
		log.append(record("first", Some(0)));
		log.flush().unwrap();
		log.append(record("second", Some(1)));
		log.flush().unwrap();

		let reloaded: Vec<QuizLogRecord> = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
		assert_eq!(reloaded.len(), 2);
		assert_eq!(reloaded[1].question, "second");
	}
}
