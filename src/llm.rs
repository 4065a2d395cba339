//! Chat-completions client plus the two model-backed helpers:
//! page-intent classification and quiz answering.

use std::sync::LazyLock;

use color_eyre::{
	Result,
	eyre::{bail, eyre},
};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{PageIntent, QuizQuestion, config::AppConfig, letter_to_index};

/// Page text beyond this many characters is not worth sending.
const MAX_PAGE_TEXT_CHARS: usize = 6000;

#[derive(Serialize)]
struct ChatRequest<'a> {
	model: &'a str,
	messages: Vec<ChatMessage<'a>>,
	temperature: f32,
	max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
	role: &'static str,
	content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
	choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
	message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
	content: String,
}

/// Model-suggested answer to a multiple-choice question.
#[derive(Clone, Debug, Deserialize)]
pub struct SuggestedAnswer {
	/// Answer letter ("A", "B", ...)
	pub letter: String,
	/// The text of the chosen option, as the model rendered it
	pub answer: String,
}

pub struct LlmClient {
	http: reqwest::Client,
	base_url: String,
	model: String,
	api_key: String,
	retries: u32,
	retry_delay_ms: u64,
}

impl LlmClient {
	pub fn new(config: &AppConfig) -> Result<Self> {
		if config.llm.api_key.is_empty() {
			bail!("No LLM API key configured (set LLM_API_KEY or llm.api_key in the config file)");
		}
		let http = reqwest::Client::builder()
			.timeout(std::time::Duration::from_secs(60))
			.build()
			.map_err(|e| eyre!("Failed to build HTTP client: {e}"))?;
		Ok(Self {
			http,
			base_url: config.llm.base_url.trim_end_matches('/').to_string(),
			model: config.llm.model.clone(),
			api_key: config.llm.api_key.clone(),
			retries: config.api_retries,
			retry_delay_ms: config.api_retry_delay_ms,
		})
	}

	/// One chat completion, with a retry loop for rate limits and 5xx errors.
	async fn complete(&self, system: &str, user: &str, max_tokens: u32) -> Result<String> {
		let request = ChatRequest {
			model: &self.model,
			messages: vec![ChatMessage { role: "system", content: system }, ChatMessage { role: "user", content: user }],
			temperature: 0.0,
			max_tokens,
		};

		let url = format!("{}/chat/completions", self.base_url);
		let mut last_err: Option<color_eyre::eyre::Report> = None;
		let retries = self.retries.max(1);

		for attempt in 1..=retries {
			match self.http.post(&url).bearer_auth(&self.api_key).json(&request).send().await {
				Ok(response) => {
					let status = response.status();
					if status.as_u16() == 429 || status.is_server_error() {
						let body = response.text().await.unwrap_or_default();
						tracing::warn!("Transient API error {status} (attempt {attempt}/{retries}): {body}");
						last_err = Some(eyre!("API returned {status}: {body}"));
					} else if !status.is_success() {
						let body = response.text().await.unwrap_or_default();
						return Err(eyre!("API returned {status}: {body}"));
					} else {
						let parsed: ChatResponse = response.json().await.map_err(|e| eyre!("Failed to decode API response: {e}"))?;
						let choice = parsed.choices.into_iter().next().ok_or_else(|| eyre!("API response contained no choices"))?;
						return Ok(choice.message.content);
					}
				}
				Err(e) => {
					tracing::warn!("API request failed (attempt {attempt}/{retries}): {e}");
					last_err = Some(eyre!("API request failed: {e}"));
				}
			}

			if attempt < retries {
				tokio::time::sleep(std::time::Duration::from_millis(self.retry_delay_ms * attempt as u64)).await;
			}
		}

		Err(last_err.unwrap_or_else(|| eyre!("API request failed with no recorded error")))
	}

	/// Classify a portal page into one of the five fixed labels.
	pub async fn classify_page(&self, page_text: &str) -> Result<PageIntent> {
		let snippet = truncate_chars(page_text, MAX_PAGE_TEXT_CHARS);
		let system = "You label pages of a university course portal. \
			Reply with exactly one word, chosen from: quiz, content, video, feedback, completion. \
			quiz = answerable multiple-choice questions; content = reading material; \
			video = an embedded video lecture; feedback = a course feedback/survey form; \
			completion = a page saying the course is finished.";
		let user = format!("Page text:\n{snippet}");

		let raw = self.complete(system, &user, 8).await?;
		tracing::debug!("Classifier raw response: {raw}");

		PageIntent::parse(&raw).ok_or_else(|| eyre!("Classifier returned an unknown label: '{}'", raw.trim()))
	}

	/// Ask the model to answer a multiple-choice question.
	/// The reply is loosely parsed: the first JSON object found in the raw text
	/// is extracted by regex and deserialized, so prose or code fences around
	/// it are tolerated.
	pub async fn answer_question(&self, question: &QuizQuestion) -> Result<SuggestedAnswer> {
		if question.options.is_empty() {
			bail!("Question has no options to choose from");
		}

		let system = "You are answering a single-choice quiz question. Pick the ONE correct answer.";
		let user = format!(
			r#"Question:
{}

Options:
{}
Respond with JSON only, no markdown, in this exact format:
{{"letter": "<letter of the correct answer>", "answer": "<text of the correct answer>"}}"#,
			question.question_text,
			question.lettered_options()
		);

		let raw = self.complete(system, &user, 128).await?;
		tracing::debug!("Answerer raw response: {raw}");

		let json_str = extract_json_object(&raw).ok_or_else(|| eyre!("No JSON object in model response: '{}'", raw.trim()))?;
		let answer: SuggestedAnswer = serde_json::from_str(json_str).map_err(|e| eyre!("Failed to parse model JSON: {e} - raw: '{json_str}'"))?;

		let idx = letter_to_index(&answer.letter).ok_or_else(|| eyre!("Model returned an invalid answer letter: '{}'", answer.letter))?;
		if idx >= question.options.len() {
			bail!("Model answer letter '{}' is out of range (question has {} options)", answer.letter, question.options.len());
		}

		Ok(answer)
	}
}

static JSON_OBJECT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)\{.*\}").expect("hardcoded pattern compiles"));

/// Pull the first complete `{...}` object out of loosely formatted model output.
/// The regex locates the candidate span, then a brace-balanced scan trims it to
/// the first object, so fenced or prose-wrapped JSON, trailing braces and
/// multiple objects all extract cleanly.
pub fn extract_json_object(raw: &str) -> Option<&str> {
	let candidate = JSON_OBJECT_RE.find(raw)?;
	balanced_object(&raw[candidate.start()..])
}

/// Slice off the leading brace-balanced object, skipping braces inside JSON
/// string literals. `s` must start with `{`.
fn balanced_object(s: &str) -> Option<&str> {
	let mut depth = 0u32;
	let mut in_string = false;
	let mut escaped = false;
	for (i, c) in s.char_indices() {
		if in_string {
			if escaped {
				escaped = false;
			} else if c == '\\' {
				escaped = true;
			} else if c == '"' {
				in_string = false;
			}
			continue;
		}
		match c {
			'"' => in_string = true,
			'{' => depth += 1,
			'}' => {
				depth = depth.saturating_sub(1);
				if depth == 0 {
					return Some(&s[..=i]);
				}
			}
			_ => {}
		}
	}
	None
}

fn truncate_chars(s: &str, max: usize) -> &str {
	match s.char_indices().nth(max) {
		Some((idx, _)) => &s[..idx],
		None => s,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn extracts_bare_json() {
		let raw = r#"{"letter": "A", "answer": "Mars"}"#;
		assert_eq!(extract_json_object(raw), Some(raw));
	}

	#[test]
	fn extracts_fenced_json() {
		let raw = "```json\n{\"letter\": \"B\", \"answer\": \"Jupiter\"}\n```";
		let json = extract_json_object(raw).unwrap();
		let parsed: SuggestedAnswer = serde_json::from_str(json).unwrap();
		assert_eq!(parsed.letter, "B");
		assert_eq!(parsed.answer, "Jupiter");
	}

	#[test]
	fn extracts_json_from_prose() {
		let raw = "The correct answer is B. {\"letter\": \"B\", \"answer\": \"Jupiter\"} Hope that helps!";
		let parsed: SuggestedAnswer = serde_json::from_str(extract_json_object(raw).unwrap()).unwrap();
		assert_eq!(parsed.letter, "B");
	}

	#[test]
	fn extracts_first_of_two_objects() {
		let raw = r#"{"letter": "B", "answer": "Jupiter"} or maybe {"letter": "C", "answer": "Venus"}"#;
		let parsed: SuggestedAnswer = serde_json::from_str(extract_json_object(raw).unwrap()).unwrap();
		assert_eq!(parsed.letter, "B");
	}

	#[test]
	fn trailing_brace_outside_object_is_ignored() {
		let raw = r#"{"letter": "A", "answer": "Mars"} :-}"#;
		assert_eq!(extract_json_object(raw), Some(r#"{"letter": "A", "answer": "Mars"}"#));
	}

	#[test]
	fn braces_inside_strings_do_not_end_the_object() {
		let raw = r#"{"letter": "A", "answer": "the set {1, 2}"}"#;
		assert_eq!(extract_json_object(raw), Some(raw));
	}

	#[test]
	fn no_json_returns_none() {
		assert_eq!(extract_json_object("the answer is B"), None);
		assert_eq!(extract_json_object(""), None);
	}

	#[test]
	fn truncation_respects_char_boundaries() {
		assert_eq!(truncate_chars("héllo", 2), "hé");
		assert_eq!(truncate_chars("short", 100), "short");
	}
}
