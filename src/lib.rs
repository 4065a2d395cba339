use std::fmt;

use serde::{Deserialize, Serialize};

pub mod config;
pub mod llm;
pub mod login;
pub mod page;
pub mod quiz_log;
pub mod runner;

/// One of the five fixed categories the page classifier may return.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PageIntent {
	/// A quiz attempt page with answerable question blocks
	Quiz,
	/// Plain reading material; nothing to do but advance
	Content,
	/// An embedded video activity (skipped)
	Video,
	/// The end-of-course feedback form
	Feedback,
	/// The course-completed landing page
	Completion,
}

impl PageIntent {
	/// Parse a classifier label, tolerating case and surrounding noise.
	/// Returns `None` for anything outside the five known labels.
	pub fn parse(label: &str) -> Option<Self> {
		let word = label.trim().split_whitespace().next()?.trim_matches(|c: char| !c.is_alphanumeric());
		match word.to_lowercase().as_str() {
			"quiz" => Some(PageIntent::Quiz),
			"content" => Some(PageIntent::Content),
			"video" => Some(PageIntent::Video),
			"feedback" => Some(PageIntent::Feedback),
			"completion" => Some(PageIntent::Completion),
			_ => None,
		}
	}

	pub fn as_str(&self) -> &'static str {
		match self {
			PageIntent::Quiz => "quiz",
			PageIntent::Content => "content",
			PageIntent::Video => "video",
			PageIntent::Feedback => "feedback",
			PageIntent::Completion => "completion",
		}
	}
}

impl fmt::Display for PageIntent {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// A single option offered by a multiple-choice question.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct QuizOption {
	/// The input element's name attribute (for form submission)
	pub input_name: String,
	/// The input element's value attribute
	pub input_value: String,
	/// The text label for this option
	pub text: String,
	/// Whether this option is currently selected
	pub selected: bool,
}

/// A multiple-choice question block as parsed from a quiz attempt page.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct QuizQuestion {
	/// The question text/prompt
	pub question_text: String,
	/// Available options, in page order
	pub options: Vec<QuizOption>,
}

impl QuizQuestion {
	/// Render the options as a lettered list ("A. ...", "B. ...") for prompts.
	pub fn lettered_options(&self) -> String {
		let mut out = String::new();
		for (i, option) in self.options.iter().enumerate() {
			out.push_str(&format!("{}. {}\n", index_to_letter(i), option.text));
		}
		out
	}
}

impl fmt::Display for QuizQuestion {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		writeln!(f, "{}", self.question_text)?;
		writeln!(f)?;
		for (i, option) in self.options.iter().enumerate() {
			writeln!(f, "( ) {}. {}", index_to_letter(i), option.text)?;
		}
		Ok(())
	}
}

/// Convert a 0-based option index to its answer letter (0 -> 'A').
pub fn index_to_letter(idx: usize) -> char {
	(b'A' + (idx % 26) as u8) as char
}

/// Convert an answer letter back to a 0-based index.
/// Accepts "B", "b", "B." and the like; `None` for anything else.
pub fn letter_to_index(letter: &str) -> Option<usize> {
	let c = letter.trim().trim_end_matches(['.', ')', ':']).chars().next()?;
	if c.is_ascii_alphabetic() { Some(c.to_ascii_uppercase() as usize - 'A' as usize) } else { None }
}

/// Extract the scheme+host origin from a URL ("https://portal.example.edu").
pub fn origin_of(url: &str) -> Option<&str> {
	let scheme_end = url.find("://")?;
	let rest = &url[scheme_end + 3..];
	match rest.find('/') {
		Some(path_start) => Some(&url[..scheme_end + 3 + path_start]),
		None => Some(url),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn intent_labels_round_trip() {
		for intent in [PageIntent::Quiz, PageIntent::Content, PageIntent::Video, PageIntent::Feedback, PageIntent::Completion] {
			assert_eq!(PageIntent::parse(intent.as_str()), Some(intent));
		}
	}

	#[test]
	fn intent_parse_tolerates_noise() {
		assert_eq!(PageIntent::parse("  Quiz\n"), Some(PageIntent::Quiz));
		assert_eq!(PageIntent::parse("\"feedback\"."), Some(PageIntent::Feedback));
		assert_eq!(PageIntent::parse("video page with a lecture"), Some(PageIntent::Video));
		assert_eq!(PageIntent::parse("something else"), None);
		assert_eq!(PageIntent::parse(""), None);
	}

	#[test]
	fn letter_index_conversions() {
		assert_eq!(index_to_letter(0), 'A');
		assert_eq!(index_to_letter(3), 'D');
		assert_eq!(letter_to_index("A"), Some(0));
		assert_eq!(letter_to_index("c"), Some(2));
		assert_eq!(letter_to_index(" B. "), Some(1));
		assert_eq!(letter_to_index("3"), None);
		assert_eq!(letter_to_index(""), None);
	}

	#[test]
	fn origin_extraction() {
		assert_eq!(origin_of("https://portal.example.edu/course/view?id=7"), Some("https://portal.example.edu"));
		assert_eq!(origin_of("https://portal.example.edu"), Some("https://portal.example.edu"));
		assert_eq!(origin_of("not a url"), None);
	}

	#[test]
	fn lettered_options_render() {
		let q = QuizQuestion {
			question_text: "Which planet is largest?".into(),
			options: vec![
				QuizOption { input_name: "q1".into(), input_value: "0".into(), text: "Mars".into(), selected: false },
				QuizOption { input_name: "q1".into(), input_value: "1".into(), text: "Jupiter".into(), selected: false },
			],
		};
		assert_eq!(q.lettered_options(), "A. Mars\nB. Jupiter\n");
	}
}
