//! Activity loop - walks course pages in order, answers quizzes, fills the feedback form

use chromiumoxide::Page;
use color_eyre::{Result, eyre::eyre};

use crate::{
	PageIntent, QuizOption, QuizQuestion,
	config::AppConfig,
	index_to_letter, letter_to_index,
	llm::{LlmClient, SuggestedAnswer},
	page::{capture_screenshot, click_text_target, click_text_target_with_retry, dismiss_popups, human_pause, read_activity_title, read_page_text, save_page_html, try_click_text, wait_for_page_change},
	quiz_log::{QuizLog, QuizLogRecord},
};

/// What a single run did, for the end-of-run report.
#[derive(Debug, Default)]
pub struct RunSummary {
	pub activities_visited: u32,
	pub quizzes_submitted: u32,
	pub questions_answered: u32,
	pub questions_blank: u32,
	pub feedback_submitted: bool,
}

/// Walk activities until the completion marker appears, the next-activity
/// control disappears, or the iteration cap is hit.
///
/// Linear and best-effort: no backtracking, no durable state. Re-runs may
/// answer the same question differently.
pub async fn run_course(page: &Page, config: &AppConfig, llm: &LlmClient) -> Result<RunSummary> {
	let mut summary = RunSummary::default();
	let mut quiz_log = QuizLog::start_fresh(&config.quiz_log_path)?;
	let html_dir = config.screenshot_dir.join("html");

	for iteration in 1..=config.max_activities {
		if let Err(e) = dismiss_popups(page).await {
			tracing::warn!("Popup dismissal failed: {e}");
		}
		if let Err(e) = save_page_html(page, &html_dir).await {
			tracing::warn!("Failed to save page HTML: {e}");
		}

		let page_text = read_page_text(page).await?;
		if page_text.contains(&config.completion_marker) {
			tracing::info!("Found completion marker '{}', stopping", config.completion_marker);
			break;
		}

		let title = read_activity_title(page).await.unwrap_or_default();
		tracing::info!("==== Activity {iteration}: {title} ====");
		summary.activities_visited += 1;

		if should_skip(&title, &config.skip_keywords) {
			tracing::info!("Skipping activity, title matches a skip keyword");
		} else {
			let intent = match llm.classify_page(&page_text).await {
				Ok(intent) => intent,
				Err(e) => {
					tracing::warn!("Page classification failed: {e} - treating as content");
					PageIntent::Content
				}
			};
			tracing::info!("Page classified as: {intent}");

			match intent {
				PageIntent::Quiz => handle_quiz_page(page, config, llm, &mut quiz_log, &mut summary).await?,
				PageIntent::Feedback => match fill_feedback_form(page, config).await {
					Ok(true) => {
						summary.feedback_submitted = true;
						tracing::info!("Feedback form submitted");
					}
					Ok(false) => tracing::warn!("No feedback form found on page"),
					Err(e) => tracing::warn!("Feedback form filling failed: {e}"),
				},
				PageIntent::Video => tracing::info!("Video activity, nothing to answer"),
				PageIntent::Completion => {
					tracing::info!("Course completion page reached");
					break;
				}
				PageIntent::Content => {}
			}
		}

		human_pause().await;
		if !advance_to_next_activity(page, config).await? {
			tracing::info!("No next-activity control found, stopping");
			break;
		}
	}

	quiz_log.flush()?;
	tracing::info!("Quiz log written to {}", quiz_log.path().display());
	Ok(summary)
}

/// True when the activity title contains any skip keyword (case-insensitive).
fn should_skip(title: &str, skip_keywords: &[String]) -> bool {
	let title = title.to_lowercase();
	skip_keywords.iter().any(|k| !k.is_empty() && title.contains(&k.to_lowercase()))
}

/// Click the "Next Activity" control. Ok(false) when there is none.
async fn advance_to_next_activity(page: &Page, config: &AppConfig) -> Result<bool> {
	const NEXT_SELECTOR: &str = "a[rel='next'], .activity-navigation a, .activity-navigation button, a.btn, button, a";

	// Prefer the explicit control; fall back to a generic "next" link
	for keywords in [&["next activity"][..], &["continue to next", "next"][..]] {
		match try_click_text(page, NEXT_SELECTOR, keywords).await {
			Ok(true) => {
				tokio::time::sleep(std::time::Duration::from_secs(2)).await;
				return Ok(true);
			}
			Ok(false) => {}
			Err(e) => {
				if let Err(shot_err) = capture_screenshot(page, &config.screenshot_dir, "next_activity_failed").await {
					tracing::warn!("Failed to capture failure screenshot: {shot_err}");
				}
				return Err(e.wrap_err("Failed clicking the next-activity control"));
			}
		}
	}
	Ok(false)
}

/// Answer and submit every question block on a quiz page.
/// Questions whose model call fails are left blank; the attempt is submitted anyway.
async fn handle_quiz_page(page: &Page, config: &AppConfig, llm: &LlmClient, quiz_log: &mut QuizLog, summary: &mut RunSummary) -> Result<()> {
	let mut questions = parse_questions(page).await?;

	if questions.is_empty() {
		// The attempt may not have been started yet
		if try_click_text(page, "button, a.btn, input[type='submit']", &["attempt quiz", "start attempt", "continue your attempt", "re-attempt"]).await? {
			tracing::info!("Started quiz attempt");
			tokio::time::sleep(std::time::Duration::from_secs(2)).await;
			questions = parse_questions(page).await?;
		}
	}

	if questions.is_empty() {
		tracing::warn!("Page classified as quiz but no question blocks found");
		return Ok(());
	}

	for (i, question) in questions.iter().enumerate() {
		tracing::info!("--- Question {} ---", i + 1);
		tracing::info!("{question}");

		let mut record = QuizLogRecord {
			question: question.question_text.clone(),
			options: question.options.iter().map(|o| o.text.clone()).collect(),
			suggested_letter: None,
			suggested_answer: None,
			selected_index: None,
			selected_text: None,
			timestamp: chrono::Utc::now(),
		};

		match llm.answer_question(question).await {
			Ok(suggested) => {
				record.suggested_letter = Some(suggested.letter.clone());
				record.suggested_answer = Some(suggested.answer.clone());

				if let Some(idx) = resolve_selection(question, &suggested) {
					let option = &question.options[idx];
					if !option.selected {
						if let Err(e) = select_option(page, option).await {
							if let Err(shot_err) = capture_screenshot(page, &config.screenshot_dir, "select_option_failed").await {
								tracing::warn!("Failed to capture failure screenshot: {shot_err}");
							}
							return Err(e);
						}
						human_pause().await;
					}
					tracing::info!("Selected: {}. {}", index_to_letter(idx), option.text);
					record.selected_index = Some(idx);
					record.selected_text = Some(option.text.clone());
					summary.questions_answered += 1;
				} else {
					tracing::warn!("Model suggestion '{}' matched no option - leaving question {} blank", suggested.letter, i + 1);
					summary.questions_blank += 1;
				}
			}
			Err(e) => {
				tracing::warn!("Failed to get answer for question {}: {e} - leaving blank", i + 1);
				summary.questions_blank += 1;
			}
		}

		quiz_log.append(record);
	}

	submit_quiz(page, config).await?;
	quiz_log.flush()?;
	summary.quizzes_submitted += 1;
	Ok(())
}

/// Pick which option to click for a model suggestion.
///
/// The letter's index wins, but when the option label there disagrees with the
/// suggested answer text while another label matches it exactly, the matching
/// label is preferred. `None` when the letter is unusable.
fn resolve_selection(question: &QuizQuestion, suggested: &SuggestedAnswer) -> Option<usize> {
	let letter_idx = letter_to_index(&suggested.letter)?;
	if letter_idx >= question.options.len() {
		return None;
	}

	let normalize = |s: &str| s.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
	let want = normalize(&suggested.answer);
	if want.is_empty() {
		return Some(letter_idx);
	}

	let at_letter = normalize(&question.options[letter_idx].text);
	if at_letter == want || at_letter.contains(&want) || want.contains(&at_letter) {
		return Some(letter_idx);
	}

	Some(question.options.iter().position(|o| normalize(&o.text) == want).unwrap_or(letter_idx))
}

/// Parse multiple-choice question blocks from the page.
async fn parse_questions(page: &Page) -> Result<Vec<QuizQuestion>> {
	let parse_script = r#"
		(function() {
			const questions = [];
			const seen = new Set();
			const containers = document.querySelectorAll('.que, .question, .quiz-question, fieldset');

			for (const container of containers) {
				const radios = container.querySelectorAll('input[type="radio"]');
				if (radios.length === 0) continue;
				const groupName = radios[0].name || '';
				if (!groupName || seen.has(groupName)) continue;
				seen.add(groupName);

				const textEl = container.querySelector('.qtext, .question-text, legend, p');
				const questionText = textEl ? textEl.textContent.replace(/\s+/g, ' ').trim() : '';

				const options = [];
				for (const radio of radios) {
					if (radio.name !== groupName) continue;
					let label = null;
					if (radio.id) label = container.querySelector('label[for="' + radio.id + '"]');
					if (!label) {
						const wrapper = radio.closest('div, li, label');
						if (wrapper) label = wrapper.querySelector('label, .ml-1, .flex-fill');
					}
					const text = label ? label.textContent.replace(/\s+/g, ' ').trim() : (radio.value || '');
					options.push({
						input_name: radio.name || '',
						input_value: radio.value || '',
						text: text,
						selected: radio.checked
					});
				}

				if (options.length > 1) {
					questions.push({ question_text: questionText, options: options });
				}
			}

			return JSON.stringify(questions);
		})()
	"#;

	let result = page.evaluate(parse_script).await.map_err(|e| eyre!("Failed to parse questions: {e}"))?;
	let json_str = result.value().and_then(|v| v.as_str()).unwrap_or("[]");
	let questions: Vec<QuizQuestion> = serde_json::from_str(json_str).map_err(|e| eyre!("Failed to parse question JSON: {e}"))?;
	Ok(questions)
}

/// Click the radio input for an option.
async fn select_option(page: &Page, option: &QuizOption) -> Result<()> {
	let name_js = serde_json::to_string(&option.input_name)?;
	let value_js = serde_json::to_string(&option.input_value)?;

	let script = format!(
		r#"
		(function() {{
			const name = {name_js};
			const value = {value_js};
			for (const input of document.querySelectorAll('input[type="radio"]')) {{
				if (input.name === name && input.value === value) {{
					input.click();
					return true;
				}}
			}}
			return false;
		}})()
		"#
	);

	let result = page.evaluate(script).await.map_err(|e| eyre!("Failed to select option: {e}"))?;
	if result.value().and_then(|v| v.as_bool()) != Some(true) {
		return Err(eyre!("Radio input '{}'='{}' not found on page", option.input_name, option.input_value));
	}
	Ok(())
}

/// Submit the attempt, then click through any confirmation dialog.
async fn submit_quiz(page: &Page, config: &AppConfig) -> Result<()> {
	click_text_target_with_retry(
		page,
		&config.screenshot_dir,
		"quiz_submit",
		r#"input[type="submit"][name="next"], #responseform input[type="submit"], .submitbtns input[type="submit"], input[type="submit"], button[type="submit"]"#,
		&[],
		config.button_click_retries,
	)
	.await?;

	// Either the form navigates directly, or a "submit all and finish" style
	// modal appears first and needs confirming
	if !wait_for_page_change(page, std::time::Duration::from_secs(5)).await?
		&& let Ok(true) = try_click_text(
			page,
			r#".modal button, .modal-dialog button, [role="dialog"] button, [data-region="modal"] button"#,
			&["submit", "finish", "confirm", "yes"],
		)
		.await
	{
		tracing::info!("Clicked confirmation dialog");
		if !wait_for_page_change(page, std::time::Duration::from_secs(10)).await? {
			tracing::warn!("Page did not navigate after confirming the submission");
		}
	}

	tracing::info!("Quiz submitted");
	Ok(())
}

/// Fill the feedback form: highest rating in every radio group, the configured
/// comment in every textarea, then submit. Ok(false) when no form is present.
async fn fill_feedback_form(page: &Page, config: &AppConfig) -> Result<bool> {
	let comment_js = serde_json::to_string(&config.feedback_comment)?;

	let fill_script = format!(
		r#"
		(function() {{
			const comment = {comment_js};
			const form = document.querySelector('form[action*="feedback"], form[action*="survey"], form.feedback-form, form');
			if (!form) return false;

			const groups = {{}};
			for (const radio of form.querySelectorAll('input[type="radio"]')) {{
				(groups[radio.name] = groups[radio.name] || []).push(radio);
			}}
			if (Object.keys(groups).length === 0 && form.querySelectorAll('textarea').length === 0) return false;

			for (const name of Object.keys(groups)) {{
				const radios = groups[name];
				// highest numeric value = best rating; otherwise take the last option
				let best = radios[radios.length - 1];
				let bestVal = -Infinity;
				for (const radio of radios) {{
					const v = parseFloat(radio.value);
					if (!isNaN(v) && v > bestVal) {{ bestVal = v; best = radio; }}
				}}
				best.click();
			}}

			for (const area of form.querySelectorAll('textarea')) {{
				area.value = comment;
				area.dispatchEvent(new Event('input', {{ bubbles: true }}));
				area.dispatchEvent(new Event('change', {{ bubbles: true }}));
			}}
			return true;
		}})()
		"#
	);

	let result = page.evaluate(fill_script).await.map_err(|e| eyre!("Failed to fill feedback form: {e}"))?;
	if result.value().and_then(|v| v.as_bool()) != Some(true) {
		return Ok(false);
	}
	human_pause().await;

	click_text_target(
		page,
		&config.screenshot_dir,
		"feedback_submit",
		r#"form input[type="submit"], form button[type="submit"], button[type="submit"]"#,
		&[],
	)
	.await?;
	tokio::time::sleep(std::time::Duration::from_secs(2)).await;
	Ok(true)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn question(options: &[&str]) -> QuizQuestion {
		QuizQuestion {
			question_text: "Which planet is largest?".into(),
			options: options
				.iter()
				.enumerate()
				.map(|(i, text)| QuizOption {
					input_name: "q1:answer".into(),
					input_value: i.to_string(),
					text: text.to_string(),
					selected: false,
				})
				.collect(),
		}
	}

	fn suggestion(letter: &str, answer: &str) -> SuggestedAnswer {
		SuggestedAnswer { letter: letter.into(), answer: answer.into() }
	}

	#[test]
	fn selection_follows_the_letter() {
		let q = question(&["Mars", "Jupiter", "Venus"]);
		assert_eq!(resolve_selection(&q, &suggestion("B", "Jupiter")), Some(1));
	}

	#[test]
	fn selection_prefers_matching_label_over_wrong_letter() {
		// Model off-by-one: letter A but answer text clearly names option C
		let q = question(&["Mars", "Jupiter", "Venus"]);
		assert_eq!(resolve_selection(&q, &suggestion("A", "Venus")), Some(2));
	}

	#[test]
	fn selection_keeps_letter_when_answer_text_matches_nothing() {
		let q = question(&["Mars", "Jupiter", "Venus"]);
		assert_eq!(resolve_selection(&q, &suggestion("C", "Saturn")), Some(2));
	}

	#[test]
	fn selection_tolerates_partial_label_match() {
		let q = question(&["Mars, the red planet", "Jupiter"]);
		assert_eq!(resolve_selection(&q, &suggestion("A", "Mars")), Some(0));
	}

	#[test]
	fn selection_rejects_out_of_range_letter() {
		let q = question(&["Mars", "Jupiter"]);
		assert_eq!(resolve_selection(&q, &suggestion("F", "Jupiter")), None);
		assert_eq!(resolve_selection(&q, &suggestion("7", "Jupiter")), None);
	}

	#[test]
	fn selection_with_empty_answer_text_uses_letter() {
		let q = question(&["Mars", "Jupiter"]);
		assert_eq!(resolve_selection(&q, &suggestion("B", "")), Some(1));
	}

	#[test]
	fn skip_keywords_match_case_insensitively() {
		let keywords = vec!["video".to_string(), "webinar".to_string()];
		assert!(should_skip("Module 3: Video Lecture", &keywords));
		assert!(should_skip("WEBINAR recording", &keywords));
		assert!(!should_skip("Module 3 Quiz", &keywords));
		assert!(!should_skip("", &keywords));
	}

	#[test]
	fn empty_skip_keywords_never_match() {
		assert!(!should_skip("Anything", &[]));
		assert!(!should_skip("Anything", &[String::new()]));
	}

	#[test]
	fn question_json_from_page_deserializes() {
		// Shape produced by the in-page parse script
		let json = r#"[{
			"question_text": "Which planet is largest?",
			"options": [
				{"input_name": "q1:answer", "input_value": "0", "text": "Mars", "selected": false},
				{"input_name": "q1:answer", "input_value": "1", "text": "Jupiter", "selected": true}
			]
		}]"#;
		let questions: Vec<QuizQuestion> = serde_json::from_str(json).unwrap();
		assert_eq!(questions.len(), 1);
		assert_eq!(questions[0].options[1].text, "Jupiter");
		assert!(questions[0].options[1].selected);
	}
}
