//! Page-level browser helpers: text-matched clicking with screenshot-on-failure,
//! popup dismissal, and debugging dumps.

use std::{
	future::Future,
	path::{Path, PathBuf},
	time::Duration,
};

use chromiumoxide::{Page, cdp::browser_protocol::page::CaptureScreenshotFormat, page::ScreenshotParams};
use color_eyre::{
	Result,
	eyre::{bail, eyre},
};
use rand::Rng;

/// Capture a full-page PNG into `dir` with a timestamped, sanitized filename.
pub async fn capture_screenshot(page: &Page, dir: &Path, label: &str) -> Result<PathBuf> {
	std::fs::create_dir_all(dir).map_err(|e| eyre!("Failed to create screenshot dir: {e}"))?;

	let params = ScreenshotParams::builder().format(CaptureScreenshotFormat::Png).full_page(true).build();
	let bytes = page.screenshot(params).await.map_err(|e| eyre!("Failed to capture screenshot: {e}"))?;

	let timestamp = chrono::Utc::now().format("%Y%m%dT%H%M%S");
	let safe_label: String = label.chars().map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' }).collect();
	let path = dir.join(format!("{timestamp}_{safe_label}.png"));

	std::fs::write(&path, bytes).map_err(|e| eyre!("Failed to write screenshot: {e}"))?;
	tracing::info!("Saved screenshot to {}", path.display());
	Ok(path)
}

/// Click the first element matching `selector` whose visible text (or value)
/// contains one of `keywords`, case-insensitive. An empty keyword list clicks
/// the first selector match. Returns false if nothing matched.
pub async fn try_click_text(page: &Page, selector: &str, keywords: &[&str]) -> Result<bool> {
	let selector_js = serde_json::to_string(selector)?;
	let keywords_js = serde_json::to_string(keywords)?;

	let script = format!(
		r#"
		(function() {{
			const keywords = {keywords_js}.map(k => k.toLowerCase());
			const elements = document.querySelectorAll({selector_js});
			for (const el of elements) {{
				const text = (el.textContent || el.value || '').trim().toLowerCase();
				if (keywords.length === 0 || keywords.some(k => text.includes(k))) {{
					el.click();
					return true;
				}}
			}}
			return false;
		}})()
		"#
	);

	let result = page.evaluate(script).await.map_err(|e| eyre!("Failed to evaluate click script: {e}"))?;
	Ok(result.value().and_then(|v| v.as_bool()).unwrap_or(false))
}

/// Click a required control. On any failure (element missing or click error)
/// a screenshot is captured into `screenshot_dir` and the error is re-thrown,
/// aborting the run.
pub async fn click_text_target(page: &Page, screenshot_dir: &Path, description: &str, selector: &str, keywords: &[&str]) -> Result<()> {
	match try_click_text(page, selector, keywords).await {
		Ok(true) => Ok(()),
		Ok(false) => {
			screenshot_on_failure(page, screenshot_dir, description).await;
			bail!("Could not find '{description}' on page")
		}
		Err(e) => {
			screenshot_on_failure(page, screenshot_dir, description).await;
			Err(e.wrap_err(format!("Click on '{description}' failed")))
		}
	}
}

/// Like [`click_text_target`] but retries transient click failures.
/// A missing element is not retried - if it isn't there now, it won't appear.
pub async fn click_text_target_with_retry(page: &Page, screenshot_dir: &Path, description: &str, selector: &str, keywords: &[&str], max_retries: u32) -> Result<()> {
	let max_retries = max_retries.max(1);
	for attempt in 1..=max_retries {
		match try_click_text(page, selector, keywords).await {
			Ok(true) => return Ok(()),
			Ok(false) => {
				screenshot_on_failure(page, screenshot_dir, description).await;
				bail!("Could not find '{description}' on page");
			}
			Err(e) =>
				if attempt < max_retries {
					tracing::warn!("Click on '{description}' failed (attempt {attempt}/{max_retries}): {e}");
					tokio::time::sleep(std::time::Duration::from_millis(500)).await;
				} else {
					screenshot_on_failure(page, screenshot_dir, description).await;
					return Err(e.wrap_err(format!("Click on '{description}' failed after {max_retries} attempts")));
				},
		}
	}
	unreachable!("retry loop always returns")
}

async fn screenshot_on_failure(page: &Page, screenshot_dir: &Path, description: &str) {
	if let Err(e) = capture_screenshot(page, screenshot_dir, &format!("click_failed_{description}")).await {
		tracing::warn!("Failed to capture failure screenshot: {e}");
	}
}

/// Dismissal texts that must match the whole button text; short words would
/// otherwise fire on unrelated labels ("ok" inside "Open workbook").
const DISMISS_EXACT: &[&str] = &["ok", "×"];
const DISMISS_FUZZY: &[&str] = &["accept", "got it", "close", "dismiss", "skip", "no thanks"];

/// Dismiss cookie banners, tour overlays and other modal noise by clicking
/// buttons with known dismissal text. Best-effort; returns how many were clicked.
pub async fn dismiss_popups(page: &Page) -> Result<usize> {
	let exact_js = serde_json::to_string(DISMISS_EXACT)?;
	let fuzzy_js = serde_json::to_string(DISMISS_FUZZY)?;

	let script = format!(
		r#"
		(function() {{
			const exact = {exact_js};
			const fuzzy = {fuzzy_js};
			const candidates = document.querySelectorAll(
				'.modal button, .modal-dialog button, [role="dialog"] button, ' +
				'.popover button, .tour-step button, .cookie-banner button, ' +
				'button.close, [data-dismiss="modal"], [aria-label="Close"]'
			);
			let clicked = 0;
			for (const btn of candidates) {{
				const text = (btn.textContent || btn.value || '').trim().toLowerCase();
				const label = (btn.getAttribute('aria-label') || '').trim().toLowerCase();
				if (exact.includes(text) || exact.includes(label) || fuzzy.some(k => text.includes(k) || label.includes(k))) {{
					btn.click();
					clicked++;
				}}
			}}
			return clicked;
		}})()
		"#
	);

	let result = page.evaluate(script).await.map_err(|e| eyre!("Failed to evaluate popup dismissal: {e}"))?;
	let clicked = result.value().and_then(|v| v.as_u64()).unwrap_or(0) as usize;
	if clicked > 0 {
		tracing::info!("Dismissed {clicked} popup element(s)");
	}
	Ok(clicked)
}

/// Read the visible text of the page body.
pub async fn read_page_text(page: &Page) -> Result<String> {
	let result = page
		.evaluate("document.body ? document.body.innerText : ''")
		.await
		.map_err(|e| eyre!("Failed to read page text: {e}"))?;
	Ok(result.value().and_then(|v| v.as_str()).unwrap_or_default().to_string())
}

/// Read the current activity title (page heading, falling back to the document title).
pub async fn read_activity_title(page: &Page) -> Result<String> {
	let script = r#"
		(function() {
			const heading = document.querySelector('h1, .page-header-headings, .activity-header h2');
			if (heading && heading.textContent.trim()) return heading.textContent.trim();
			return document.title || '';
		})()
	"#;
	let result = page.evaluate(script).await.map_err(|e| eyre!("Failed to read activity title: {e}"))?;
	Ok(result.value().and_then(|v| v.as_str()).unwrap_or_default().to_string())
}

/// Wait for the page URL to change (indicating navigation or form submission).
/// Gives up after `max_wait` and returns Ok(false); the caller decides whether
/// a stationary URL is a problem.
pub async fn wait_for_page_change(page: &Page, max_wait: Duration) -> Result<bool> {
	let initial_url = page.url().await.map_err(|e| eyre!("Failed to get URL: {e}"))?;

	let changed = wait_until_changed(max_wait, Duration::from_millis(500), initial_url, move || async move {
		page.url().await.map_err(|e| eyre!("Failed to get URL: {e}"))
	})
	.await?;

	if changed {
		// Give the new page a moment to settle
		tokio::time::sleep(Duration::from_secs(1)).await;
	}
	Ok(changed)
}

/// Poll `current` every `interval` until it differs from `initial` or the
/// deadline passes.
async fn wait_until_changed<F, Fut>(max_wait: Duration, interval: Duration, initial: Option<String>, mut current: F) -> Result<bool>
where
	F: FnMut() -> Fut,
	Fut: Future<Output = Result<Option<String>>>,
{
	let deadline = tokio::time::Instant::now() + max_wait;
	while tokio::time::Instant::now() < deadline {
		tokio::time::sleep(interval).await;
		if current().await? != initial {
			return Ok(true);
		}
	}
	Ok(false)
}

/// Save the current page's HTML to disk for debugging.
/// Uses the page URL as the filename label.
pub async fn save_page_html(page: &Page, dir: &Path) -> Result<PathBuf> {
	std::fs::create_dir_all(dir).map_err(|e| eyre!("Failed to create HTML dir: {e}"))?;

	let url = page.url().await.ok().flatten().unwrap_or_default();
	let label = url.replace("https://", "").replace("http://", "");

	let html = page.evaluate("document.documentElement.outerHTML").await.map_err(|e| eyre!("Failed to get page HTML: {e}"))?;
	let html_str = html.value().and_then(|v| v.as_str()).unwrap_or("<html></html>");

	let timestamp = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default().as_secs();
	let safe_label: String = label.chars().map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' }).collect();

	let filepath = dir.join(format!("{timestamp}_{safe_label}.html"));
	std::fs::write(&filepath, html_str).map_err(|e| eyre!("Failed to write HTML file: {e}"))?;

	tracing::debug!("Saved page HTML to {}", filepath.display());
	Ok(filepath)
}

/// Small randomized pause between UI actions so interactions don't fire
/// back-to-back faster than the portal's scripts can react.
pub async fn human_pause() {
	let ms = rand::rng().random_range(300..=900);
	tokio::time::sleep(Duration::from_millis(ms)).await;
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicUsize, Ordering};

	use super::*;

	#[tokio::test]
	async fn url_change_is_detected_within_the_deadline() {
		let polls = AtomicUsize::new(0);
		let polls_ref = &polls;

		let changed = wait_until_changed(Duration::from_secs(5), Duration::from_millis(1), Some("https://a".into()), move || async move {
			let n = polls_ref.fetch_add(1, Ordering::SeqCst);
			Ok(Some(if n < 2 { "https://a".to_string() } else { "https://b".to_string() }))
		})
		.await
		.unwrap();

		assert!(changed);
		assert_eq!(polls.load(Ordering::SeqCst), 3);
	}

	#[tokio::test]
	async fn stationary_url_times_out_with_false() {
		let changed = wait_until_changed(Duration::from_millis(30), Duration::from_millis(1), Some("https://a".into()), || async {
			Ok(Some("https://a".to_string()))
		})
		.await
		.unwrap();

		assert!(!changed);
	}

	#[test]
	fn short_dismissal_words_only_match_whole_button_texts() {
		assert!(DISMISS_EXACT.contains(&"ok"));
		assert!(!DISMISS_FUZZY.contains(&"ok"));
		// substring keywords must not fire on ordinary action buttons
		for benign in ["open workbook", "book now", "next activity"] {
			assert!(!DISMISS_FUZZY.iter().any(|k| benign.contains(k)), "'{benign}' would be dismissed");
		}
	}
}
