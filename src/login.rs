use chromiumoxide::Page;
use color_eyre::{
	Result,
	eyre::{bail, eyre},
};

use crate::{
	config::AppConfig, origin_of,
	page::{dismiss_popups, wait_for_page_change},
};

/// Selectors that only exist for an authenticated session.
const LOGGED_IN_SELECTOR: &str = "a[href*='logout'], .usermenu, #user-menu-toggle";

/// Log into the portal and land on the target URL.
///
/// Flow: navigate to the portal origin, click the login link if one is shown,
/// fill the credential form via injected JS (more reliable than typing), submit,
/// verify by the presence of a user menu/logout link. Login failure is fatal.
pub async fn login_and_navigate(page: &Page, config: &AppConfig, target_url: &str) -> Result<()> {
	let base_url = match &config.base_url {
		Some(url) => url.as_str(),
		None => origin_of(target_url).ok_or_else(|| eyre!("Cannot derive portal origin from target URL '{target_url}'"))?,
	};

	tracing::info!("Navigating to portal: {base_url}");
	page.goto(base_url).await.map_err(|e| eyre!("Failed to navigate to portal: {e}"))?;
	tokio::time::sleep(std::time::Duration::from_secs(2)).await;

	if let Err(e) = dismiss_popups(page).await {
		tracing::warn!("Popup dismissal failed: {e}");
	}

	// Already holding a session from a previous run
	if page.find_element(LOGGED_IN_SELECTOR).await.is_ok() {
		tracing::info!("Already logged in, user menu found");
		return goto_target(page, target_url).await;
	}

	// Some portals show the form directly, others hide it behind a login link
	if page.find_element("input[name='username'], input[id='username']").await.is_err() {
		tracing::info!("Clicking login link...");
		if let Ok(login_link) = page.find_element("a[href*='login']").await {
			login_link.click().await.map_err(|e| eyre!("Failed to click login link: {e}"))?;
			tokio::time::sleep(std::time::Duration::from_secs(2)).await;
		}
	}

	if config.username.is_empty() || config.password.is_empty() {
		bail!("No credentials configured (set CAMPUS_USERNAME / CAMPUS_PASSWORD or the config file fields)");
	}

	tracing::info!("Filling login form...");
	fill_and_submit_login_form(page, config).await?;
	if !wait_for_page_change(page, std::time::Duration::from_secs(10)).await? {
		tracing::warn!("Page URL did not change after submitting credentials");
	}

	if page.find_element(LOGGED_IN_SELECTOR).await.is_err() {
		let current_url = page.url().await.ok().flatten().unwrap_or_default();
		bail!("Login failed: no user menu found after submitting credentials (at {current_url})");
	}
	tracing::info!("Login successful");

	goto_target(page, target_url).await
}

async fn goto_target(page: &Page, target_url: &str) -> Result<()> {
	tracing::info!("Navigating to target: {target_url}");
	page.goto(target_url).await.map_err(|e| eyre!("Failed to navigate to target URL: {e}"))?;
	tokio::time::sleep(std::time::Duration::from_secs(3)).await;

	let final_url = page.url().await.ok().flatten().unwrap_or_default();
	let target_base = target_url.split('?').next().unwrap_or(target_url);
	let final_base = final_url.split('?').next().unwrap_or(&final_url);
	if final_base != target_base {
		bail!("Navigation failed: expected to be at {target_url}, but at {final_url}");
	}
	Ok(())
}

/// Fill username/password and submit the login form.
async fn fill_and_submit_login_form(page: &Page, config: &AppConfig) -> Result<()> {
	let username_js = serde_json::to_string(&config.username)?;
	let password_js = serde_json::to_string(&config.password)?;

	let fill_script = format!(
		r#"
		(function() {{
			const usernameField = document.querySelector('input[name="username"], input[id="username"]');
			const passwordField = document.querySelector('input[name="password"], input[id="password"], input[type="password"]');
			if (usernameField && passwordField) {{
				usernameField.value = {username_js};
				passwordField.value = {password_js};
				return true;
			}}
			return false;
		}})()
		"#
	);
	let filled = page.evaluate(fill_script).await.map_err(|e| eyre!("Failed to fill login form: {e}"))?;
	if filled.value().and_then(|v| v.as_bool()) != Some(true) {
		bail!("Login form fields not found on page");
	}

	let submit_script = r#"
		(function() {
			const submitButton = document.querySelector('button[type="submit"], input[type="submit"]');
			if (submitButton) {
				submitButton.click();
				return true;
			}
			const form = document.querySelector('form');
			if (form) {
				form.submit();
				return true;
			}
			return false;
		})()
	"#;
	page.evaluate(submit_script).await.map_err(|e| eyre!("Failed to submit login form: {e}"))?;

	Ok(())
}
