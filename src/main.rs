use std::path::PathBuf;

use campus_headless::{config::AppConfig, llm::LlmClient, login, runner};
use chromiumoxide::browser::{Browser, BrowserConfig};
use clap::Parser;
use color_eyre::{Result, eyre::eyre};
use futures::StreamExt;

#[derive(Debug, Parser)]
#[command(name = "campus_headless")]
#[command(about = "Automated course portal login, navigation and quiz answering", long_about = None)]
struct Args {
	/// Run with visible browser window (non-headless mode)
	#[arg(long)]
	visible: bool,

	/// Course page to start from after login
	#[arg(short, long)]
	target_url: String,

	/// Path to the TOML config file (default: campus_headless.toml if present)
	#[arg(short, long)]
	config: Option<PathBuf>,

	/// Assume an existing browser session and skip the login flow
	#[arg(long)]
	skip_login: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;
	tracing_subscriber::fmt()
		.with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")))
		.init();

	let args = Args::parse();
	let mut config = AppConfig::load(args.config.as_deref())?;
	if args.visible {
		config.visible = true;
	}

	let llm = LlmClient::new(&config)?;

	// Configure browser based on visibility flag
	let browser_config = if config.visible {
		BrowserConfig::builder().with_head().build().map_err(|e| eyre!("Failed to build browser config: {e}"))?
	} else {
		BrowserConfig::builder().build().map_err(|e| eyre!("Failed to build browser config: {e}"))?
	};

	let (mut browser, mut handler) = Browser::launch(browser_config).await.map_err(|e| eyre!("Failed to launch browser: {e}"))?;

	// Consume browser events so the CDP connection doesn't stall
	let handle = tokio::spawn(async move { while let Some(_event) = handler.next().await {} });

	let page = browser.new_page("about:blank").await.map_err(|e| eyre!("Failed to create new page: {e}"))?;

	let run = async {
		if args.skip_login {
			tracing::info!("Skipping login, navigating straight to target");
			page.goto(&args.target_url).await.map_err(|e| eyre!("Failed to navigate to target URL: {e}"))?;
			tokio::time::sleep(std::time::Duration::from_secs(3)).await;
		} else {
			login::login_and_navigate(&page, &config, &args.target_url).await?;
		}
		runner::run_course(&page, &config, &llm).await
	};

	// The overall run timeout is the only cancellation mechanism
	let summary = tokio::time::timeout(std::time::Duration::from_secs(config.run_timeout_secs), run)
		.await
		.map_err(|_| eyre!("Run timed out after {}s", config.run_timeout_secs))??;

	tracing::info!("Run complete:");
	tracing::info!("  activities visited:  {}", summary.activities_visited);
	tracing::info!("  quizzes submitted:   {}", summary.quizzes_submitted);
	tracing::info!("  questions answered:  {}", summary.questions_answered);
	tracing::info!("  questions left blank: {}", summary.questions_blank);
	tracing::info!("  feedback submitted:  {}", summary.feedback_submitted);

	// Clean up
	drop(page);
	browser.close().await.map_err(|e| eyre!("Failed to close browser: {e}"))?;
	drop(browser);
	handle.abort();

	Ok(())
}
