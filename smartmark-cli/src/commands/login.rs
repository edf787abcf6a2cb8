//! Login command - sign in with the configured backend

use anyhow::Result;
use colored::Colorize;
use dialoguer::Input;
use smartmark_core::config::{Backend, Config};
use smartmark_core::ports::SignInFlow;
use smartmark_core::LogEvent;

use super::{get_context, get_logger, get_smartmark_dir, log_event};
use crate::output;

pub async fn run(
    provider: &str,
    redirect_to: Option<String>,
    callback: Option<String>,
    email: Option<String>,
) -> Result<()> {
    if let Some(email) = email {
        let smartmark_dir = get_smartmark_dir()?;
        let mut config = Config::load(&smartmark_dir)?;
        config.local_email = Some(email);
        config.save(&smartmark_dir)?;
    }

    let ctx = get_context()?;
    let logger = get_logger();
    let gate = ctx.open_gate().await;

    if callback.is_none() {
        if let Some(session) = gate.current() {
            output::info(&format!("Already signed in as {}", session.email()));
            return Ok(());
        }
    }

    let result = match callback {
        Some(url) => gate.complete_sign_in(&url).await,
        None => {
            let redirect_to = redirect_to.unwrap_or_else(|| ctx.config.redirect_to().to_string());
            match gate.sign_in(provider, &redirect_to).await {
                Ok(SignInFlow::Completed(session)) => Ok(session),
                Ok(SignInFlow::Redirect(url)) => {
                    println!("\nOpen this URL in your browser to sign in with {}:\n", provider);
                    println!("  {}\n", url.as_str().underline());
                    let pasted: String = Input::new()
                        .with_prompt("Paste the URL you were redirected to")
                        .interact_text()?;
                    gate.complete_sign_in(&pasted).await
                }
                Err(e) => Err(e),
            }
        }
    };

    let backend = ctx.backend().to_string();
    match result {
        Ok(session) => {
            log_event(&logger, LogEvent::new("login").with_backend(&backend).with_command("login"));
            output::success(&format!("Signed in as {}", session.email()));
            if ctx.backend() == Backend::Local {
                println!("{}", format!("User ID: {}", session.user_id()).dimmed());
            }
            Ok(())
        }
        Err(e) => {
            log_event(
                &logger,
                LogEvent::new("login_failed")
                    .with_backend(&backend)
                    .with_command("login")
                    .with_error("Sign-in failed")
                    .with_error_details(e.to_string()),
            );
            Err(e.into())
        }
    }
}
