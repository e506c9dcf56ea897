//! Account commands: `login`, `logout`, `status`.

use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};

use crate::auth;
use crate::context::AppContext;

/// Sign in and store the issued token. Prompts for missing input.
pub async fn login(ctx: &AppContext, username: Option<String>, password: Option<String>) -> Result<()> {
    let username = match username {
        Some(u) => u,
        None => prompt("Email: ")?,
    };
    let password = match password {
        Some(p) => p,
        None => prompt("Password: ")?,
    };

    let token = auth::sign_in(ctx.api().http(), ctx.api().api_url(), &username, &password)
        .await
        .map_err(|e| anyhow::anyhow!("Sign-in failed: {e}"))?;

    ctx.sign_in_with(&token)
        .context("Signed in, but the token could not be stored")?;
    println!("Signed in as {username}.");

    if ctx.credentials().is_overridden() {
        println!("Note: HUBNOTIFY_TOKEN is set and takes precedence over the stored token.");
    }
    Ok(())
}

/// Disconnect and forget the stored token.
pub async fn logout(ctx: &AppContext) -> Result<()> {
    ctx.sign_out().await.context("Failed to clear credentials")?;
    println!("Signed out.");
    if ctx.credentials().is_overridden() {
        println!("Note: HUBNOTIFY_TOKEN is still set in the environment.");
    }
    Ok(())
}

/// Print sign-in state and configured endpoints.
pub async fn status(ctx: &AppContext) -> Result<()> {
    let signed_in = ctx.token().await.is_some();
    let source = if ctx.credentials().is_overridden() {
        " (from HUBNOTIFY_TOKEN)"
    } else {
        ""
    };

    println!("Environment: {}", crate::env::Environment::current());
    println!(
        "Signed in:   {}{}",
        if signed_in { "yes" } else { "no" },
        if signed_in { source } else { "" }
    );
    println!("API:         {}", ctx.config().api_url);
    println!("Hub:         {}", ctx.config().hub_url);
    Ok(())
}

fn prompt(label: &str) -> Result<String> {
    if !atty::is(atty::Stream::Stdin) {
        log::debug!("stdin is not a terminal; reading {} from pipe", label.trim());
    }
    print!("{label}");
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read from stdin")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}
