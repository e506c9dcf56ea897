//! `list` and `respond`.

use anyhow::{Context, Result};

use crate::context::AppContext;
use crate::feed;
use crate::render;

/// Load the stored notifications and print the feed.
pub async fn list(ctx: &AppContext) -> Result<()> {
    ctx.load_feed()
        .await
        .context("Failed to load notifications")?;
    print!(
        "{}",
        render::feed(&feed::lock(ctx.feed()), ctx.config().render_markup)
    );
    Ok(())
}

/// Accept or reject the invitation `related_id`.
pub async fn respond(ctx: &AppContext, related_id: &str, accepted: bool) -> Result<()> {
    match ctx.respond(related_id, accepted).await {
        Ok(marked) => {
            log::debug!("Marked {} entries read", marked);
            println!("{}", render::respond_message(accepted, true));
            Ok(())
        }
        Err(e) => {
            eprintln!("{}", render::respond_message(accepted, false));
            Err(e).with_context(|| format!("Failed to respond to invitation {related_id}"))
        }
    }
}
