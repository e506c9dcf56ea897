//! `watch`: live feed.
//!
//! Loads the stored list, connects the push session and prints every
//! arrival and status change. Line commands on stdin:
//!
//! | command        | effect                              |
//! |----------------|-------------------------------------|
//! | `accept <id>`  | accept invitation `<id>`            |
//! | `reject <id>`  | reject invitation `<id>`            |
//! | `ack`          | reset the badge counter             |
//! | `list`         | print the feed                      |
//! | `connect`      | connect (no-op while connected)     |
//! | `disconnect`   | disconnect                          |
//! | `quit`         | disconnect and exit                 |

use anyhow::{bail, Result};
use futures_util::stream::{FuturesUnordered, StreamExt};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

use crate::context::AppContext;
use crate::feed;
use crate::render;

/// A parsed stdin line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchCommand {
    /// Accept the invitation with this related id.
    Accept(String),
    /// Reject the invitation with this related id.
    Reject(String),
    /// Reset the badge.
    Ack,
    /// Print the feed.
    List,
    /// Connect the session.
    Connect,
    /// Disconnect the session.
    Disconnect,
    /// Leave.
    Quit,
    /// Print the command list.
    Help,
    /// Blank line.
    Empty,
    /// Anything else, with the reason.
    Invalid(String),
}

/// Parse one line of input.
pub fn parse_command(line: &str) -> WatchCommand {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return WatchCommand::Empty;
    };
    let arg = words.next();

    match (verb.to_ascii_lowercase().as_str(), arg) {
        ("accept", Some(id)) => WatchCommand::Accept(id.to_string()),
        ("reject", Some(id)) => WatchCommand::Reject(id.to_string()),
        ("accept" | "reject", None) => WatchCommand::Invalid(format!("usage: {verb} <related-id>")),
        ("ack", _) => WatchCommand::Ack,
        ("list", _) => WatchCommand::List,
        ("connect", _) => WatchCommand::Connect,
        ("disconnect", _) => WatchCommand::Disconnect,
        ("quit" | "exit", _) => WatchCommand::Quit,
        ("help" | "?", _) => WatchCommand::Help,
        _ => WatchCommand::Invalid(format!("unknown command: {verb}")),
    }
}

const HELP: &str = "commands: accept <id> | reject <id> | ack | list | connect | disconnect | quit";

/// Run until `quit`, end of input or Ctrl-C.
pub async fn run(ctx: &AppContext, hub_url: Option<String>) -> Result<()> {
    if ctx.token().await.is_none() {
        bail!("Not signed in. Run `hubnotify login` first.");
    }
    let hub_url = hub_url.unwrap_or_else(|| ctx.config().hub_url.clone());
    let policy = ctx.config().render_markup;

    match ctx.load_feed().await {
        Ok(count) => log::info!("Loaded {} notifications", count),
        Err(e) => eprintln!("Could not load notifications: {e}"),
    }
    print!("{}", render::feed(&feed::lock(ctx.feed()), policy));

    drive(ctx, &hub_url, BufReader::new(tokio::io::stdin())).await
}

/// The interactive loop over any line source.
///
/// Connects, then prints status changes and arrivals while executing line
/// commands. Commands that wait on the network run alongside the loop, so
/// arrivals, status changes and Ctrl-C are handled while they are pending.
/// Always ends disconnected.
pub async fn drive<R>(ctx: &AppContext, hub_url: &str, input: R) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let policy = ctx.config().render_markup;
    let mut status_rx = ctx.session().subscribe();
    let mut arrivals = ctx.session().arrivals();
    let mut lines = input.lines();

    let mut pending = FuturesUnordered::new();
    pending.push(handle_command(ctx, hub_url, WatchCommand::Connect));

    let outcome = loop {
        tokio::select! {
            changed = status_rx.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let status = status_rx.borrow_and_update().clone();
                println!("{}", render::status_line(&status));
            }

            arrival = arrivals.recv() => match arrival {
                Ok(notification) => {
                    print!("{}", render::notification_block(&notification, policy));
                    let badge = render::badge(feed::lock(ctx.feed()).counter());
                    println!("Badge: {badge}");
                }
                Err(RecvError::Lagged(skipped)) => {
                    log::warn!("Display fell behind, {} arrivals not shown", skipped);
                }
                Err(RecvError::Closed) => break Ok(()),
            },

            Some(()) = pending.next(), if !pending.is_empty() => {}

            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break Ok(()),
                    Err(e) => break Err(e.into()),
                };
                match parse_command(&line) {
                    WatchCommand::Quit => break Ok(()),
                    command => pending.push(handle_command(ctx, hub_url, command)),
                }
            }

            _ = tokio::signal::ctrl_c() => {
                log::info!("Interrupted");
                break Ok(());
            }
        }
    };

    // Abandon in-flight commands; disconnect discards a half-made session.
    drop(pending);
    ctx.session().disconnect().await;
    println!("{}", render::status_line(&ctx.session().status()));
    outcome
}

/// Execute one command other than `quit`.
async fn handle_command(ctx: &AppContext, hub_url: &str, command: WatchCommand) {
    let policy = ctx.config().render_markup;
    match command {
        WatchCommand::Accept(id) => respond(ctx, &id, true).await,
        WatchCommand::Reject(id) => respond(ctx, &id, false).await,
        WatchCommand::Ack => {
            feed::lock(ctx.feed()).reset_counter();
            println!("Badge cleared.");
        }
        WatchCommand::List => print!("{}", render::feed(&feed::lock(ctx.feed()), policy)),
        WatchCommand::Connect => ctx.connect_to(hub_url).await,
        WatchCommand::Disconnect => ctx.session().disconnect().await,
        WatchCommand::Quit | WatchCommand::Empty => {}
        WatchCommand::Help => println!("{HELP}"),
        WatchCommand::Invalid(reason) => println!("{reason}\n{HELP}"),
    }
}

async fn respond(ctx: &AppContext, related_id: &str, accepted: bool) {
    match ctx.respond(related_id, accepted).await {
        Ok(_) => println!("{}", render::respond_message(accepted, true)),
        Err(e) => {
            log::warn!("Respond to {} failed: {}", related_id, e);
            println!("{}", render::respond_message(accepted, false));
        }
    }
}
