//! The `inspect` subcommand.

use hearth_api::{ApiClient, User};
use miette::{IntoDiagnostic, Result};
use serde_json::Value;

/// Print a user's fields and the first `posts` entries of their timeline.
///
/// `who` is tried as a nick first, then as an id.
pub async fn user(api: &ApiClient, who: &str, posts: usize) -> Result<()> {
    let user = match User::by_nick(api, who).await.into_diagnostic()? {
        Some(user) => user,
        None => User::new(api, who),
    };

    if user.is_deleted().await.into_diagnostic()? {
        return Err(miette::miette!("no user named or numbered {:?}", who));
    }

    let fields = Value::Object(user.proxy().snapshot().await);
    println!("user {}", user.id());
    println!("{}", serde_json::to_string_pretty(&fields).into_diagnostic()?);

    if posts == 0 {
        return Ok(());
    }
    let mut timeline = user.timeline();
    let recent = timeline.take_n(posts).await.into_diagnostic()?;
    println!("\n{} recent post(s):", recent.len());
    for post in recent {
        let title = post
            .title()
            .await
            .into_diagnostic()?
            .unwrap_or_else(|| "(untitled)".to_string());
        let smiles = post.smile_count().await.into_diagnostic()?;
        println!("  {}  {}  [{} smiles]", post.id(), title, smiles);
    }
    Ok(())
}
