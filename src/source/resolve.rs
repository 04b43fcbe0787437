use std::collections::BTreeSet;

use thiserror::Error;
use tracing::{debug, info};

use super::{BrowseItem, SourceClient, SourceError};

/// Errors from tag resolution. Both variants are fatal at startup.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// Neither the whitelist nor discovery produced any tags.
    #[error("no tags resolved under {root:?}; check the whitelist or browse root")]
    NoTagsFound { root: String },

    /// Browsing the namespace failed.
    #[error(transparent)]
    Source(#[from] SourceError),
}

/// Produces the ordered set of tag identifiers to poll.
///
/// A non-empty whitelist is returned verbatim, order preserved, without
/// touching the server. Otherwise the namespace under `root` is browsed
/// recursively: a child without deeper entries is polled directly, a child
/// with deeper entries contributes those instead. Discovery output is
/// restricted to identifiers under `root`, deduplicated and sorted.
pub async fn resolve<C: SourceClient>(
    whitelist: &[String],
    root: &str,
    client: &C,
) -> Result<Vec<String>, ResolveError> {
    if !whitelist.is_empty() {
        info!(count = whitelist.len(), "using whitelist tags");
        return Ok(whitelist.to_vec());
    }

    let children = identifiers(client.list(&format!("{root}.*")).await?);
    debug!(root, count = children.len(), "browsed namespace children");

    let mut found = Vec::new();

    for child in children {
        let mut entries = identifiers(client.list(&format!("{child}.*")).await?);
        if entries.is_empty() {
            // Some servers only answer a two-level pattern below a device.
            entries = identifiers(client.list(&format!("{child}.*.*")).await?);
        }

        if entries.is_empty() {
            found.push(child);
            continue;
        }

        for entry in entries {
            let deeper = identifiers(client.list(&format!("{entry}.*")).await?);
            if deeper.is_empty() {
                found.push(entry);
            } else {
                found.extend(deeper);
            }
        }
    }

    let prefix = format!("{root}.");
    let tags: BTreeSet<String> = found
        .into_iter()
        .filter(|tag| tag.starts_with(&prefix))
        .collect();

    if tags.is_empty() {
        return Err(ResolveError::NoTagsFound {
            root: root.to_string(),
        });
    }

    info!(root, count = tags.len(), "discovered tags");

    Ok(tags.into_iter().collect())
}

/// Flattens browse results to bare identifiers, dropping malformed records.
fn identifiers(items: Vec<BrowseItem>) -> Vec<String> {
    items
        .iter()
        .filter_map(|item| item.identifier().map(str::to_string))
        .collect()
}
