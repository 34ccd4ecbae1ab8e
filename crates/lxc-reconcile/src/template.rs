use tracing::debug;

use crate::types::NodeHandle;
use crate::{ClusterApi, Error, Result};

/// Content type tag of container templates in storage listings.
const TEMPLATE_CONTENT: &str = "vztmpl";

/// Every template volume on `node`, across all of its storage backends.
pub async fn list_available_templates(
    api: &dyn ClusterApi,
    node: &NodeHandle,
) -> Result<Vec<String>> {
    let mut templates = Vec::new();

    for storage in api.list_storage(node).await? {
        let content = match api.list_storage_content(node, &storage).await {
            Ok(content) => content,
            Err(Error::NotFound(what)) => {
                debug!(node = %node, storage = %storage, "skipping storage: {what} not found");
                continue;
            }
            Err(e) => return Err(e),
        };

        templates.extend(
            content
                .into_iter()
                .filter(|entry| entry.content == TEMPLATE_CONTENT && !entry.volid.is_empty())
                .map(|entry| entry.volid),
        );
    }

    debug!(node = %node, count = templates.len(), "templates listed");
    Ok(templates)
}

/// Match a free-text hint against template identifiers.
///
/// The hint is lowercased and split on whitespace; every word must occur in
/// the candidate identifier as written. Among matches the lexicographically
/// greatest identifier is returned. A blank hint matches nothing.
pub fn resolve<'a>(hint: &str, candidates: &'a [String]) -> Option<&'a str> {
    let words: Vec<String> = hint.split_whitespace().map(str::to_lowercase).collect();
    if words.is_empty() {
        return None;
    }

    candidates
        .iter()
        .filter(|candidate| words.iter().all(|word| candidate.contains(word.as_str())))
        .max()
        .map(String::as_str)
}
