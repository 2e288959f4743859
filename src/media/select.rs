use super::{Attachment, MediaKind};
use crate::window::Window;

/// Most recent resolved attachments inside `window`, newest message first.
///
/// Attachments sharing a message keep their encounter order. Unresolved and
/// unsupported attachments never take one of the `max_count` slots.
pub fn select_media<'a>(
    attachments: &'a [Attachment],
    window: &Window<'_>,
    include_media: bool,
    max_count: usize,
) -> Vec<&'a Attachment> {
    if !include_media || max_count == 0 {
        return Vec::new();
    }

    let mut eligible: Vec<&Attachment> = attachments
        .iter()
        .filter(|a| window.contains_index(a.message_index))
        .filter(|a| a.is_resolved() && a.kind != MediaKind::Unsupported)
        .collect();

    // Stable, so same-message attachments stay in encounter order.
    eligible.sort_by(|a, b| b.message_index.cmp(&a.message_index));
    eligible.truncate(max_count);
    eligible
}
