//! Resolve attachment references to extracted archive members.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Serialize;
use tracing::{debug, warn};

use super::MediaKind;
use crate::archive::ArchiveMember;
use crate::error::ParseWarning;
use crate::transcript::Message;

/// One referenced media file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attachment {
    pub filename: String,
    pub kind: MediaKind,
    /// Index of the owning message in the full sequence
    pub message_index: usize,
    /// Absent when the file is missing from the archive
    pub resolved_path: Option<PathBuf>,
}

impl Attachment {
    pub fn is_resolved(&self) -> bool {
        self.resolved_path.is_some()
    }
}

/// Lookup tables over the archive members, built once per run.
struct MemberIndex<'a> {
    exact: HashMap<&'a str, &'a ArchiveMember>,
    folded: HashMap<String, &'a ArchiveMember>,
    /// Lowercased names, kept sorted for deterministic suffix matches
    sorted: Vec<(String, &'a ArchiveMember)>,
}

impl<'a> MemberIndex<'a> {
    fn new(members: &'a [ArchiveMember]) -> Self {
        let mut exact = HashMap::new();
        let mut folded = HashMap::new();
        let mut sorted: Vec<(String, &ArchiveMember)> = Vec::with_capacity(members.len());

        for member in members {
            for key in [member.name.as_str(), member.file_name()] {
                exact.entry(key).or_insert(member);
                folded.entry(key.to_lowercase()).or_insert(member);
            }
            sorted.push((member.name.to_lowercase(), member));
        }
        sorted.sort_by(|a, b| a.1.name.cmp(&b.1.name));

        Self {
            exact,
            folded,
            sorted,
        }
    }

    /// Exact name, then case-insensitive, then suffix.
    fn find(&self, reference: &str) -> Option<&'a ArchiveMember> {
        if let Some(member) = self.exact.get(reference).copied() {
            return Some(member);
        }
        let lowered = reference.to_lowercase();
        if let Some(member) = self.folded.get(&lowered).copied() {
            return Some(member);
        }
        self.sorted
            .iter()
            .find(|(name, _)| name.ends_with(&lowered))
            .map(|(_, member)| *member)
    }
}

/// One [`Attachment`] per reference, in message order then reference order.
pub fn correlate(
    messages: &[Message],
    members: &[ArchiveMember],
) -> (Vec<Attachment>, Vec<ParseWarning>) {
    let index = MemberIndex::new(members);
    let mut attachments = Vec::new();
    let mut warnings = Vec::new();

    for (message_index, message) in messages.iter().enumerate() {
        for reference in &message.attachment_refs {
            let resolved = index.find(reference);
            if resolved.is_none() {
                let warning = ParseWarning::UnresolvedAttachment {
                    filename: reference.clone(),
                };
                warn!("{}", warning);
                warnings.push(warning);
            }

            attachments.push(Attachment {
                filename: reference.clone(),
                kind: MediaKind::from_filename(reference),
                message_index,
                resolved_path: resolved.map(|member| member.path.clone()),
            });
        }
    }

    debug!(
        "Correlated {} attachment references ({} unresolved)",
        attachments.len(),
        warnings.len()
    );

    (attachments, warnings)
}
