//! Origin markers that keep propagated updates from bouncing back.
//!
//! The legacy phrases are already stored on live tickets, so they are matched
//! byte-for-byte in every mode. `Tagged` mode additionally stamps an explicit
//! origin token that does not depend on the attribution wording.

use serde::{Deserialize, Serialize};

use crate::model::DeskConversation;

/// Prefix of every desk note created from a tracker comment.
pub const TRACKER_COMMENT_MARKER: &str = "<i>Comentário de";
/// Prefix of every desk note that carries a tracker attachment.
pub const TRACKER_ATTACHMENT_MARKER: &str = "[Anexo Sincronizado do Jira]";
/// Suffix of the attribution line on every tracker comment created from desk.
pub const DESK_COMMENT_MARKER: &str = "no Freshdesk:_";

pub const TRACKER_ORIGIN_TOKEN: &str = "[deskbridge:origin=tracker]";
pub const DESK_ORIGIN_TOKEN: &str = "[deskbridge:origin=desk]";

pub const UNKNOWN_DESK_USER: &str = "Usuário Desconhecido";
/// Attribution used when a tracker comment has no readable author.
pub const UNKNOWN_TRACKER_USER: &str = "Usuário Desconhecido";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopGuardMode {
    #[default]
    Legacy,
    Tagged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeskEntryKind {
    PrivateNote,
    PublicReply,
}

impl DeskEntryKind {
    pub fn from_private_flag(private: bool) -> Self {
        if private {
            Self::PrivateNote
        } else {
            Self::PublicReply
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::PrivateNote => "Nota Privada",
            Self::PublicReply => "Resposta Pública",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopGuard {
    mode: LoopGuardMode,
}

impl LoopGuard {
    pub fn new(mode: LoopGuardMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> LoopGuardMode {
        self.mode
    }

    pub fn desk_note_for_tracker_comment(&self, author: &str, body: &str) -> String {
        let mut note = format!(
            "{TRACKER_COMMENT_MARKER} <b>{}</b> no Jira:</i><br><hr>{}",
            escape_html(author),
            escape_html(body)
        );
        if self.mode == LoopGuardMode::Tagged {
            note.push_str("<br><small>");
            note.push_str(TRACKER_ORIGIN_TOKEN);
            note.push_str("</small>");
        }
        note
    }

    pub fn desk_attachment_note(&self, file_name: &str) -> String {
        let mut note = format!("{TRACKER_ATTACHMENT_MARKER} {}", escape_html(file_name));
        if self.mode == LoopGuardMode::Tagged {
            note.push(' ');
            note.push_str(TRACKER_ORIGIN_TOKEN);
        }
        note
    }

    pub fn tracker_comment_for_desk_entry(
        &self,
        kind: DeskEntryKind,
        author: &str,
        body: &str,
    ) -> String {
        let mut comment = format!(
            "_{} de **{author}** {DESK_COMMENT_MARKER}\n\n{body}",
            kind.label()
        );
        if self.mode == LoopGuardMode::Tagged {
            comment.push_str("\n\n");
            comment.push_str(DESK_ORIGIN_TOKEN);
        }
        comment
    }

    /// True when a tracker comment was itself created from a desk entry.
    pub fn is_desk_origin(&self, tracker_comment_body: &str) -> bool {
        tracker_comment_body.contains(DESK_COMMENT_MARKER)
            || tracker_comment_body.contains(DESK_ORIGIN_TOKEN)
    }

    /// True when a desk conversation entry was itself created from the tracker.
    pub fn is_tracker_origin(&self, conversation: &DeskConversation) -> bool {
        [conversation.body_html.as_str(), conversation.body_text.as_str()]
            .iter()
            .any(|body| {
                body.contains(TRACKER_COMMENT_MARKER)
                    || body.contains(TRACKER_ATTACHMENT_MARKER)
                    || body.contains(TRACKER_ORIGIN_TOKEN)
            })
    }
}

fn escape_html(raw: &str) -> String {
    html_escape::encode_text(raw).into_owned()
}
