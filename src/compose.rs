//! Rendering of a note into the inline answer title and HTML body.

use chrono::DateTime;
use handlebars::{Handlebars, RenderError, TemplateError};
use serde::Serialize;
use thiserror::Error;
use url::Url;

use crate::{
    engagement::EngagementMetrics,
    event::Event,
    metadata::ProfileMetadata,
    nip19::{self, Nip19Error},
};

/// Maximum characters of note content shown in the body.
pub const BODY_LIMIT: usize = 240;
/// Maximum characters of the result title.
pub const TITLE_LIMIT: usize = 150;
const ELLIPSIS: &str = "...";
const DATE_FORMAT: &str = "%-I:%M %p · %b %-d, %Y";

/// Telegram HTML layout of a rendered note. Values are HTML-escaped.
const NOTE_TEMPLATE: &str = r#"<b>{{display_name}}{{#if nip05}} ({{nip05}}){{/if}}</b>
<code>
{{text}}
</code>
{{replies}} Replies {{reposts}} Reposts {{likes}} Likes {{zaps}} Zaps
<a href="{{link}}">{{link_label}}</a>		{{created_at}}
"#;

#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("cannot encode note reference: {0}")]
    Reference(#[from] Nip19Error),
    #[error("invalid link base: {0}")]
    LinkBase(#[from] url::ParseError),
    #[error("invalid template: {0}")]
    Template(#[from] Box<TemplateError>),
    #[error("template rendering failed: {0}")]
    Render(#[from] RenderError),
    #[error("timestamp {0} is out of range")]
    Timestamp(u64),
}

/// Final answer handed to the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedAnswer {
    /// Event id, reused as the inline result id.
    pub id: String,
    pub title: String,
    pub body: String,
}

#[derive(Serialize)]
struct NoteView<'a> {
    display_name: &'a str,
    nip05: &'a str,
    text: &'a str,
    created_at: String,
    link: String,
    link_label: &'a str,
    replies: u64,
    reposts: u64,
    likes: u64,
    zaps: u64,
}

/// Turns a note, its author profile and engagement counts into an answer.
pub struct Composer {
    registry: Handlebars<'static>,
    link_base: String,
    link_label: String,
}

impl Composer {
    /// `link_base` is the web client URL that `note1…` ids are appended to.
    pub fn new(link_base: &str) -> Result<Self, ComposeError> {
        Self::with_template(link_base, NOTE_TEMPLATE)
    }

    fn with_template(link_base: &str, template: &str) -> Result<Self, ComposeError> {
        let url = Url::parse(link_base)?;
        let link_label = match url.host_str() {
            Some(host) => format!("Open on {host}"),
            None => "Open note".to_string(),
        };
        let mut link_base = url.to_string();
        if !link_base.ends_with('/') {
            link_base.push('/');
        }
        let mut registry = Handlebars::new();
        registry.set_strict_mode(true);
        registry
            .register_template_string("note", template)
            .map_err(Box::new)?;
        Ok(Self {
            registry,
            link_base,
            link_label,
        })
    }

    /// Build the title and body for `note`.
    ///
    /// Any failure fails the whole composition; no partial answer is produced.
    pub fn compose(
        &self,
        note: &Event,
        metadata: &ProfileMetadata,
        metrics: &EngagementMetrics,
    ) -> Result<RenderedAnswer, ComposeError> {
        let display_name = metadata.shown_name();
        let text = truncate(&note.content, BODY_LIMIT);
        let created_at = i64::try_from(note.created_at)
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .ok_or(ComposeError::Timestamp(note.created_at))?
            .format(DATE_FORMAT)
            .to_string();
        let view = NoteView {
            display_name,
            nip05: &metadata.nip05,
            text: &text,
            created_at,
            link: format!("{}{}", self.link_base, nip19::encode_note(&note.id)?),
            link_label: &self.link_label,
            replies: metrics.replies,
            reposts: metrics.reposts,
            likes: metrics.positive_reactions,
            // msat to sat, truncating
            zaps: metrics.zap_msat / 1000,
        };
        let body = self.registry.render("note", &view)?;
        let title = truncate(&format!("{display_name}: {text}"), TITLE_LIMIT);
        Ok(RenderedAnswer {
            id: note.id.clone(),
            title,
            body,
        })
    }
}

/// Cut `s` to at most `budget` characters, marking the cut with `...`.
pub fn truncate(s: &str, budget: usize) -> String {
    match s.char_indices().nth(budget) {
        Some((cut, _)) => format!("{}{ELLIPSIS}", &s[..cut]),
        None => s.to_string(),
    }
}
