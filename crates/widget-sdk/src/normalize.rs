//! History normalization for display.
//!
//! Stored history keeps bot templates as raw JSON and user clicks as the
//! clicked button's payload id.  [`normalize`] turns that into readable
//! turns:
//!
//! - the conversation starter is dropped;
//! - a button template yields its text as an extra bot turn, followed by
//!   the raw template turn (both are kept);
//! - a quick-reply template is replaced by its text;
//! - a generic template is kept raw;
//! - a user turn equal to a payload id offered by the most recent template
//!   is rewritten to that button's title.

use std::collections::HashMap;

use cw_domain::template::{self, Template, TemplateButton};
use cw_domain::turn::{ConversationTurn, MadeBy};
use cw_domain::CONVERSATION_STARTER;

/// payload id → button title, for the most recent template only.
#[derive(Debug, Default)]
struct TitleCache(HashMap<String, String>);

impl TitleCache {
    fn fill<'a>(&mut self, buttons: impl IntoIterator<Item = &'a TemplateButton>) {
        for button in buttons {
            match (&button.payload, &button.title) {
                (Some(payload), Some(title)) if !payload.is_empty() && !title.is_empty() => {
                    self.0.insert(payload.clone(), title.clone());
                }
                _ => {}
            }
        }
    }

    fn title_for(&self, payload: &str) -> Option<&str> {
        self.0.get(payload).map(String::as_str)
    }
}

/// Normalize a raw history for display.
pub fn normalize(raw: &[ConversationTurn]) -> Vec<ConversationTurn> {
    let mut out = Vec::with_capacity(raw.len());
    let mut cache = TitleCache::default();

    for turn in raw {
        if turn.content == CONVERSATION_STARTER {
            continue;
        }

        let mut content = turn.content.clone();

        match template::decode(&turn.content) {
            Some(decoded) => {
                cache = TitleCache::default();
                match decoded {
                    Template::Button(payload) => {
                        out.push(ConversationTurn::bot(payload.text.clone()));
                        cache.fill(&payload.buttons);
                    }
                    Template::QuickReply {
                        text,
                        quick_replies,
                    } => {
                        cache.fill(&quick_replies);
                        content = text;
                    }
                    Template::Generic(payload) => {
                        cache.fill(
                            payload
                                .elements
                                .iter()
                                .filter_map(|e| e.buttons.as_ref())
                                .flatten(),
                        );
                    }
                    Template::Unrecognized => {}
                }
            }
            None => {
                if turn.made_by == MadeBy::User {
                    if let Some(title) = cache.title_for(&turn.content) {
                        content = title.to_owned();
                    }
                }
            }
        }

        out.push(ConversationTurn {
            content,
            made_by: turn.made_by,
            debug: turn.debug.clone(),
        });
    }

    out
}
