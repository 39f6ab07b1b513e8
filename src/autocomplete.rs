//! Builds the capped, truncated choice list backing slash-command
//! autocomplete.

use serde::Serialize;

use crate::model::Track;

/// Discord caps autocomplete at 25 entries; we show far fewer.
pub const MAX_CHOICES: usize = 5;
const MAX_NAME_CHARS: usize = 100;

/// One autocomplete entry: a display label plus the value submitted back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AutocompleteChoice {
    pub name: String,
    pub value: String,
}

/// Maps candidate tracks to at most [`MAX_CHOICES`] choices. The label is
/// "<title> — <artist>" truncated to 100 characters; the value is the track
/// URL, or the truncated label when the catalog gave no URL.
pub fn choices(tracks: &[Track]) -> Vec<AutocompleteChoice> {
    tracks
        .iter()
        .take(MAX_CHOICES)
        .map(|track| {
            let name = truncate(&format!("{} — {}", track.title, track.author));
            let value = if track.url.is_empty() {
                name.clone()
            } else {
                truncate(&track.url)
            };
            AutocompleteChoice { name, value }
        })
        .collect()
}

fn truncate(input: &str) -> String {
    if input.chars().count() <= MAX_NAME_CHARS {
        return input.to_string();
    }
    let mut out: String = input.chars().take(MAX_NAME_CHARS - 1).collect();
    out.push('…');
    out
}
