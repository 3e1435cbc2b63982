//! Contextual model layer: local sequence labeling for names, orgs, places
//!
//! Wraps a lexicon-weighted sequence labeler. The weights (given names,
//! honorifics, organization suffixes, place gazetteer, context cues) ship
//! embedded and can be overridden by a weights file on disk. Native labels
//! (PER/ORG/LOC) map to canonical entity types. Initialization is lazy;
//! a load failure marks the layer unavailable for the process lifetime.

use crate::entity::{Entity, EntityType, Layer};
use crate::error::EngineError;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tracing::{debug, error, info};

const BUILTIN_WEIGHTS: &str = include_str!("data/model_weights.toml");

// Feature weights for the labeler. Tuned against the regression corpus.
const W_HONORIFIC: f64 = 0.55;
const W_GIVEN_NAME: f64 = 0.45;
const W_SURNAME_RUN: f64 = 0.30;
const W_ORG_SUFFIX: f64 = 0.65;
const W_ORG_KEYWORD: f64 = 0.55;
const W_GAZETTEER: f64 = 0.80;
const W_LOCATION_CUE: f64 = 0.15;
const SCORE_CAP: f64 = 0.95;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NativeLabel {
    Per,
    Org,
    Loc,
}

fn canonical(label: NativeLabel) -> EntityType {
    match label {
        NativeLabel::Per => EntityType::PersonName,
        NativeLabel::Org => EntityType::Organization,
        NativeLabel::Loc => EntityType::Location,
    }
}

#[derive(Debug, Deserialize)]
struct WeightsFile {
    lexicon: LexiconTables,
}

#[derive(Debug, Deserialize)]
struct LexiconTables {
    given_names: Vec<String>,
    honorifics: Vec<String>,
    org_suffixes: Vec<String>,
    org_keywords: Vec<String>,
    places: Vec<String>,
    location_cues: Vec<String>,
}

/// Loaded model state. Immutable after load and shared across all
/// concurrent calls without locking.
pub struct ModelWeights {
    given_names: HashSet<String>,
    honorifics: HashSet<String>,
    org_suffixes: HashSet<String>,
    org_keywords: HashSet<String>,
    places: HashSet<String>,
    location_cues: HashSet<String>,
}

impl ModelWeights {
    fn from_toml(contents: &str) -> Result<Self, EngineError> {
        let file: WeightsFile = toml::from_str(contents)
            .map_err(|e| EngineError::ModelLoad(e.to_string()))?;
        let fold = |terms: Vec<String>| -> HashSet<String> {
            terms.into_iter().map(|t| t.to_lowercase()).collect()
        };
        Ok(Self {
            given_names: fold(file.lexicon.given_names),
            honorifics: fold(file.lexicon.honorifics),
            org_suffixes: fold(file.lexicon.org_suffixes),
            org_keywords: fold(file.lexicon.org_keywords),
            places: fold(file.lexicon.places),
            location_cues: fold(file.lexicon.location_cues),
        })
    }
}

fn load_weights(path: Option<&Path>) -> Result<ModelWeights, EngineError> {
    match path {
        None => ModelWeights::from_toml(BUILTIN_WEIGHTS),
        Some(path) => {
            let contents = std::fs::read_to_string(path).map_err(|e| {
                EngineError::ModelLoad(format!("{}: {}", path.display(), e))
            })?;
            ModelWeights::from_toml(&contents)
        }
    }
}

pub struct ContextModelLayer {
    weights_path: Option<PathBuf>,
    state: OnceLock<Option<Arc<ModelWeights>>>,
}

impl ContextModelLayer {
    pub fn new(weights_path: Option<PathBuf>) -> Self {
        Self {
            weights_path,
            state: OnceLock::new(),
        }
    }

    /// One-time lazy initialization. A failed load is permanent for the
    /// process lifetime; there is no per-call retry.
    fn weights(&self) -> Option<&Arc<ModelWeights>> {
        self.state
            .get_or_init(|| match load_weights(self.weights_path.as_deref()) {
                Ok(w) => {
                    info!(
                        "context model loaded ({} given names, {} places)",
                        w.given_names.len(),
                        w.places.len()
                    );
                    Some(Arc::new(w))
                }
                Err(e) => {
                    error!("context model unavailable for the rest of the process: {e}");
                    None
                }
            })
            .as_ref()
    }

    /// Label spans in the text. Returns None when the model is
    /// unavailable; the pipeline proceeds on the remaining layers.
    pub fn detect(&self, text: &str, min_score: f64) -> Option<Vec<Entity>> {
        let weights = self.weights()?;

        let tokens = tokenize(text);
        let mut entities = Vec::new();
        let mut i = 0;

        while i < tokens.len() {
            let Some(run_len) = run_length(&tokens, i, text) else {
                i += 1;
                continue;
            };

            let run = &tokens[i..i + run_len];
            let prev = if i > 0 { Some(&tokens[i - 1]) } else { None };
            let sentence_initial = is_sentence_initial(&tokens, i, text);

            if let Some((label, score, skip_front)) =
                label_run(run, prev, sentence_initial, weights, min_score)
            {
                let span = &run[skip_front..];
                let start = span[0].start;
                let end = span[span.len() - 1].end;
                debug!(
                    "model labeled '{}' as {:?} ({:.2})",
                    &text[start..end],
                    label,
                    score
                );
                entities.push(Entity::new(
                    canonical(label),
                    start,
                    end,
                    &text[start..end],
                    score,
                    Layer::ContextModel,
                ));
            }

            i += run_len;
        }

        Some(entities)
    }

    pub fn is_available(&self) -> bool {
        self.weights().is_some()
    }
}

#[derive(Debug, Clone, Copy)]
struct Token<'a> {
    text: &'a str,
    start: usize,
    end: usize,
}

impl Token<'_> {
    fn folded(&self) -> String {
        let lower = self.text.to_lowercase();
        lower.strip_suffix("'s").map(str::to_string).unwrap_or(lower)
    }

    fn is_titlecase(&self) -> bool {
        let mut chars = self.text.chars();
        match chars.next() {
            Some(c) if c.is_uppercase() => chars.any(|c| c.is_lowercase()),
            _ => false,
        }
    }

    // Short all-caps tokens are acronym-shaped; they only matter inside
    // organization runs.
    fn is_acronym(&self) -> bool {
        self.text.len() >= 2
            && self.text.len() <= 5
            && self.text.chars().all(|c| c.is_uppercase())
    }
}

fn tokenize(text: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut start: Option<usize> = None;

    for (idx, c) in text.char_indices() {
        let word_char = c.is_alphabetic() || c == '\'';
        match (word_char, start) {
            (true, None) => start = Some(idx),
            (false, Some(s)) => {
                tokens.push(Token { text: &text[s..idx], start: s, end: idx });
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        tokens.push(Token { text: &text[s..], start: s, end: text.len() });
    }
    tokens
}

const CONNECTORS: &[&str] = &["of", "and", "the", "for"];

fn gap_is_plain(text: &str, prev_end: usize, next_start: usize) -> bool {
    text[prev_end..next_start]
        .chars()
        .all(|c| c == ' ' || c == '\t')
}

fn is_cap_token(token: &Token<'_>) -> bool {
    token.is_titlecase() || token.is_acronym()
}

/// Length of the capitalized run starting at `i`, allowing lowercase
/// connectors between capitalized tokens. None if no run starts here.
fn run_length(tokens: &[Token<'_>], i: usize, text: &str) -> Option<usize> {
    if !is_cap_token(&tokens[i]) {
        return None;
    }

    let mut len = 1;
    loop {
        let j = i + len;
        if j >= tokens.len() || !gap_is_plain(text, tokens[j - 1].end, tokens[j].start) {
            break;
        }
        if is_cap_token(&tokens[j]) {
            len += 1;
            continue;
        }
        // A connector joins only when a capitalized token follows it.
        if CONNECTORS.contains(&tokens[j].folded().as_str())
            && j + 1 < tokens.len()
            && gap_is_plain(text, tokens[j].end, tokens[j + 1].start)
            && is_cap_token(&tokens[j + 1])
        {
            len += 2;
            continue;
        }
        break;
    }
    Some(len)
}

fn is_sentence_initial(tokens: &[Token<'_>], i: usize, text: &str) -> bool {
    if i == 0 {
        return true;
    }
    text[tokens[i - 1].end..tokens[i].start]
        .chars()
        .any(|c| matches!(c, '.' | '!' | '?' | '\n'))
}

fn joined(run: &[Token<'_>]) -> String {
    run.iter()
        .map(|t| t.folded())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Score a run under each native label and pick the best. Returns the
/// label, its score, and how many leading tokens to drop from the span.
fn label_run(
    run: &[Token<'_>],
    prev: Option<&Token<'_>>,
    sentence_initial: bool,
    weights: &ModelWeights,
    min_score: f64,
) -> Option<(NativeLabel, f64, usize)> {
    // Full-run gazetteer match wins before any trimming ("The Hague").
    if weights.places.contains(&joined(run)) {
        let mut score = W_GAZETTEER;
        if let Some(p) = prev {
            if weights.location_cues.contains(&p.folded()) {
                score += W_LOCATION_CUE;
            }
        }
        return Some((NativeLabel::Loc, score.min(SCORE_CAP), 0));
    }

    // Leading article is sentence decoration, not part of the span.
    let mut skip = 0;
    if run.len() > 1 && matches!(run[0].folded().as_str(), "the" | "a" | "an") {
        skip = 1;
    }

    if let Some(hit) = score_run(&run[skip..], prev_for(run, prev, skip), weights, min_score) {
        return Some((hit.0, hit.1, skip));
    }

    // Sentence capitalization masks the real run start; drop the first
    // token once and rescore.
    if sentence_initial && run.len() - skip > 1 {
        let skip2 = skip + 1;
        if let Some(hit) = score_run(&run[skip2..], prev_for(run, prev, skip2), weights, min_score)
        {
            return Some((hit.0, hit.1, skip2));
        }
    }

    None
}

fn prev_for<'a, 'b>(
    run: &'b [Token<'a>],
    prev: Option<&'b Token<'a>>,
    skip: usize,
) -> Option<&'b Token<'a>> {
    if skip == 0 {
        prev
    } else {
        Some(&run[skip - 1])
    }
}

fn score_run(
    run: &[Token<'_>],
    prev: Option<&Token<'_>>,
    weights: &ModelWeights,
    min_score: f64,
) -> Option<(NativeLabel, f64)> {
    if run.is_empty() {
        return None;
    }

    let all_acronyms = run.iter().all(|t| t.is_acronym());

    let mut per = 0.0;
    if let Some(p) = prev {
        if weights.honorifics.contains(&p.folded()) {
            per += W_HONORIFIC;
        }
    }
    if weights.given_names.contains(&run[0].folded()) {
        per += W_GIVEN_NAME;
    }
    if per > 0.0 && run.len() >= 2 {
        per += W_SURNAME_RUN;
    }

    let mut org = 0.0;
    if weights
        .org_suffixes
        .contains(&run[run.len() - 1].folded())
    {
        org += W_ORG_SUFFIX;
    }
    if run.iter().any(|t| weights.org_keywords.contains(&t.folded())) {
        org += W_ORG_KEYWORD;
    }

    let mut loc = 0.0;
    if weights.places.contains(&joined(run)) {
        loc += W_GAZETTEER;
    }
    if loc > 0.0 {
        if let Some(p) = prev {
            if weights.location_cues.contains(&p.folded()) {
                loc += W_LOCATION_CUE;
            }
        }
    }

    // Bare acronym runs need organization evidence to survive.
    if all_acronyms && org == 0.0 {
        return None;
    }

    let (label, score) = if org >= loc && org >= per {
        (NativeLabel::Org, org)
    } else if loc >= per {
        (NativeLabel::Loc, loc)
    } else {
        (NativeLabel::Per, per)
    };

    let score = score.min(SCORE_CAP);
    if score >= min_score {
        Some((label, score))
    } else {
        None
    }
}
