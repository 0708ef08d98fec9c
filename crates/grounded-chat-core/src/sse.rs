//! Server-Sent Events framing for streamed answers.
//!
//! An answer is delivered as an ordered sequence of
//! `chat.completion.chunk` events:
//!
//! ```text
//! data: {"id":..,"choices":[{"delta":{"role":"assistant","content":""},..}]}   initial
//! data: {"id":..,"choices":[{"delta":{"content":"<piece>"},..}]}               one per piece
//! data: {"id":..,"choices":[{"delta":{"cited_urls":[..],"is_rag":true},"finish_reason":"stop"}]}
//! data: [DONE]
//! ```
//!
//! Concatenating every content event's `delta.content` in order reconstructs
//! the answer exactly.

use serde::Serialize;

use crate::chat::ChatAnswer;

pub const MIN_CHUNK_SIZE: usize = 20;
pub const MAX_CHUNK_SIZE: usize = 50;
pub const DEFAULT_CHUNK_SIZE: usize = 32;

/// Terminal payload of every stream.
pub const DONE_MARKER: &str = "[DONE]";

const CHUNK_OBJECT: &str = "chat.completion.chunk";

/// Split `text` into pieces of `chunk_size` code points (the last may be
/// shorter). `chunk_size` is clamped into `[MIN_CHUNK_SIZE, MAX_CHUNK_SIZE]`.
pub fn split_into_chunks(text: &str, chunk_size: usize) -> Vec<String> {
    split_with_bounds(text, chunk_size, MIN_CHUNK_SIZE, MAX_CHUNK_SIZE)
}

/// [`split_into_chunks`] with caller-supplied clamp bounds.
pub fn split_with_bounds(text: &str, chunk_size: usize, min: usize, max: usize) -> Vec<String> {
    let size = chunk_size.clamp(min.max(1), max.max(min).max(1));
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(size)
        .map(|piece| piece.iter().collect())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionChunk {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: Delta,
    pub finish_reason: Option<&'static str>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Delta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cited_urls: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_rag: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Chunk(CompletionChunk),
    Done,
}

impl StreamEvent {
    /// The event payload: chunk JSON, or the literal `[DONE]`.
    pub fn data(&self) -> String {
        match self {
            // CompletionChunk holds only strings, numbers and options.
            Self::Chunk(chunk) => serde_json::to_string(chunk).unwrap_or_default(),
            Self::Done => DONE_MARKER.to_string(),
        }
    }

    /// `data: <payload>\n\n`
    pub fn to_frame(&self) -> String {
        format!("data: {}\n\n", self.data())
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}

/// Build the full event sequence for `answer`.
///
/// `created` is the Unix timestamp (seconds) shared by every event.
pub fn completion_events(answer: &ChatAnswer, created: i64, chunk_size: usize) -> Vec<StreamEvent> {
    events_from_pieces(answer, created, split_into_chunks(&answer.answer, chunk_size))
}

/// Same as [`completion_events`], for answers already split into pieces.
pub fn events_from_pieces(answer: &ChatAnswer, created: i64, pieces: Vec<String>) -> Vec<StreamEvent> {
    let chunk = |delta: Delta, finish_reason: Option<&'static str>| {
        StreamEvent::Chunk(CompletionChunk {
            id: answer.id.clone(),
            object: CHUNK_OBJECT,
            created,
            model: answer.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason,
            }],
        })
    };

    let mut events = Vec::with_capacity(pieces.len() + 3);
    events.push(chunk(
        Delta {
            role: Some("assistant"),
            content: Some(String::new()),
            ..Delta::default()
        },
        None,
    ));
    for piece in pieces {
        events.push(chunk(
            Delta {
                content: Some(piece),
                ..Delta::default()
            },
            None,
        ));
    }
    events.push(chunk(
        Delta {
            cited_urls: (!answer.cited_urls.is_empty()).then(|| answer.cited_urls.clone()),
            is_rag: Some(answer.grounded),
            ..Delta::default()
        },
        Some("stop"),
    ));
    events.push(StreamEvent::Done);
    events
}
