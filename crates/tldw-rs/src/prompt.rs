//! Instructions sent with map and reduce calls.

use crate::chunker::Chunk;
use crate::summarizer::{PromptKind, SummaryPrompt};

/// Instruction for summarizing one excerpt (the map phase).
const MAP_INSTRUCTION: &str = "\
Summarize the following excerpt of a transcript as study notes in markdown.

Structure:
- A `#` heading with a descriptive title (not two or three words).
- Two or three sentences giving an overview of the excerpt.
- Bullet points detailing each key point, with the relevant specifics.

Rules:
- Only include what the excerpt actually says. Do not speculate.
- Do not repeat yourself.
- When a line starts with a `[HH:MM:SS]` timestamp, cite it where the point is made.";

/// Extra rule appended when the video id is known.
const MAP_LINK_RULE: &str =
    "- Render cited timestamps as links: [HH:MM:SS](https://youtu.be/{video_id}?t={seconds}s).";

/// Instruction for combining chunk summaries (the reduce phase).
const REDUCE_INSTRUCTION: &str = "\
Combine the following partial summaries into one coherent summary in markdown.

The partial summaries cover consecutive excerpts of the same transcript, in order.
Merge overlapping points, keep the original order of topics, preserve timestamp
links, and drop repetition. The result must read as a single standalone summary.
If a section is marked as missing, say briefly that part of the source could not
be summarized rather than guessing at its content.";

/// Separator placed between chunk summaries in the reduce input.
pub const SUMMARY_SEPARATOR: &str = "\n\n---\n\n";

/// Build the map prompt for one chunk.
pub fn map_prompt(chunk: &Chunk, total: usize, video_id: Option<&str>) -> SummaryPrompt {
    let instruction = match video_id {
        Some(id) => format!(
            "{MAP_INSTRUCTION}\n{}",
            MAP_LINK_RULE.replace("{video_id}", id)
        ),
        None => MAP_INSTRUCTION.to_string(),
    };
    SummaryPrompt {
        kind: PromptKind::Map,
        instruction,
        content: format!(
            "Excerpt {} of {total}:\n\n{}",
            chunk.index + 1,
            chunk.text.trim()
        ),
    }
}

/// Placeholder standing in for a chunk whose summary failed.
pub fn missing_section_note(index: usize) -> String {
    format!("[Section {} is missing: this excerpt could not be summarized.]", index + 1)
}

/// Build the reduce prompt over already-ordered, already-joined summaries.
pub fn reduce_prompt(combined: String) -> SummaryPrompt {
    SummaryPrompt {
        kind: PromptKind::Reduce,
        instruction: REDUCE_INSTRUCTION.to_string(),
        content: combined,
    }
}
