// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Synthetic execution plans.
//!
//! The backend protocol carries no plan events, so the bridge synthesizes a
//! coarse plan for prompts that look like multi-step work and advances it as
//! tool calls complete.  Plans are advisory; the host renders them as a
//! progress hint.

use ferry_protocol::{PlanEntry, PlanEntryStatus, PlanPriority};

/// Words that mark a prompt as build/change work rather than a question.
const ACTION_WORDS: &[&str] = &[
    "implement",
    "create",
    "build",
    "refactor",
    "restructure",
    "migrate",
    "optimize",
];

/// Words that suggest the prompt spells out an ordered procedure.
const STEP_WORDS: &[&str] = &[
    "first", "then", "next", "after", "finally", "step", "phase",
];

/// Decide whether a prompt warrants a synthetic plan at all.
fn is_complex(prompt: &str) -> bool {
    let lower = prompt.to_ascii_lowercase();
    prompt.len() > 200
        || ACTION_WORDS.iter().any(|w| contains_word(&lower, w))
        || STEP_WORDS.iter().any(|w| contains_word(&lower, w))
}

/// Rough step-count estimate: one per step word occurrence, one per action
/// word, plus one per sentence that starts an imperative clause.
fn estimated_steps(prompt: &str) -> usize {
    let lower = prompt.to_ascii_lowercase();
    let step_hits = STEP_WORDS
        .iter()
        .map(|w| count_word(&lower, w))
        .sum::<usize>();
    let action_hits = ACTION_WORDS
        .iter()
        .map(|w| count_word(&lower, w))
        .sum::<usize>();
    step_hits + action_hits
}

fn contains_word(haystack: &str, word: &str) -> bool {
    count_word(haystack, word) > 0
}

fn count_word(haystack: &str, word: &str) -> usize {
    haystack
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| *w == word)
        .count()
}

/// First line of the prompt, shortened for a single-entry plan title.
fn summarize(prompt: &str) -> String {
    let first_line = prompt.lines().next().unwrap_or(prompt).trim();
    let mut summary: String = first_line.chars().take(60).collect();
    if first_line.chars().count() > 60 {
        summary.push('…');
    }
    summary
}

/// Synthesize the initial plan for a prompt, or `None` for simple prompts.
pub fn synthesize(prompt: &str) -> Option<Vec<PlanEntry>> {
    if !is_complex(prompt) {
        return None;
    }
    if estimated_steps(prompt) >= 3 {
        Some(vec![
            PlanEntry::new(
                "Analyze requirements",
                PlanPriority::High,
                PlanEntryStatus::InProgress,
            ),
            PlanEntry::new(
                "Execute main implementation",
                PlanPriority::High,
                PlanEntryStatus::Pending,
            ),
            PlanEntry::new(
                "Validate and finalize changes",
                PlanPriority::Medium,
                PlanEntryStatus::Pending,
            ),
        ])
    } else {
        Some(vec![PlanEntry::new(
            summarize(prompt),
            PlanPriority::High,
            PlanEntryStatus::InProgress,
        )])
    }
}

/// Tracks the current plan through a turn and whether an update still needs
/// flushing to the host (flushes are debounced by the executor).
#[derive(Debug, Default)]
pub struct PlanTracker {
    entries: Vec<PlanEntry>,
    dirty: bool,
}

impl PlanTracker {
    pub fn from_prompt(prompt: &str) -> Self {
        match synthesize(prompt) {
            Some(entries) => Self {
                entries,
                dirty: true,
            },
            None => Self::default(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[PlanEntry] {
        &self.entries
    }

    /// A flush is pending.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Snapshot the entries for sending and clear the dirty flag.
    pub fn take_snapshot(&mut self) -> Vec<PlanEntry> {
        self.dirty = false;
        self.entries.clone()
    }

    /// Advance the plan after a completed tool call: the first `in_progress`
    /// entry becomes `completed` and the next `pending` entry is promoted.
    /// Keeps at most one entry in progress at any time.
    pub fn advance(&mut self) {
        let Some(current) = self
            .entries
            .iter()
            .position(|e| e.status == PlanEntryStatus::InProgress)
        else {
            return;
        };
        self.entries[current].status = PlanEntryStatus::Completed;
        if let Some(next) = self
            .entries
            .iter()
            .position(|e| e.status == PlanEntryStatus::Pending)
        {
            self.entries[next].status = PlanEntryStatus::InProgress;
        }
        self.dirty = true;
    }

    /// Replace the whole plan (kept for backends that someday report one).
    pub fn replace(&mut self, entries: Vec<PlanEntry>) {
        self.entries = entries;
        self.dirty = true;
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── Complexity detection ──────────────────────────────────────────────────

    #[test]
    fn short_questions_get_no_plan() {
        assert!(synthesize("what does this function do?").is_none());
        assert!(synthesize("hi").is_none());
    }

    #[test]
    fn action_words_trigger_a_plan() {
        assert!(synthesize("implement a parser for the config format").is_some());
        assert!(synthesize("refactor the session module").is_some());
    }

    #[test]
    fn long_prompts_trigger_a_plan() {
        let long = "a ".repeat(150);
        assert!(synthesize(&long).is_some());
    }

    #[test]
    fn word_matching_does_not_fire_inside_larger_words() {
        // "thereafter" contains "after" but is not a step word occurrence.
        assert!(synthesize("thereafter it works").is_none());
    }

    #[test]
    fn multi_step_prompt_gets_three_entries() {
        let plan = synthesize(
            "First implement the parser, then create the writer, finally build the CLI",
        )
        .unwrap();
        assert_eq!(plan.len(), 3);
        assert_eq!(plan[0].status, PlanEntryStatus::InProgress);
        assert_eq!(plan[1].status, PlanEntryStatus::Pending);
        assert_eq!(plan[2].status, PlanEntryStatus::Pending);
    }

    #[test]
    fn single_signal_prompt_gets_one_summarized_entry() {
        let plan = synthesize("implement the widget").unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].content, "implement the widget");
        assert_eq!(plan[0].status, PlanEntryStatus::InProgress);
    }

    #[test]
    fn summary_truncates_long_first_lines() {
        let prompt = format!("implement {}", "y".repeat(100));
        let plan = synthesize(&prompt).unwrap();
        assert!(plan[0].content.ends_with('…'));
        assert!(plan[0].content.chars().count() <= 61);
    }

    // ── Advancement ───────────────────────────────────────────────────────────

    fn three_step_tracker() -> PlanTracker {
        PlanTracker::from_prompt(
            "First implement this, then create that, finally build the rest",
        )
    }

    #[test]
    fn advance_completes_current_and_promotes_next() {
        let mut tracker = three_step_tracker();
        tracker.advance();
        let entries = tracker.entries();
        assert_eq!(entries[0].status, PlanEntryStatus::Completed);
        assert_eq!(entries[1].status, PlanEntryStatus::InProgress);
        assert_eq!(entries[2].status, PlanEntryStatus::Pending);
    }

    #[test]
    fn at_most_one_entry_in_progress_at_every_point() {
        let mut tracker = three_step_tracker();
        for _ in 0..5 {
            let in_progress = tracker
                .entries()
                .iter()
                .filter(|e| e.status == PlanEntryStatus::InProgress)
                .count();
            assert!(in_progress <= 1);
            tracker.advance();
        }
    }

    #[test]
    fn completed_prefix_grows_monotonically() {
        let mut tracker = three_step_tracker();
        let mut last_completed = 0;
        for _ in 0..5 {
            tracker.advance();
            let completed = tracker
                .entries()
                .iter()
                .take_while(|e| e.status == PlanEntryStatus::Completed)
                .count();
            assert!(completed >= last_completed);
            last_completed = completed;
        }
        assert_eq!(last_completed, 3);
    }

    #[test]
    fn advance_past_the_end_is_a_no_op() {
        let mut tracker = three_step_tracker();
        for _ in 0..3 {
            tracker.advance();
        }
        let snapshot = tracker.entries().to_vec();
        tracker.advance();
        assert_eq!(tracker.entries(), snapshot.as_slice());
    }

    // ── Dirty tracking ────────────────────────────────────────────────────────

    #[test]
    fn synthesis_marks_dirty_and_snapshot_clears_it() {
        let mut tracker = three_step_tracker();
        assert!(tracker.is_dirty());
        let snapshot = tracker.take_snapshot();
        assert_eq!(snapshot.len(), 3);
        assert!(!tracker.is_dirty());
        tracker.advance();
        assert!(tracker.is_dirty());
    }

    #[test]
    fn simple_prompt_tracker_is_empty_and_clean() {
        let tracker = PlanTracker::from_prompt("what time is it?");
        assert!(tracker.is_empty());
        assert!(!tracker.is_dirty());
    }
}
