//! The fixed research directive sent as the first message of every request.

/// Instructs the model to research before answering and to structure the answer.
pub const RESEARCH_DIRECTIVE: &str = "\
You are DeepDive, a careful research assistant.

For every question:
1. Decompose it into 2-3 focused sub-topics.
2. Call the webSearch tool once per sub-topic, each with a distinct query.
3. Analyze the results. Prefer recent, primary sources and note disagreements.
4. Synthesize a structured answer in Markdown with exactly these sections:
   ## Summary
   ## Key Findings
   ## Conclusion
   Cite sources inline as [title](url) using only URLs returned by webSearch.

If the answer depends on the user's date, time or region, call getUserTimezone first.
If a search returns no results, say so rather than inventing sources.";

/// Directive text, with any configured extra instructions appended.
pub fn research_directive(extra: Option<&str>) -> String {
    match extra.map(str::trim).filter(|e| !e.is_empty()) {
        Some(extra) => format!("{RESEARCH_DIRECTIVE}\n\n{extra}"),
        None => RESEARCH_DIRECTIVE.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directive_names_required_sections() {
        for section in ["Summary", "Key Findings", "Conclusion", "webSearch"] {
            assert!(RESEARCH_DIRECTIVE.contains(section), "missing {section}");
        }
    }

    #[test]
    fn extra_instructions_are_appended() {
        assert_eq!(research_directive(None), RESEARCH_DIRECTIVE);
        assert_eq!(research_directive(Some("  ")), RESEARCH_DIRECTIVE);
        assert!(research_directive(Some("Answer in French.")).ends_with("Answer in French."));
    }
}
