//! Prompt text sent to the completion service.

pub const SEGMENT_SYSTEM: &str = "\
You split employment contracts into their clauses. \
A clause is one contiguous, self-contained provision, usually one numbered article or paragraph group. \
Keep the original wording of every clause verbatim and keep document order. \
Respond with a single JSON array of strings, one string per clause, and nothing else.";

pub const SUMMARY_SYSTEM: &str = "\
You summarize employment contracts for the employee who is about to sign. \
You receive the summaries of each clause in order. \
Write one plain-language paragraph describing the contract as a whole and the points that need attention. \
Do not add headings, lists or any text other than the summary.";

pub const NO_CLAUSES_SUMMARY: &str = "No clauses could be identified in this document.";

pub const DEGRADED_SUMMARY: &str = "Analysis failed for this clause; manual review is required.";

pub const DEGRADED_QUESTION: &str =
    "Could a qualified reviewer check this clause manually, since automatic analysis failed?";

pub fn analysis_system(
    checklist: &str,
    summary_words: usize,
    reason_words: usize,
    with_sub_points: bool,
) -> String {
    let sub_points = if with_sub_points {
        "\n- \"sub_points\": one boolean per sub-point of the chosen topic, in listed order, \
true when the clause addresses that sub-point (an empty list when the topic is \"extra\")."
    } else {
        ""
    };
    format!(
        "You review clauses of Indonesian employment contracts against Law No. 13 of 2003 on Manpower.\n\
\n\
Checklist topics:\n\
{checklist}\n\
For the clause you receive, reply with one JSON object:\n\
- \"topic\": the number of the checklist topic the clause addresses, as a string, or \"extra\" if none fits.\n\
- \"summary\": a plain-language explanation of the clause in at most {summary_words} words.\n\
- \"vague\": true when the wording is ambiguous or leaves key terms undefined.\n\
- \"red_flag\": true when the clause is unfavourable to the employee or conflicts with the law.\n\
- \"issue_reason\": at most {reason_words} words explaining the vague or red flag, an empty string when both are false.\n\
- \"questions\": questions the employee should ask the employer about this clause, possibly none.{sub_points}"
    )
}

pub fn reference_context(articles: &[String]) -> String {
    format!(
        "Relevant statute articles:\n\n{}",
        articles.join("\n\n---\n\n")
    )
}

pub fn clause_message(index: usize, clause: &str) -> String {
    format!("Clause {index}:\n{clause}")
}

pub fn summary_message(clause_summaries: &[String]) -> String {
    clause_summaries
        .iter()
        .enumerate()
        .map(|(i, s)| format!("{}. {}", i + 1, s))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn chat_system(context: &[String]) -> String {
    let context = if context.is_empty() {
        "(no contract excerpts available)".to_string()
    } else {
        context.join("\n\n")
    };
    format!(
        "You are a helpful assistant answering questions about the employee's contract. \
Answer based on the contract excerpts below. \
The response should be plain text without formatting or tables; separate paragraphs with a blank line.\n\n\
Contract excerpts:\n{context}"
    )
}
